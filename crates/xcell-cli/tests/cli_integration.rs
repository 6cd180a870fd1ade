//! Integration tests for the `xcell` binary.

use std::path::PathBuf;
use std::process::{Command, Output};

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn xcell(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_xcell"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to spawn xcell")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

// ────────────────────────────────────────────────────────────────────────────
// eval
// ────────────────────────────────────────────────────────────────────────────

#[test]
fn test_eval_prints_json() {
    let output = xcell(&["eval", "({ sum: 40 + 2, tags: ['a', 'b'] })"]);
    assert!(output.status.success());
    assert_eq!(stdout(&output).trim(), r#"{"sum":42,"tags":["a","b"]}"#);
}

#[test]
fn test_eval_error_exits_nonzero() {
    let output = xcell(&["eval", "undefinedThing()"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("ReferenceError"));
}

// ────────────────────────────────────────────────────────────────────────────
// run
// ────────────────────────────────────────────────────────────────────────────

#[test]
fn test_run_sheet() {
    let sheet = fixtures_dir().join("stats.toml");
    let output = xcell(&["run", sheet.to_str().unwrap()]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let lines: Vec<String> = stdout(&output).lines().map(str::to_string).collect();
    assert_eq!(lines[0], "total = 3");
    assert!(lines[1].starts_with("view = "), "{}", lines[1]);
    assert!(lines[1].contains(r#""$node":"p""#), "{}", lines[1]);
    assert_eq!(lines[2], "stats.one = 1");
    assert_eq!(lines[3], "stats.two = 2");
}

#[test]
fn test_run_debug_prints_diagnostics() {
    let sheet = fixtures_dir().join("stats.toml");
    let output = xcell(&["run", sheet.to_str().unwrap(), "--debug"]);
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains(r#""state": "compiled""#), "{}", text);
    assert!(text.contains(r#""overridden": false"#), "{}", text);
}

#[test]
fn test_run_reports_failed_cells() {
    let dir = tempfile::tempdir().unwrap();
    let sheet = dir.path().join("broken.toml");
    std::fs::write(
        &sheet,
        "[[cell]]\nname = \"ok\"\ncode = \"1\"\n\n[[cell]]\nname = \"bad\"\ncode = \"(\"\n",
    )
    .unwrap();
    let output = xcell(&["run", sheet.to_str().unwrap()]);
    assert!(!output.status.success());
    let text = stdout(&output);
    assert!(text.contains("ok = 1"), "{}", text);
    assert!(text.contains("bad ! Syntax error"), "{}", text);
    assert!(String::from_utf8_lossy(&output.stderr).contains("1 of 2 cells failed"));
}

// ────────────────────────────────────────────────────────────────────────────
// compile and config
// ────────────────────────────────────────────────────────────────────────────

#[test]
fn test_compile_with_config_factory() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("xcell.toml");
    std::fs::write(&config, "[jsx]\nfactory = \"h\"\n").unwrap();
    let output = xcell(&["--config", config.to_str().unwrap(), "compile", "<hr/>"]);
    assert!(output.status.success());
    assert_eq!(stdout(&output).trim(), r#"h("hr", null)"#);
}

#[test]
fn test_missing_sheet_is_an_error() {
    let output = xcell(&["run", "/nonexistent/sheet.toml"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Failed to read sheet"));
}
