//! CLI subcommand implementations

pub mod compile;
pub mod eval;
pub mod run;

use std::path::Path;

use anyhow::Context;
use serde_json::Value as Json;
use xcell_engine::EngineOptions;

/// Engine options from `path`, or the defaults
pub fn load_options(path: Option<&Path>) -> anyhow::Result<EngineOptions> {
    let Some(path) = path else {
        return Ok(EngineOptions::default());
    };
    let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read config {}", path.display()))?;
    EngineOptions::from_toml(&text).with_context(|| format!("Invalid config {}", path.display()))
}

/// JSON for display: whole numbers print without a fractional part
pub fn display(value: &Json) -> String {
    fn tidy(value: &Json) -> Json {
        match value {
            Json::Number(n) => match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0 => Json::from(f as i64),
                _ => value.clone(),
            },
            Json::Array(items) => Json::Array(items.iter().map(tidy).collect()),
            Json::Object(map) => Json::Object(map.iter().map(|(k, v)| (k.clone(), tidy(v))).collect()),
            other => other.clone(),
        }
    }
    tidy(value).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_display_whole_numbers() {
        assert_eq!(display(&json!([1.0, 2.5, { "n": -3.0 }])), r#"[1,2.5,{"n":-3}]"#);
        assert_eq!(display(&json!("text")), r#""text""#);
    }

    #[test]
    fn test_load_options_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xcell.toml");
        std::fs::write(&path, "[sandbox]\neval_budget_ms = 75\n").unwrap();
        let options = load_options(Some(&path)).unwrap();
        assert_eq!(options.sandbox.eval_budget_ms, 75);
        assert_eq!(load_options(None).unwrap(), EngineOptions::default());
    }

    #[test]
    fn test_load_options_reports_bad_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xcell.toml");
        std::fs::write(&path, "[sandbox]\nbogus = true\n").unwrap();
        let err = load_options(Some(&path)).unwrap_err();
        assert!(err.to_string().starts_with("Invalid config"), "{}", err);
        assert!(load_options(Some(&dir.path().join("missing.toml"))).is_err());
    }
}
