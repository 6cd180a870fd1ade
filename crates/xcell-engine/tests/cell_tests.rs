//! Integration tests for cells: compile, evaluate, bind, react, dispose
//!
//! Every test builds its own engine inside a `LocalSet`.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::task::LocalSet;
use xcell_engine::{
    BridgeError, CompileError, CompileQueue, CompiledState, DynamicValue, Element, Engine, EngineError, EngineOptions,
    HostValue, SandboxError,
};
use xcell_reactive::{flush, Field};

fn run_local<F: Future<Output = ()>>(test: F) -> impl Future<Output = ()> {
    async move { LocalSet::new().run_until(test).await }
}

fn engine() -> Engine {
    Engine::new(EngineOptions::default()).unwrap()
}

fn code(text: &str) -> Field<Option<String>> {
    Field::new(Some(text.to_string()))
}

fn number(cell: &DynamicValue) -> f64 {
    cell.result_value().unwrap().as_number().expect("numeric result")
}

// ────────────────────────────────────────────────────────────────────────────
// Evaluation
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_cell_evaluates_after_compile() {
    run_local(async {
        let engine = engine();
        let cell = engine.cell("answer", "6 * 7", None).unwrap();
        assert_eq!(cell.result_value().unwrap(), HostValue::Undefined);

        engine.wait_for_compiled().await;
        assert_eq!(number(&cell), 42.0);
        assert!(matches!(
            cell.compiled_state().get_untracked(),
            Some(CompiledState::Compiled { .. })
        ));
    })
    .await;
}

#[tokio::test]
async fn test_dependent_cells_recompute() {
    run_local(async {
        let engine = engine();
        let cool_code = code("42");
        let cool = engine.cell("cool", cool_code.clone(), None).unwrap();
        let _fun = engine.cell("fun", "24", None).unwrap();
        let both = engine.cell("both", "cool + fun", None).unwrap();
        engine.wait_for_compiled().await;
        assert_eq!(number(&cool), 42.0);
        assert_eq!(number(&both), 66.0);

        cool_code.set(Some("1000".to_string()));
        engine.wait_for_compiled().await;
        assert_eq!(number(&both), 1024.0);
    })
    .await;
}

#[tokio::test]
async fn test_list_pointer_keeps_list_identity() {
    run_local(async {
        let engine = engine();
        let index_code = code("0");
        let _index = engine.cell("index", index_code.clone(), None).unwrap();
        let list = engine.cell("list", "['cool', 'neat', 'wow']", None).unwrap();
        let pointer = engine.cell("pointer", "list[index]", None).unwrap();
        engine.wait_for_compiled().await;
        assert_eq!(pointer.result_value().unwrap(), HostValue::from("cool"));

        let before = list.result_handle().unwrap();
        index_code.set(Some("1".to_string()));
        engine.wait_for_compiled().await;
        assert_eq!(pointer.result_value().unwrap(), HostValue::from("neat"));

        let after = list.result_handle().unwrap();
        assert!(engine.sandbox().eq(&before, &after).unwrap());

        // VM code sees the same array object on every read, too.
        let same = engine.sandbox().eval("list === list").unwrap();
        assert!(engine.sandbox().as_bool(&same).unwrap());
    })
    .await;
}

#[tokio::test]
async fn test_evaluation_error_is_reported_and_recovers() {
    run_local(async {
        let engine = engine();
        let source = code("missing + 1");
        let cell = engine.cell("broken", source.clone(), None).unwrap();
        engine.wait_for_compiled().await;
        match cell.result_value() {
            Err(EngineError::Sandbox(SandboxError::Exception(exception))) => {
                assert_eq!(exception.name, "ReferenceError");
            }
            other => panic!("expected a reference error, got {:?}", other),
        }

        let _missing = engine.cell("missing", "1", None).unwrap();
        engine.wait_for_compiled().await;
        assert_eq!(number(&cell), 2.0);
    })
    .await;
}

#[tokio::test]
async fn test_compile_error_keeps_previous_value() {
    run_local(async {
        let engine = engine();
        let source = code("10");
        let cell = engine.cell("ten", source.clone(), None).unwrap();
        engine.wait_for_compiled().await;
        assert_eq!(number(&cell), 10.0);

        source.set(Some("<div>unclosed".to_string()));
        engine.wait_for_compiled().await;
        let state = cell.compiled_state().get_untracked().unwrap();
        assert!(matches!(state.error(), Some(CompileError::Syntax { .. })));
        assert_eq!(state.source(), "<div>unclosed");
        assert_eq!(number(&cell), 10.0);
    })
    .await;
}

#[tokio::test]
async fn test_self_reference_is_an_error() {
    run_local(async {
        let engine = engine();
        let cell = engine.cell("ouroboros", "ouroboros + 1", None).unwrap();
        engine.wait_for_compiled().await;
        assert!(cell.result_value().is_err());
    })
    .await;
}

#[tokio::test]
async fn test_mutual_reference_is_an_error_until_broken() {
    run_local(async {
        let engine = engine();
        let ping_code = code("1");
        let ping = engine.cell("ping", ping_code.clone(), None).unwrap();
        let pong = engine.cell("pong", "ping + 1", None).unwrap();
        engine.wait_for_compiled().await;
        assert_eq!(number(&pong), 2.0);

        ping_code.set(Some("pong + 1".to_string()));
        engine.wait_for_compiled().await;
        assert!(ping.result_value().is_err());
        assert!(pong.result_value().is_err());

        ping_code.set(Some("5".to_string()));
        engine.wait_for_compiled().await;
        assert_eq!(number(&ping), 5.0);
        assert_eq!(number(&pong), 6.0);
    })
    .await;
}

#[tokio::test]
async fn test_removed_code_freezes_last_value() {
    run_local(async {
        let engine = engine();
        let factor_code = code("1");
        let _factor = engine.cell("factor", factor_code.clone(), None).unwrap();
        let scaled_code = code("factor * 10");
        let scaled = engine.cell("scaled", scaled_code.clone(), None).unwrap();
        engine.wait_for_compiled().await;
        assert_eq!(number(&scaled), 10.0);

        scaled_code.set(None);
        factor_code.set(Some("2".to_string()));
        engine.wait_for_compiled().await;
        assert!(scaled.compiled_state().get_untracked().is_none());
        assert_eq!(number(&scaled), 10.0);

        scaled_code.set(Some("factor * 100".to_string()));
        engine.wait_for_compiled().await;
        assert_eq!(number(&scaled), 200.0);
    })
    .await;
}

#[tokio::test]
async fn test_overwritten_wrapper_keeps_previous_value() {
    run_local(async {
        let engine = engine();
        let source = code("7");
        let cell = engine.cell("lucky", source.clone(), None).unwrap();
        engine.wait_for_compiled().await;
        assert_eq!(number(&cell), 7.0);

        // Close the wrapper early and point its global at a number.
        source.set(Some(format!(
            "0)(); }}\nvar {} = 5;\nfunction __xcell_tail() {{ return (() => 0",
            cell.id()
        )));
        engine.wait_for_compiled().await;
        assert!(matches!(
            cell.compiled_state().get_untracked(),
            Some(CompiledState::Compiled { .. })
        ));
        assert_eq!(number(&cell), 7.0);
    })
    .await;
}

#[tokio::test]
async fn test_jsx_cell_renders_node() {
    run_local(async {
        let engine = engine();
        let _who = engine.cell("who", "'world'", None).unwrap();
        let view = engine.cell("view", "<p class=\"greeting\">hello {who}</p>", None).unwrap();
        engine.wait_for_compiled().await;
        let HostValue::Node(node) = view.result_value().unwrap() else {
            panic!("expected a render node");
        };
        assert_eq!(node.tag(), Some("p"));
        assert_eq!(node.text_content(), "hello world");
    })
    .await;
}

#[tokio::test]
async fn test_trailing_line_comment_in_code() {
    run_local(async {
        let engine = engine();
        let cell = engine.cell("commented", "5 // five", None).unwrap();
        engine.wait_for_compiled().await;
        assert_eq!(number(&cell), 5.0);
    })
    .await;
}

// ────────────────────────────────────────────────────────────────────────────
// Compile generations
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_stale_compile_never_overwrites_newer_code() {
    run_local(async {
        let engine = engine();
        let compiles = Arc::new(AtomicUsize::new(0));
        let queue = {
            let compiles = Arc::clone(&compiles);
            CompileQueue::with_transformer(move |source: &str| -> Result<String, CompileError> {
                compiles.fetch_add(1, Ordering::SeqCst);
                if source.contains("'first'") {
                    std::thread::sleep(std::time::Duration::from_millis(50));
                }
                Ok(source.to_string())
            })
        };

        let source = code("'first'");
        let cell = DynamicValue::new(engine.sandbox(), &queue, engine.namespace(), "which", source.clone());
        cell.mount(None).unwrap();
        source.set(Some("'second'".to_string()));
        flush();

        let seen = Field::new(Vec::<String>::new());
        let _watch = {
            let (state, seen) = (cell.compiled_state(), seen.clone());
            cell.compiled_state().subscribe(move || {
                if let Some(compiled) = state.get_untracked() {
                    seen.update(|seen| seen.push(compiled.source().to_string()));
                }
            })
        };

        queue.wait_for_compiled().await;
        flush();
        assert_eq!(compiles.load(Ordering::SeqCst), 2);
        assert!(!seen.get_untracked().contains(&"'first'".to_string()));
        assert_eq!(
            cell.compiled_state().get_untracked().map(|state| state.source().to_string()),
            Some("'second'".to_string())
        );
        assert_eq!(cell.result_value().unwrap(), HostValue::from("second"));
    })
    .await;
}

// ────────────────────────────────────────────────────────────────────────────
// Bindings
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_named_global_follows_value_and_disposal() {
    run_local(async {
        let engine = engine();
        let source = code("1");
        let cell = engine.cell("counter", source.clone(), None).unwrap();
        engine.wait_for_compiled().await;
        assert_eq!(engine.global("counter").unwrap(), HostValue::from(1));

        source.set(Some("2".to_string()));
        engine.wait_for_compiled().await;
        assert_eq!(engine.global("counter").unwrap(), HostValue::from(2));

        cell.dispose();
        let own = engine
            .sandbox()
            .eval("Object.prototype.hasOwnProperty.call(globalThis, 'counter')")
            .unwrap();
        assert!(!engine.sandbox().as_bool(&own).unwrap());
        assert!(cell.compiled_state().get_untracked().is_none());
        cell.dispose();
    })
    .await;
}

#[tokio::test]
async fn test_rename_moves_binding() {
    run_local(async {
        let engine = engine();
        let name = Field::new(Some("before".to_string()));
        let cell = engine.cell(name.clone(), "3", None).unwrap();
        engine.wait_for_compiled().await;
        assert_eq!(cell.bound_name().as_deref(), Some("before"));

        name.set(Some("after".to_string()));
        engine.wait_for_compiled().await;
        assert_eq!(cell.bound_name().as_deref(), Some("after"));
        assert_eq!(engine.global("after").unwrap(), HostValue::from(3));
        assert_eq!(engine.global("before").unwrap(), HostValue::Undefined);
        assert_eq!(engine.namespace().names(), vec!["after".to_string()]);
    })
    .await;
}

#[tokio::test]
async fn test_override_from_host_and_vm() {
    run_local(async {
        let engine = engine();
        let cell = engine.cell("knob", "1", None).unwrap();
        let doubled = engine.cell("doubled", "knob * 2", None).unwrap();
        engine.wait_for_compiled().await;
        assert_eq!(number(&doubled), 2.0);

        cell.set_override(HostValue::from(5));
        cell.set_override(HostValue::from(6));
        engine.wait_for_compiled().await;
        assert_eq!(number(&doubled), 12.0);

        engine.sandbox().eval("knob = 10").unwrap();
        engine.wait_for_compiled().await;
        assert_eq!(number(&cell), 10.0);
        assert_eq!(number(&doubled), 20.0);

        cell.clear_override();
        engine.wait_for_compiled().await;
        assert_eq!(number(&doubled), 2.0);
    })
    .await;
}

#[tokio::test]
async fn test_attribute_driven_cell() {
    run_local(async {
        let engine = engine();
        let element = Element::new("x-cell");
        element.set_attribute("name", "fromAttrs");
        element.set_attribute("code", "'a' + 'b'");
        let cell = engine.cell_for(&element).unwrap();
        engine.wait_for_compiled().await;
        assert_eq!(cell.result_value().unwrap(), HostValue::from("ab"));

        element.set_attribute("code", "'c'");
        engine.wait_for_compiled().await;
        assert_eq!(engine.global("fromAttrs").unwrap(), HostValue::from("c"));

        let diagnostics = cell.diagnostics();
        assert_eq!(diagnostics.name.as_deref(), Some("fromAttrs"));
        assert_eq!(diagnostics.value, serde_json::json!("c"));
        assert!(matches!(diagnostics.compiled_state, Some(CompiledState::Compiled { .. })));
    })
    .await;
}

#[tokio::test]
async fn test_function_valued_cell_is_callable_from_host() {
    run_local(async {
        let engine = engine();
        let cell = engine.cell("greet", "(name) => 'hi ' + name", None).unwrap();
        engine.wait_for_compiled().await;
        let value = cell.result_value().unwrap();
        let greet = value.as_function().expect("function result");
        assert_eq!(greet.call(&[HostValue::from("ada")]).unwrap(), HostValue::from("hi ada"));
    })
    .await;
}

#[tokio::test]
async fn test_engine_eval_sees_cells() {
    run_local(async {
        let engine = engine();
        let _base = engine.cell("base", "40", None).unwrap();
        engine.wait_for_compiled().await;
        assert_eq!(engine.eval("base + 2").await.unwrap(), HostValue::from(42));
    })
    .await;
}

// ────────────────────────────────────────────────────────────────────────────
// VM resources
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_disposed_cells_release_vm_handles() {
    run_local(async {
        let engine = engine();
        let baseline = engine.sandbox().live_handles();
        let cells = vec![
            engine.cell("items", "[1, 2, 3]", None).unwrap(),
            engine.cell("total", "items.reduce((sum, n) => sum + n, 0)", None).unwrap(),
            engine.cell("view", "<p>{total}</p>", None).unwrap(),
            engine.cell("offset", "(x) => x + total", None).unwrap(),
        ];
        engine.wait_for_compiled().await;
        assert_eq!(number(&cells[1]), 6.0);
        let offset = cells[3].result_value().unwrap();
        let offset = offset.as_function().expect("function result");
        assert_eq!(offset.call(&[HostValue::from(1)]).unwrap(), HostValue::from(7));

        for cell in &cells {
            cell.dispose();
        }
        assert_eq!(engine.sandbox().live_handles(), baseline);
        drop(cells);
        engine.dispose().unwrap();
    })
    .await;
}

#[tokio::test]
async fn test_eval_result_releases_vm_function_on_drop() {
    run_local(async {
        let engine = engine();
        let baseline = engine.sandbox().live_handles();
        let retained = engine.eval("(x) => x * 2").await.unwrap();
        let double = retained.as_function().expect("function result").clone();
        assert_eq!(double.call(&[HostValue::from(21)]).unwrap(), HostValue::from(42));
        assert!(engine.sandbox().live_handles() > baseline);

        drop(retained);
        assert_eq!(engine.sandbox().live_handles(), baseline);
        assert_eq!(double.call(&[]), Err(BridgeError::Released));
    })
    .await;
}
