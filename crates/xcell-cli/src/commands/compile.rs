//! `xcell compile`: Print the JSX transform of a snippet.

use xcell_engine::{JsxOptions, JsxTransformer, Transformer};

pub fn execute(options: &JsxOptions, code: &str) -> anyhow::Result<String> {
    Ok(JsxTransformer::new(options.clone()).transform(code)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_uses_configured_factory() {
        let options = JsxOptions {
            factory: "h".to_string(),
            fragment: "Fragment".to_string(),
        };
        assert_eq!(execute(&options, "<br/>").unwrap(), "h(\"br\", null)");
    }

    #[test]
    fn test_compile_error_is_reported() {
        let err = execute(&JsxOptions::default(), "<a></b>").unwrap_err();
        assert!(err.to_string().starts_with("Syntax error"), "{}", err);
    }
}
