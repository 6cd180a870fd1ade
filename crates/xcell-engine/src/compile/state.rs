use serde::{Serialize, Serializer};

use crate::error::CompileError;

/// Where a piece of source is in the compile pipeline
///
/// Every state remembers the source it belongs to so a consumer can discard
/// results for code that has since changed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CompiledState {
    /// Submitted, not yet settled
    Compiling { source: String },
    /// Transformed successfully
    Compiled { source: String, compiled: String },
    /// Transform failed
    Error {
        source: String,
        #[serde(serialize_with = "serialize_display")]
        error: CompileError,
    },
}

impl CompiledState {
    pub fn source(&self) -> &str {
        match self {
            CompiledState::Compiling { source }
            | CompiledState::Compiled { source, .. }
            | CompiledState::Error { source, .. } => source,
        }
    }

    pub fn compiled(&self) -> Option<&str> {
        match self {
            CompiledState::Compiled { compiled, .. } => Some(compiled),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&CompileError> {
        match self {
            CompiledState::Error { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn is_compiling(&self) -> bool {
        matches!(self, CompiledState::Compiling { .. })
    }

    /// Build the settled state for `source` from a transform result
    pub fn settled(source: impl Into<String>, result: Result<String, CompileError>) -> Self {
        let source = source.into();
        match result {
            Ok(compiled) => CompiledState::Compiled { source, compiled },
            Err(error) => CompiledState::Error { source, error },
        }
    }
}

fn serialize_display<S: Serializer>(error: &CompileError, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_settled_states() {
        let ok = CompiledState::settled("1", Ok("1".to_string()));
        assert_eq!(ok.compiled(), Some("1"));
        assert_eq!(ok.source(), "1");

        let failed = CompiledState::settled("(", Err(CompileError::Cancelled));
        assert_eq!(failed.error(), Some(&CompileError::Cancelled));
        assert!(failed.compiled().is_none());
    }

    #[test]
    fn test_state_json() {
        let state = CompiledState::Error {
            source: "<a>".to_string(),
            error: CompileError::Syntax {
                message: "unterminated JSX element <a>".to_string(),
                offset: 0,
            },
        };
        assert_eq!(
            serde_json::to_value(&state).unwrap(),
            json!({
                "state": "error",
                "source": "<a>",
                "error": "Syntax error at offset 0: unterminated JSX element <a>",
            })
        );
        assert_eq!(
            serde_json::to_value(CompiledState::Compiling { source: "x".into() }).unwrap(),
            json!({ "state": "compiling", "source": "x" })
        );
    }
}
