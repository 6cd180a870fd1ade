//! Engine configuration
//!
//! All options deserialize from TOML with defaults, e.g.
//!
//! ```toml
//! [sandbox]
//! eval_budget_ms = 250
//! memory_limit = 33554432
//!
//! [jsx]
//! factory = "h"
//! fragment = "Fragment"
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default wall-clock budget for one evaluation
pub const DEFAULT_EVAL_BUDGET_MS: u64 = 1000;

/// Top-level engine options
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct EngineOptions {
    /// Interpreter limits
    pub sandbox: SandboxOptions,

    /// JSX compilation settings
    pub jsx: JsxOptions,
}

impl EngineOptions {
    /// Parse options from TOML text
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

/// Interpreter limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SandboxOptions {
    /// Abort an evaluation once it has run this long (milliseconds)
    pub eval_budget_ms: u64,

    /// Heap limit in bytes (unlimited when absent)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_limit: Option<usize>,

    /// Interpreter stack limit in bytes (interpreter default when absent)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_stack_size: Option<usize>,
}

impl SandboxOptions {
    /// Evaluation budget as a duration
    pub fn eval_budget(&self) -> Duration {
        Duration::from_millis(self.eval_budget_ms)
    }
}

impl Default for SandboxOptions {
    fn default() -> Self {
        Self {
            eval_budget_ms: DEFAULT_EVAL_BUDGET_MS,
            memory_limit: None,
            max_stack_size: None,
        }
    }
}

/// JSX compilation configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct JsxOptions {
    /// Factory function expression (default: "JSX.createElement")
    pub factory: String,

    /// Fragment component expression (default: "JSX.Fragment")
    pub fragment: String,
}

fn default_jsx_factory() -> String {
    "JSX.createElement".to_string()
}

fn default_jsx_fragment() -> String {
    "JSX.Fragment".to_string()
}

impl Default for JsxOptions {
    fn default() -> Self {
        Self {
            factory: default_jsx_factory(),
            fragment: default_jsx_fragment(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_gives_defaults() {
        let options = EngineOptions::from_toml("").unwrap();
        assert_eq!(options, EngineOptions::default());
        assert_eq!(options.sandbox.eval_budget(), Duration::from_millis(DEFAULT_EVAL_BUDGET_MS));
        assert_eq!(options.jsx.factory, "JSX.createElement");
    }

    #[test]
    fn test_partial_tables_keep_other_defaults() {
        let options = EngineOptions::from_toml("[jsx]\nfactory = \"h\"\n\n[sandbox]\neval_budget_ms = 20\n").unwrap();
        assert_eq!(options.jsx.factory, "h");
        assert_eq!(options.jsx.fragment, "JSX.Fragment");
        assert_eq!(options.sandbox.eval_budget_ms, 20);
        assert_eq!(options.sandbox.memory_limit, None);
    }

    #[test]
    fn test_unknown_keys_rejected() {
        assert!(EngineOptions::from_toml("[sandbox]\nbudget = 5\n").is_err());
        assert!(EngineOptions::from_toml("[render]\n").is_err());
    }
}
