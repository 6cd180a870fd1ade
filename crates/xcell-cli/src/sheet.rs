//! Sheet files
//!
//! A sheet is a TOML document of cells, optionally grouped into scopes:
//!
//! ```toml
//! [[cell]]
//! name = "total"
//! code = "stats.one + stats.two"
//!
//! [[scope]]
//! name = "stats"
//!
//! [[scope.cell]]
//! name = "one"
//! code = "1"
//! ```

use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Sheet {
    #[serde(default, rename = "cell")]
    pub cells: Vec<CellEntry>,

    #[serde(default, rename = "scope")]
    pub scopes: Vec<ScopeEntry>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CellEntry {
    pub name: String,
    pub code: String,
}

/// A scope table; unnamed scopes are only reachable from inside
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScopeEntry {
    pub name: Option<String>,

    #[serde(default, rename = "cell")]
    pub cells: Vec<CellEntry>,

    #[serde(default, rename = "scope")]
    pub scopes: Vec<ScopeEntry>,
}

impl Sheet {
    pub fn parse(text: &str) -> anyhow::Result<Sheet> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> anyhow::Result<Sheet> {
        let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read sheet {}", path.display()))?;
        Sheet::parse(&text).with_context(|| format!("Invalid sheet {}", path.display()))
    }

    /// Number of cells, nested scopes included
    pub fn cell_count(&self) -> usize {
        fn count(scopes: &[ScopeEntry]) -> usize {
            scopes.iter().map(|scope| scope.cells.len() + count(&scope.scopes)).sum()
        }
        self.cells.len() + count(&self.scopes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested_scopes() {
        let sheet = Sheet::parse(
            r#"
            [[cell]]
            name = "total"
            code = "stats.one"

            [[scope]]
            name = "stats"

            [[scope.cell]]
            name = "one"
            code = "1"

            [[scope.scope]]

            [[scope.scope.cell]]
            name = "deep"
            code = "this.one"
            "#,
        )
        .unwrap();
        assert_eq!(sheet.cells.len(), 1);
        assert_eq!(sheet.scopes[0].name.as_deref(), Some("stats"));
        assert_eq!(sheet.scopes[0].scopes[0].name, None);
        assert_eq!(sheet.scopes[0].scopes[0].cells[0].code, "this.one");
        assert_eq!(sheet.cell_count(), 3);
    }

    #[test]
    fn test_empty_sheet() {
        assert_eq!(Sheet::parse("").unwrap(), Sheet::default());
    }

    #[test]
    fn test_cell_without_code_rejected() {
        assert!(Sheet::parse("[[cell]]\nname = \"x\"\n").is_err());
        assert!(Sheet::parse("[[cell]]\nname = \"x\"\ncode = \"1\"\nextra = 1\n").is_err());
    }
}
