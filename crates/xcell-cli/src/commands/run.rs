//! `xcell run`: Evaluate every cell of a sheet.

use serde_json::Value as Json;
use xcell_engine::{CellDiagnostics, DynamicValue, Element, Engine, Scope};

use crate::sheet::{CellEntry, ScopeEntry, Sheet};

/// Final state of one cell
#[derive(Debug)]
pub struct Outcome {
    /// Dotted path, e.g. `stats.one`; anonymous scopes show as `[n]`
    pub label: String,
    pub result: Result<Json, String>,
    pub diagnostics: CellDiagnostics,
}

/// Cells and the elements that keep their scopes alive
struct Mounted {
    cells: Vec<(String, DynamicValue)>,
    _hosts: Vec<Element>,
}

pub async fn execute(engine: &Engine, sheet: &Sheet) -> anyhow::Result<Vec<Outcome>> {
    let mut mounted = Mounted {
        cells: Vec::new(),
        _hosts: Vec::new(),
    };
    for entry in &sheet.cells {
        let cell = engine.cell(entry.name.as_str(), entry.code.as_str(), None)?;
        mounted.cells.push((entry.name.clone(), cell));
    }
    for (index, entry) in sheet.scopes.iter().enumerate() {
        mount_scope(engine, &mut mounted, None, entry, &scope_label("", entry, index))?;
    }
    tracing::debug!(cells = mounted.cells.len(), "sheet mounted");

    engine.wait_for_compiled().await;

    let outcomes = mounted
        .cells
        .iter()
        .map(|(label, cell)| Outcome {
            label: label.clone(),
            result: settle(cell),
            diagnostics: cell.diagnostics(),
        })
        .collect();
    for (_, cell) in &mounted.cells {
        cell.dispose();
    }
    Ok(outcomes)
}

fn mount_scope(
    engine: &Engine,
    mounted: &mut Mounted,
    parent: Option<(&Scope, &Element)>,
    entry: &ScopeEntry,
    label: &str,
) -> anyhow::Result<()> {
    let scope = engine.scope(parent.map(|(scope, _)| scope), entry.name.as_deref())?;
    let host = Element::new("x-scope");
    host.attach_scope(scope.clone());
    if let Some((_, parent_host)) = parent {
        parent_host.append_child(&host);
    }

    for CellEntry { name, code } in &entry.cells {
        let element = Element::new("x-cell");
        host.append_child(&element);
        let cell = engine.cell(name.as_str(), code.as_str(), Some(&element))?;
        mounted.cells.push((format!("{}.{}", label, name), cell));
    }
    for (index, child) in entry.scopes.iter().enumerate() {
        mount_scope(engine, mounted, Some((&scope, &host)), child, &scope_label(label, child, index))?;
    }
    mounted._hosts.push(host);
    Ok(())
}

fn scope_label(parent: &str, entry: &ScopeEntry, index: usize) -> String {
    let own = match &entry.name {
        Some(name) => name.clone(),
        None => format!("[{}]", index),
    };
    if parent.is_empty() {
        own
    } else {
        format!("{}.{}", parent, own)
    }
}

/// A compile error counts as a failure even though the cell keeps its
/// previous value
fn settle(cell: &DynamicValue) -> Result<Json, String> {
    if let Some(error) = cell.compiled_state().get_untracked().and_then(|state| state.error().cloned()) {
        return Err(error.to_string());
    }
    cell.result_value()
        .map(|value| value.to_json())
        .map_err(|err| err.to_string())
}
