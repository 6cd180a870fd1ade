//! `xcell eval`: Evaluate one expression in a fresh engine.

use serde_json::Value as Json;
use xcell_engine::Engine;

pub async fn execute(engine: &Engine, code: &str) -> anyhow::Result<Json> {
    let value = engine.eval(code).await?;
    Ok(value.to_json())
}
