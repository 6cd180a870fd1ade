//! xcell engine
//!
//! Sandboxed JavaScript cells on top of [`xcell_reactive`]:
//! - **Compile** (`compile`): FIFO compile queue and the JSX transform
//! - **Sandbox** (`sandbox`): QuickJS runtime, owned handles, accessors and proxies
//! - **Bridge** (`bridge`): conversion between VM handles and [`HostValue`]s
//! - **Scopes** (`scope`): lexical binding chain mirrored onto VM objects
//! - **Cells** (`dynamic_value`, `dynamic_field`): reactive named values
//!
//! # Example
//!
//! ```rust,ignore
//! use xcell_engine::{Engine, EngineOptions};
//!
//! let local = tokio::task::LocalSet::new();
//! local.run_until(async {
//!     let engine = Engine::new(EngineOptions::default())?;
//!     let cool = engine.cell("cool", "42", None)?;
//!     let both = engine.cell("both", "cool + 24", None)?;
//!     engine.wait_for_compiled().await;
//!     assert_eq!(both.result_value()?.as_number(), Some(66.0));
//! }).await;
//! ```
//!
//! # Threading
//!
//! Everything except the transform step is single-threaded: sandboxes,
//! handles and cells are `!Send` and must stay on the thread (and
//! `LocalSet`) that created them.

#![warn(rust_2018_idioms)]
#![allow(clippy::type_complexity)]

// ============================================================================
// Modules
// ============================================================================

pub mod bridge;
pub mod compile;
pub mod config;
pub mod disposal;
pub mod dynamic_field;
pub mod dynamic_value;
pub mod element;
pub mod engine;
pub mod error;
pub mod sandbox;
pub mod scope;

// ============================================================================
// Re-exports
// ============================================================================

pub use bridge::{host_to_vm, vm_to_host, ElementType, HostFunction, HostValue, NodeRenderer, RenderNode, Renderer};
pub use compile::{CompileQueue, CompiledState, JsxTransformer, Transformer};
pub use config::{EngineOptions, JsxOptions, SandboxOptions};
pub use disposal::{Disposable, GarbageDisposal, OnDispose};
pub use dynamic_field::DynamicField;
pub use dynamic_value::{CellDiagnostics, CellResult, DynamicValue};
pub use element::Element;
pub use engine::{Engine, Retained};
pub use error::{BridgeError, CompileError, EngineError, SandboxError, ScopeError, VmException};
pub use sandbox::{Handle, PropKey, PropertyAccessor, PropertyRevoker, Sandbox, SimpleProxy, SimpleProxyHandler};
pub use scope::{find_scope, Accessor, Namespace, Scope, Unbind};
