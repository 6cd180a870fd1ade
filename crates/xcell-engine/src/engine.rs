//! Engine façade
//!
//! Owns one sandbox, its compile queue and the naming context, and creates
//! cells wired to all three. Everything async must run inside a
//! `tokio::task::LocalSet`.

use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use tracing::{debug, info};
use xcell_reactive::{flush, has_pending, Dyn};

use crate::bridge::{vm_to_host, HostValue, Renderer};
use crate::compile::CompileQueue;
use crate::config::EngineOptions;
use crate::disposal::GarbageDisposal;
use crate::dynamic_field::DynamicField;
use crate::dynamic_value::DynamicValue;
use crate::element::Element;
use crate::error::{EngineError, ScopeError};
use crate::sandbox::{Handle, Sandbox};
use crate::scope::{Namespace, Scope};

/// A sandbox plus everything needed to run cells in it
pub struct Engine {
    options: EngineOptions,
    sandbox: Sandbox,
    queue: CompileQueue,
    namespace: Namespace,
}

/// A value read out of the engine, together with the VM objects it still
/// refers to (the functions behind [`HostFunction`](crate::HostFunction)s,
/// element proxies). Dropping it releases them.
pub struct Retained {
    value: HostValue,
    _sink: GarbageDisposal,
}

impl Retained {
    pub fn value(&self) -> &HostValue {
        &self.value
    }
}

impl Deref for Retained {
    type Target = HostValue;

    fn deref(&self) -> &HostValue {
        &self.value
    }
}

impl PartialEq<HostValue> for Retained {
    fn eq(&self, other: &HostValue) -> bool {
        self.value == *other
    }
}

impl fmt::Debug for Retained {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.value, f)
    }
}

impl Engine {
    pub fn new(options: EngineOptions) -> Result<Engine, EngineError> {
        let sandbox = Sandbox::new(&options.sandbox)?;
        let queue = CompileQueue::new(&options.jsx);
        let namespace = Namespace::new(&sandbox)?;
        info!(target: "xcell::engine", factory = %options.jsx.factory, "engine ready");
        Ok(Engine {
            options,
            sandbox,
            queue,
            namespace,
        })
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    pub fn queue(&self) -> &CompileQueue {
        &self.queue
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Replace the renderer used for JSX values
    pub fn set_renderer(&self, renderer: Rc<dyn Renderer>) {
        self.sandbox.set_renderer(renderer);
    }

    /// Create a cell and mount it on `host` (the root scope when `None`)
    pub fn cell(
        &self,
        name: impl Into<Dyn<Option<String>>>,
        code: impl Into<Dyn<Option<String>>>,
        host: Option<&Element>,
    ) -> Result<DynamicValue, EngineError> {
        let cell = DynamicValue::new(&self.sandbox, &self.queue, &self.namespace, name, code);
        cell.mount(host)?;
        Ok(cell)
    }

    /// Create a cell driven by `element`'s `name` and `code` attributes
    pub fn cell_for(&self, element: &Element) -> Result<DynamicValue, EngineError> {
        self.cell(element.attribute("name"), element.attribute("code"), Some(element))
    }

    /// Publish a host-owned value under `name`
    pub fn field(
        &self,
        name: impl Into<Dyn<Option<String>>>,
        value: impl Into<Dyn<Option<HostValue>>>,
        host: Option<&Element>,
    ) -> Result<DynamicField, ScopeError> {
        DynamicField::new(&self.namespace, name, value, host)
    }

    /// Create a scope under `parent` (the root when `None`); a named scope is
    /// reachable from its parent as `this.<name>`
    pub fn scope(&self, parent: Option<&Scope>, name: Option<&str>) -> Result<Scope, ScopeError> {
        parent.unwrap_or(self.namespace.root()).child(name)
    }

    /// Compile and evaluate one expression in the root scope
    pub async fn eval(&self, code: &str) -> Result<Retained, EngineError> {
        let compiled = self.queue.compile(code).await?;
        let handle = self.namespace.root().eval_expression(&compiled)?;
        self.retain(handle)
    }

    /// Read a global through the bridge
    pub fn global(&self, name: &str) -> Result<Retained, EngineError> {
        let global = self.sandbox.global()?;
        let handle = self.sandbox.get_prop(&global, name)?;
        self.retain(handle)
    }

    fn retain(&self, handle: Handle) -> Result<Retained, EngineError> {
        let sink = GarbageDisposal::new();
        let value = vm_to_host(&self.sandbox, &handle, &sink)?;
        handle.release();
        Ok(Retained { value, _sink: sink })
    }

    /// Resolve once every pending compile has settled and the reactive graph
    /// has caught up with the results
    pub async fn wait_for_compiled(&self) {
        loop {
            flush();
            self.queue.wait_for_compiled().await;
            flush();
            if self.queue.is_idle() && !has_pending() {
                break;
            }
        }
    }

    /// Tear down the namespace, then the sandbox. Handles that cells or
    /// [`Retained`] values still hold are reported as leaked.
    pub fn dispose(self) -> Result<(), EngineError> {
        let Engine { sandbox, namespace, .. } = self;
        drop(namespace);
        debug!(target: "xcell::engine", live = sandbox.live_handles(), "disposing engine");
        sandbox.dispose()?;
        Ok(())
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("sandbox", &self.sandbox)
            .field("queue", &self.queue)
            .field("namespace", &self.namespace)
            .finish()
    }
}
