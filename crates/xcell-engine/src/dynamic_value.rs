//! Reactive cells
//!
//! A [`DynamicValue`] turns reactive `code` into a reactive result:
//!
//! ```text
//! code ──► compile queue ──► compiled_state ──► compiled code ─┐
//!                                                               ├─► evaluated (Calc)
//! override ─────────────────────────────────────────────────────┤
//! namespace version, mounted element, names read while running ─┘
//! ```
//!
//! The compiled wrapper defines a uniquely named global function; every
//! evaluation redefines it and calls it with `this` bound to the scope the
//! cell is mounted in. Names the code reads are cell bindings whose getters
//! read other cells' results, so the dependencies are tracked by the calc.
//!
//! Each compile is tagged with a generation; a result arriving after a newer
//! submission is dropped.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use serde_json::Value as Json;
use tracing::{debug, warn};
use xcell_reactive::{untracked, Calc, Dyn, Field, Subscription};

use crate::bridge::{host_to_vm, vm_to_host, HostValue};
use crate::compile::{wrap_cell, CompileQueue, CompiledState};
use crate::disposal::GarbageDisposal;
use crate::element::Element;
use crate::error::{EngineError, SandboxError, ScopeError};
use crate::sandbox::{Handle, Sandbox, WeakSandbox};
use crate::scope::{find_scope, Accessor, Namespace, Scope, Unbind};

/// Result of evaluating a cell
pub type CellResult = Result<HostValue, EngineError>;

static NEXT_CELL: AtomicU64 = AtomicU64::new(0);

fn next_cell_id() -> String {
    format!("__xcell_cell_{}", NEXT_CELL.fetch_add(1, Ordering::Relaxed))
}

/// One evaluation: the host value plus the VM value it came from, so
/// bindings can hand out the very same object to other code
#[derive(Clone)]
struct Evaluated {
    value: HostValue,
    handle: Option<Rc<Handle>>,
    /// Keeps wrappers created while converting `value` alive
    _sink: Option<GarbageDisposal>,
}

impl Evaluated {
    fn host(value: HostValue) -> Self {
        Self {
            value,
            handle: None,
            _sink: None,
        }
    }

    /// VM handle for this value (a dup of the original when there is one)
    fn to_vm(&self, sandbox: &Sandbox, sink: &GarbageDisposal) -> Result<Handle, EngineError> {
        match &self.handle {
            Some(handle) => Ok(handle.dup()?),
            None => Ok(host_to_vm(sandbox, &self.value, sink)?),
        }
    }
}

/// The binding a cell holds in its scope
#[derive(Default)]
pub(crate) struct BindingSlot {
    current: RefCell<Option<Unbind>>,
}

impl BindingSlot {
    /// Drop the current binding, then bind `name` in `scope` if given
    pub(crate) fn rebind(&self, target: Option<(&Scope, &str)>, accessor: impl FnOnce() -> Accessor) -> Result<(), ScopeError> {
        self.clear();
        if let Some((scope, name)) = target {
            let unbind = scope.add_binding(name, accessor())?;
            *self.current.borrow_mut() = Some(unbind);
        }
        Ok(())
    }

    pub(crate) fn clear(&self) {
        let previous = self.current.borrow_mut().take();
        if let Some(previous) = previous {
            if let Err(err) = previous.unbind() {
                debug!(target: "xcell::cell", "unbind skipped: {}", err);
            }
        }
    }

    pub(crate) fn name(&self) -> Option<String> {
        self.current.borrow().as_ref().map(|unbind| unbind.name().to_string())
    }
}

struct DynamicInner {
    id: String,
    name: Dyn<Option<String>>,
    code: Dyn<Option<String>>,
    sandbox: WeakSandbox,
    queue: CompileQueue,
    namespace: Namespace,
    mounted: Field<Option<Element>>,
    is_mounted: Cell<bool>,
    override_value: Field<Option<HostValue>>,
    compiled_state: Field<Option<CompiledState>>,
    compiled_code: Calc<Option<String>>,
    generation: Cell<u64>,
    evaluated: Calc<Result<Evaluated, EngineError>>,
    last_good: RefCell<Option<Evaluated>>,
    binding: BindingSlot,
    /// Owns VM wrappers created when handing host-only results to the VM
    sink: GarbageDisposal,
    subscriptions: RefCell<Vec<Subscription>>,
    disposed: Cell<bool>,
}

/// A named, reactive, sandboxed expression
///
/// Cheap to clone; clones are the same cell.
#[derive(Clone)]
pub struct DynamicValue(Rc<DynamicInner>);

impl DynamicValue {
    pub fn new(
        sandbox: &Sandbox,
        queue: &CompileQueue,
        namespace: &Namespace,
        name: impl Into<Dyn<Option<String>>>,
        code: impl Into<Dyn<Option<String>>>,
    ) -> DynamicValue {
        let compiled_state: Field<Option<CompiledState>> = Field::new(None);

        let compiled_code = {
            let state = compiled_state.clone();
            let previous: Rc<RefCell<Option<String>>> = Rc::new(RefCell::new(None));
            // A failed compile keeps running the last good code; no code at
            // all freezes the last result instead.
            Calc::new(move || {
                state.with(|state| match state {
                    None => *previous.borrow_mut() = None,
                    Some(state) => {
                        if let Some(compiled) = state.compiled() {
                            *previous.borrow_mut() = Some(compiled.to_string());
                        }
                    }
                });
                previous.borrow().clone()
            })
        };

        DynamicValue(Rc::new_cyclic(|this: &Weak<DynamicInner>| {
            let weak = this.clone();
            let evaluated = Calc::new(move || match weak.upgrade() {
                Some(inner) => inner.evaluate(),
                None => Ok(Evaluated::host(HostValue::Undefined)),
            });
            DynamicInner {
                id: next_cell_id(),
                name: name.into(),
                code: code.into(),
                sandbox: sandbox.downgrade(),
                queue: queue.clone(),
                namespace: namespace.clone(),
                mounted: Field::new(None),
                is_mounted: Cell::new(false),
                override_value: Field::new(None),
                compiled_state,
                compiled_code,
                generation: Cell::new(0),
                evaluated,
                last_good: RefCell::new(None),
                binding: BindingSlot::default(),
                sink: GarbageDisposal::new(),
                subscriptions: RefCell::new(Vec::new()),
                disposed: Cell::new(false),
            }
        }))
    }

    /// Name of the global function the compiled wrapper defines
    pub fn id(&self) -> &str {
        &self.0.id
    }

    pub fn name(&self) -> Option<String> {
        untracked(|| self.0.name.get()).ok().flatten()
    }

    pub fn code(&self) -> Option<String> {
        untracked(|| self.0.code.get()).ok().flatten()
    }

    /// Name currently bound in the scope, if any
    pub fn bound_name(&self) -> Option<String> {
        self.0.binding.name()
    }

    pub fn compiled_state(&self) -> Field<Option<CompiledState>> {
        self.0.compiled_state.clone()
    }

    pub fn is_mounted(&self) -> bool {
        self.0.is_mounted.get()
    }

    pub fn is_disposed(&self) -> bool {
        self.0.disposed.get()
    }

    /// Current result, recording a dependency when read inside a calc
    pub fn result_value(&self) -> CellResult {
        self.0.result()
    }

    /// A dup of the VM value behind the current result
    pub fn result_handle(&self) -> Result<Handle, EngineError> {
        let sandbox = self.0.sandbox()?;
        let evaluated = self.0.evaluated.get()??;
        evaluated.to_vm(&sandbox, &self.0.sink)
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Attach to `host` (or to the root scope when `None`): bind the name,
    /// start compiling, and keep the result evaluated as inputs change
    pub fn mount(&self, host: Option<&Element>) -> Result<(), EngineError> {
        if self.0.disposed.get() {
            return Err(SandboxError::Disposed.into());
        }
        if self.0.is_mounted.replace(true) {
            self.unmount();
            self.0.is_mounted.set(true);
        }
        self.0.mounted.set(host.cloned());

        let weak = Rc::downgrade(&self.0);
        let on_name = self.0.name.subscribe(move || {
            if let Some(inner) = weak.upgrade() {
                if let Err(err) = inner.update_binding() {
                    warn!(target: "xcell::cell", cell = %inner.id, "rebinding failed: {}", err);
                }
            }
        });
        let weak = Rc::downgrade(&self.0);
        let on_code = self.0.code.subscribe(move || {
            if let Some(inner) = weak.upgrade() {
                let code = untracked(|| inner.code.get()).ok().flatten();
                inner.compile(code);
            }
        });
        let keep_fresh = self.0.evaluated.subscribe(|| {});
        self.0
            .subscriptions
            .borrow_mut()
            .extend([on_name, on_code, keep_fresh]);

        self.0.update_binding()?;
        let code = untracked(|| self.0.code.get()).ok().flatten();
        self.0.compile(code);
        debug!(target: "xcell::cell", cell = %self.0.id, name = ?self.bound_name(), "mounted");
        Ok(())
    }

    /// Detach: stop reacting and remove the binding. The last value is kept.
    pub fn unmount(&self) {
        if !self.0.is_mounted.replace(false) {
            return;
        }
        for subscription in self.0.subscriptions.borrow_mut().drain(..) {
            subscription.unsubscribe();
        }
        self.0.binding.clear();
        self.0.mounted.set(None);
        debug!(target: "xcell::cell", cell = %self.0.id, "unmounted");
    }

    /// Replace the computed result with `value` until cleared
    pub fn set_override(&self, value: HostValue) {
        self.0.override_value.set(Some(value));
    }

    pub fn clear_override(&self) {
        self.0.override_value.set(None);
    }

    pub fn has_override(&self) -> bool {
        self.0.override_value.with_untracked(Option::is_some)
    }

    /// Tear the cell down: unbind, forget compiled state, release VM values
    /// and delete the wrapper global. Later calls are no-ops.
    pub fn dispose(&self) {
        if self.0.disposed.replace(true) {
            return;
        }
        self.unmount();
        self.0.generation.set(self.0.generation.get() + 1);
        self.0.compiled_state.set(None);
        self.0.last_good.borrow_mut().take();

        // Recompute once while disposed so the memoized value lets go of its
        // handles.
        self.0.evaluated.invalidate();
        let _ = untracked(|| self.0.evaluated.get());
        self.0.sink.dispose();

        if let Some(sandbox) = self.0.sandbox.upgrade() {
            // Declared functions are non-configurable globals; overwrite what
            // cannot be deleted.
            let deleted = sandbox.global().and_then(|global| {
                if !sandbox.delete_prop(&global, self.0.id.as_str())? {
                    let undefined = sandbox.undefined()?;
                    sandbox.set_prop(&global, self.0.id.as_str(), &undefined)?;
                }
                Ok(())
            });
            if let Err(err) = deleted {
                debug!(target: "xcell::cell", cell = %self.0.id, "wrapper cleanup skipped: {}", err);
            }
        }
        debug!(target: "xcell::cell", cell = %self.0.id, "disposed");
    }

    // ------------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------------

    /// Snapshot of the cell's state for debugging output
    pub fn diagnostics(&self) -> CellDiagnostics {
        let (value, error) = match untracked(|| self.result_value()) {
            Ok(value) => (value.to_json(), None),
            Err(err) => (Json::Null, Some(err.to_string())),
        };
        CellDiagnostics {
            id: self.0.id.clone(),
            name: self.name(),
            code: self.code(),
            compiled_state: self.0.compiled_state.get_untracked(),
            overridden: self.has_override(),
            value,
            error,
        }
    }
}

impl fmt::Debug for DynamicValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicValue")
            .field("id", &self.0.id)
            .field("name", &self.name())
            .field("mounted", &self.is_mounted())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl DynamicInner {
    fn sandbox(&self) -> Result<Sandbox, SandboxError> {
        self.sandbox.upgrade().ok_or(SandboxError::Disposed)
    }

    fn scope(&self) -> Scope {
        match self.mounted.get() {
            Some(element) => find_scope(&element, &self.namespace),
            None => self.namespace.root().clone(),
        }
    }

    fn result(&self) -> CellResult {
        let evaluated = self.evaluated.get()??;
        Ok(evaluated.value)
    }

    fn fallback(&self) -> Evaluated {
        self.last_good
            .borrow()
            .clone()
            .unwrap_or_else(|| Evaluated::host(HostValue::Undefined))
    }

    /// Body of the `evaluated` calc
    fn evaluate(&self) -> Result<Evaluated, EngineError> {
        if self.disposed.get() {
            return Ok(Evaluated::host(HostValue::Undefined));
        }
        if let Some(value) = self.override_value.get() {
            return Ok(Evaluated::host(value));
        }
        self.namespace.version();
        let scope = self.scope();
        let Some(compiled) = self.compiled_code.get()? else {
            return Ok(self.fallback());
        };

        let sandbox = self.sandbox()?;
        sandbox.eval(&compiled)?.release();
        let global = sandbox.global()?;
        let function = sandbox.get_prop(&global, self.id.as_str())?;
        if !sandbox.is_function(&function)? {
            warn!(target: "xcell::cell", cell = %self.id, "compiled wrapper did not define a function; keeping the previous value");
            return Ok(self.fallback());
        }

        let result = sandbox.call(&function, scope.mirror(), &[])?;
        let sink = GarbageDisposal::new();
        let value = vm_to_host(&sandbox, &result, &sink)?;
        let evaluated = Evaluated {
            value,
            handle: Some(Rc::new(result)),
            _sink: Some(sink),
        };
        *self.last_good.borrow_mut() = Some(evaluated.clone());
        Ok(evaluated)
    }

    /// Submit `code` for compilation under a fresh generation
    fn compile(self: &Rc<Self>, code: Option<String>) {
        let generation = self.generation.get() + 1;
        self.generation.set(generation);

        let Some(source) = code else {
            self.compiled_state.set(None);
            return;
        };
        self.compiled_state.set(Some(CompiledState::Compiling { source: source.clone() }));

        let weak = Rc::downgrade(self);
        self.queue.submit(wrap_cell(&self.id, &source), move |result| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.disposed.get() || inner.generation.get() != generation {
                debug!(target: "xcell::cell", cell = %inner.id, generation, "stale compile result dropped");
                return;
            }
            if let Err(err) = &result {
                warn!(target: "xcell::cell", cell = %inner.id, "compile failed: {}", err);
            }
            inner.compiled_state.set(Some(CompiledState::settled(source, result)));
        });
    }

    /// Bind the current name in the current scope, replacing any old binding
    fn update_binding(self: &Rc<Self>) -> Result<(), ScopeError> {
        let name = untracked(|| self.name.get()).ok().flatten();
        let scope = untracked(|| self.scope());
        let target = match &name {
            Some(name) if self.is_mounted.get() => Some((&scope, name.as_str())),
            _ => None,
        };
        self.binding.rebind(target, || self.accessor())
    }

    fn accessor(self: &Rc<Self>) -> Accessor {
        let read = Rc::downgrade(self);
        let read_handle = Rc::downgrade(self);
        let write = Rc::downgrade(self);
        Accessor::new(move || match read.upgrade() {
            Some(inner) => inner.result(),
            None => Ok(HostValue::Undefined),
        })
        .with_handle_getter(move |sandbox: &Sandbox| -> Result<Handle, EngineError> {
            match read_handle.upgrade() {
                Some(inner) => {
                    let evaluated = inner.evaluated.get()??;
                    evaluated.to_vm(sandbox, &inner.sink)
                }
                None => Ok(sandbox.undefined()?),
            }
        })
        .with_setter(move |value: HostValue| -> Result<(), EngineError> {
            if let Some(inner) = write.upgrade() {
                inner.override_value.set(Some(value));
            }
            Ok(())
        })
    }
}

/// Debug view of a cell
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellDiagnostics {
    pub id: String,
    pub name: Option<String>,
    pub code: Option<String>,
    pub compiled_state: Option<CompiledState>,
    pub overridden: bool,
    /// JSON rendering of the current value (`null` on error)
    pub value: Json,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
