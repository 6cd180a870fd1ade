//! Lexical scopes
//!
//! A scope maps names to host [`Accessor`]s and mirrors them onto a VM
//! object, which is what `this` refers to when code is evaluated in that
//! scope. The root scope of a [`Namespace`] mirrors onto the VM global
//! object, so binding a name there makes it a global. Child mirrors are
//! created with `Object.create(parent_mirror)`, so `this.name` falls back to
//! enclosing scopes while bare names resolve against globals only.
//!
//! ```text
//! root   (mirror = globalThis)      cool, fun
//!  └── child "stats" (mirror = Object.create(globalThis))   one, two
//!       └── child (mirror = Object.create(stats_mirror))     one
//! ```

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use tracing::debug;
use xcell_reactive::Field;

use crate::bridge::{host_to_vm, vm_to_host, HostValue};
use crate::disposal::GarbageDisposal;
use crate::element::Element;
use crate::error::{EngineError, ScopeError, SandboxError, SandboxResult, VmException};
use crate::sandbox::{Handle, PropertyAccessor, PropertyRevoker, Sandbox, WeakSandbox};

type Getter = Rc<dyn Fn() -> Result<HostValue, EngineError>>;
type Setter = Rc<dyn Fn(HostValue) -> Result<(), EngineError>>;
type HandleGetter = Rc<dyn Fn(&Sandbox) -> Result<Handle, EngineError>>;

/// Host side of a binding
///
/// `get` serves host reads. VM reads use `handle` when present, which lets a
/// binding hand out the same VM object on every read; otherwise the result
/// of `get` is converted.
#[derive(Clone)]
pub struct Accessor {
    pub get: Getter,
    pub set: Option<Setter>,
    pub handle: Option<HandleGetter>,
}

impl Accessor {
    /// Read-only accessor
    pub fn new(get: impl Fn() -> Result<HostValue, EngineError> + 'static) -> Self {
        Self {
            get: Rc::new(get),
            set: None,
            handle: None,
        }
    }

    /// Serve VM reads directly from a handle
    pub fn with_handle_getter(mut self, get: impl Fn(&Sandbox) -> Result<Handle, EngineError> + 'static) -> Self {
        self.handle = Some(Rc::new(get));
        self
    }

    pub fn with_setter(mut self, set: impl Fn(HostValue) -> Result<(), EngineError> + 'static) -> Self {
        self.set = Some(Rc::new(set));
        self
    }

    /// Accessor for a fixed value
    pub fn constant(value: HostValue) -> Self {
        Self::new(move || Ok(value.clone()))
    }

    pub fn read(&self) -> Result<HostValue, EngineError> {
        (self.get)()
    }

    /// Write through the setter; read-only bindings fail with `ReadOnly`
    pub fn write(&self, name: &str, value: HostValue) -> Result<(), EngineError> {
        match &self.set {
            Some(set) => set(value),
            None => Err(ScopeError::ReadOnly(name.to_string()).into()),
        }
    }
}

impl fmt::Debug for Accessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accessor")
            .field("writable", &self.set.is_some())
            .finish()
    }
}

/// VM-side state of one binding
struct Installed {
    revoker: PropertyRevoker,
    sink: GarbageDisposal,
}

struct ScopeInner {
    name: Option<String>,
    parent: Option<Scope>,
    sandbox: WeakSandbox,
    mirror: Handle,
    version: Field<u64>,
    bindings: Field<IndexMap<String, Accessor>>,
    installed: RefCell<IndexMap<String, Installed>>,
    /// Binding of a named child in its parent
    binding: RefCell<Option<Unbind>>,
}

impl Drop for ScopeInner {
    fn drop(&mut self) {
        if let Some(unbind) = self.binding.get_mut().take() {
            let _ = unbind.unbind();
        }
    }
}

/// A node in the scope tree. Cheap to clone; clones share the scope.
#[derive(Clone)]
pub struct Scope(Rc<ScopeInner>);

impl Scope {
    fn create(
        sandbox: &Sandbox,
        name: Option<String>,
        parent: Option<Scope>,
        mirror: Handle,
        version: Field<u64>,
    ) -> Scope {
        Scope(Rc::new(ScopeInner {
            name,
            parent,
            sandbox: sandbox.downgrade(),
            mirror,
            version,
            bindings: Field::new(IndexMap::new()),
            installed: RefCell::new(IndexMap::new()),
            binding: RefCell::new(None),
        }))
    }

    pub fn name(&self) -> Option<&str> {
        self.0.name.as_deref()
    }

    pub fn parent(&self) -> Option<&Scope> {
        self.0.parent.as_ref()
    }

    pub fn is_root(&self) -> bool {
        self.0.parent.is_none()
    }

    /// The VM object evaluation in this scope uses as `this`
    pub fn mirror(&self) -> &Handle {
        &self.0.mirror
    }

    pub fn ptr_eq(&self, other: &Scope) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn sandbox(&self) -> SandboxResult<Sandbox> {
        self.0.sandbox.upgrade().ok_or(SandboxError::Disposed)
    }

    /// Create a child scope. A named child is bound read-only into this
    /// scope under its name, so `this.<name>.<binding>` reaches it.
    pub fn child(&self, name: Option<&str>) -> Result<Scope, ScopeError> {
        let sandbox = self.sandbox()?;
        let mirror = sandbox.object_create(&self.0.mirror)?;
        let child = Scope::create(
            &sandbox,
            name.map(str::to_string),
            Some(self.clone()),
            mirror,
            self.0.version.clone(),
        );

        if let Some(name) = name {
            // The parent's binding must not keep the child alive.
            let weak = Rc::downgrade(&child.0);
            let snapshot = Accessor::new(move || match weak.upgrade() {
                Some(inner) => Scope(inner).snapshot(),
                None => Ok(HostValue::Undefined),
            });
            let mirror_ref = Rc::downgrade(&child.0);
            let readonly = name.to_string();
            let property = PropertyAccessor::getter(move |sandbox: &Sandbox| match mirror_ref.upgrade() {
                Some(inner) => inner.mirror.dup().map_err(SandboxError::into_exception),
                None => sandbox.undefined().map_err(SandboxError::into_exception),
            })
            .with_setter(move |_: &Sandbox, _value: Handle| -> Result<bool, VmException> {
                Err(VmException::named("TypeError", ScopeError::ReadOnly(readonly.clone()).to_string()))
            });
            let unbind = self.install(name, snapshot, property)?;
            *child.0.binding.borrow_mut() = Some(unbind);
        }
        Ok(child)
    }

    /// Bind `name` in this scope
    ///
    /// Reading the name inside the VM calls `accessor.get` and converts the
    /// result with the bridge; writing converts the assigned value and calls
    /// `accessor.set` (assignment throws when there is none).
    pub fn add_binding(&self, name: &str, accessor: Accessor) -> Result<Unbind, ScopeError> {
        self.sandbox()?;
        let sink = GarbageDisposal::new();

        let getter = accessor.get.clone();
        let handle_getter = accessor.handle.clone();
        let weak_sink = sink.downgrade();
        let mut property = PropertyAccessor::getter(move |sandbox: &Sandbox| {
            if let Some(handle_getter) = &handle_getter {
                return handle_getter(sandbox).map_err(EngineError::into_exception);
            }
            let value = getter().map_err(EngineError::into_exception)?;
            let sink = weak_sink.upgrade_or_transient();
            host_to_vm(sandbox, &value, &sink).map_err(|err| err.into_exception())
        });

        let binding = name.to_string();
        let setter = accessor.set.clone();
        let weak_sink = sink.downgrade();
        property = property.with_setter(move |sandbox: &Sandbox, value: Handle| -> Result<bool, VmException> {
            let Some(set) = &setter else {
                return Err(VmException::named("TypeError", ScopeError::ReadOnly(binding.clone()).to_string()));
            };
            let sink = weak_sink.upgrade_or_transient();
            let host = vm_to_host(sandbox, &value, &sink).map_err(|err| err.into_exception())?;
            value.release();
            set(host).map_err(EngineError::into_exception)?;
            Ok(true)
        });

        self.install_with_sink(name, accessor, property, sink)
    }

    fn install(&self, name: &str, accessor: Accessor, property: PropertyAccessor) -> Result<Unbind, ScopeError> {
        self.install_with_sink(name, accessor, property, GarbageDisposal::new())
    }

    fn install_with_sink(
        &self,
        name: &str,
        accessor: Accessor,
        property: PropertyAccessor,
        sink: GarbageDisposal,
    ) -> Result<Unbind, ScopeError> {
        if self.0.installed.borrow().contains_key(name) {
            return Err(ScopeError::DuplicateBinding(name.to_string()));
        }
        let sandbox = self.sandbox()?;
        let revoker = sandbox.define_property(&self.0.mirror, name, property)?;

        self.0
            .installed
            .borrow_mut()
            .insert(name.to_string(), Installed { revoker, sink });
        self.0.bindings.update(|bindings| {
            bindings.insert(name.to_string(), accessor);
        });
        self.bump();
        debug!(target: "xcell::scope", scope = ?self.0.name, binding = name, "bound");

        Ok(Unbind {
            scope: Rc::downgrade(&self.0),
            name: name.to_string(),
            done: Rc::new(Cell::new(false)),
        })
    }

    fn remove(&self, name: &str) -> Result<(), ScopeError> {
        let installed = self.0.installed.borrow_mut().shift_remove(name);
        let Some(Installed { revoker, sink }) = installed else {
            return Err(ScopeError::AlreadyUnbound(name.to_string()));
        };
        let removed = self.0.bindings.with_untracked(|b| b.contains_key(name));
        if removed {
            self.0.bindings.update(|bindings| {
                bindings.shift_remove(name);
            });
        }
        sink.dispose();
        self.bump();
        debug!(target: "xcell::scope", scope = ?self.0.name, binding = name, "unbound");
        match revoker.revoke() {
            Ok(_) | Err(SandboxError::Disposed) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn bump(&self) {
        self.0.version.update(|version| *version += 1);
    }

    /// Bindings visible from this scope, parents first, children shadowing.
    ///
    /// Rebuilt on every call and tracked, so calcs that read it rerun when
    /// any scope on the chain changes.
    pub fn bindings(&self) -> IndexMap<String, Accessor> {
        let mut chain: Vec<&Scope> = std::iter::successors(Some(self), |scope| scope.parent()).collect();
        chain.reverse();
        let mut merged = IndexMap::new();
        for scope in chain {
            scope.0.bindings.with(|own| {
                for (name, accessor) in own {
                    merged.insert(name.clone(), accessor.clone());
                }
            });
        }
        merged
    }

    /// Bindings defined directly on this scope
    pub fn own_bindings(&self) -> IndexMap<String, Accessor> {
        self.0.bindings.get()
    }

    /// Look a name up along the chain
    pub fn lookup(&self, name: &str) -> Option<Accessor> {
        std::iter::successors(Some(self), |scope| scope.parent())
            .find_map(|scope| scope.0.bindings.with(|own| own.get(name).cloned()))
    }

    /// Evaluate `code` as an expression with `this` bound to the mirror
    pub fn eval_expression(&self, code: &str) -> SandboxResult<Handle> {
        let sandbox = self.sandbox()?;
        let function = sandbox.eval(&format!("(function () {{ return (() => {}\n)(); }})", code))?;
        let result = sandbox.call(&function, &self.0.mirror, &[]);
        function.release();
        result
    }

    /// Read every visible binding into a host object
    fn snapshot(&self) -> Result<HostValue, EngineError> {
        let mut object = IndexMap::new();
        for (name, accessor) in self.bindings() {
            object.insert(name, accessor.read()?);
        }
        Ok(HostValue::Object(object))
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("name", &self.0.name)
            .field("root", &self.is_root())
            .field("bindings", &self.0.installed.borrow().keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Removes one binding. Clones share the removal; only the first
/// [`Unbind::unbind`] succeeds.
#[derive(Clone)]
pub struct Unbind {
    scope: Weak<ScopeInner>,
    name: String,
    done: Rc<Cell<bool>>,
}

impl Unbind {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_done(&self) -> bool {
        self.done.get()
    }

    /// Remove the binding; a second call fails with `AlreadyUnbound`
    pub fn unbind(&self) -> Result<(), ScopeError> {
        if self.done.replace(true) {
            return Err(ScopeError::AlreadyUnbound(self.name.clone()));
        }
        match self.scope.upgrade() {
            Some(inner) => Scope(inner).remove(&self.name),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Unbind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unbind")
            .field("name", &self.name)
            .field("done", &self.done.get())
            .finish()
    }
}

/// The engine-wide naming context: the root scope plus a version that
/// changes on every bind and unbind anywhere in the tree
#[derive(Clone)]
pub struct Namespace {
    root: Scope,
    version: Field<u64>,
}

impl Namespace {
    pub fn new(sandbox: &Sandbox) -> SandboxResult<Namespace> {
        let version = Field::new(0);
        let global = sandbox.global()?;
        let root = Scope::create(sandbox, None, None, global, version.clone());
        Ok(Namespace { root, version })
    }

    pub fn root(&self) -> &Scope {
        &self.root
    }

    /// Current version, recording a dependency
    pub fn version(&self) -> u64 {
        self.version.get()
    }

    pub fn version_field(&self) -> &Field<u64> {
        &self.version
    }

    /// Names bound at the root (the cell globals)
    pub fn names(&self) -> Vec<String> {
        self.root.0.bindings.with_untracked(|b| b.keys().cloned().collect())
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Namespace")
            .field("version", &self.version.get_untracked())
            .field("names", &self.names())
            .finish()
    }
}

/// Scope for code attached to `element`: the nearest scope attached to it or
/// an ancestor, falling back to the namespace root
pub fn find_scope(element: &Element, namespace: &Namespace) -> Scope {
    element
        .ancestors()
        .find_map(|ancestor| ancestor.scope())
        .unwrap_or_else(|| namespace.root().clone())
}
