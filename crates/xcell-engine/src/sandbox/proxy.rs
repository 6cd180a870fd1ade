//! Host-backed accessors and proxies

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::{CatchExt, Handle, HostCallback, Sandbox, WeakSandbox};
use crate::error::{SandboxError, SandboxResult, VmException};

type Getter = Rc<dyn Fn(&Sandbox) -> Result<Handle, VmException>>;
type Setter = Rc<dyn Fn(&Sandbox, Handle) -> Result<bool, VmException>>;

/// Accessor pair installed by [`Sandbox::define_property`].
///
/// The setter receives an owned handle to the assigned value; returning
/// `Ok(false)` makes the assignment throw `Unable to set <name>` in the VM.
/// Without a setter, assignments are ignored (or throw in strict code).
#[derive(Clone)]
pub struct PropertyAccessor {
    pub get: Getter,
    pub set: Option<Setter>,
}

impl PropertyAccessor {
    /// Read-only accessor
    pub fn getter(get: impl Fn(&Sandbox) -> Result<Handle, VmException> + 'static) -> Self {
        Self {
            get: Rc::new(get),
            set: None,
        }
    }

    /// Add a setter
    pub fn with_setter(mut self, set: impl Fn(&Sandbox, Handle) -> Result<bool, VmException> + 'static) -> Self {
        self.set = Some(Rc::new(set));
        self
    }
}

/// Removes a property installed by [`Sandbox::define_property`].
///
/// Dropping the revoker leaves the property in place; call
/// [`PropertyRevoker::revoke`] (or dispose it through a
/// [`GarbageDisposal`](crate::GarbageDisposal)) to delete it.
pub struct PropertyRevoker {
    sandbox: WeakSandbox,
    object: Handle,
    name: String,
}

impl PropertyRevoker {
    /// Property name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Delete the property; returns whether the VM reported success
    pub fn revoke(self) -> SandboxResult<bool> {
        match self.sandbox.upgrade() {
            Some(sandbox) => sandbox.delete_prop(&self.object, self.name.as_str()),
            None => Err(SandboxError::Disposed),
        }
    }
}

impl fmt::Debug for PropertyRevoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyRevoker")
            .field("object", &self.object)
            .field("name", &self.name)
            .finish()
    }
}

/// Host callbacks behind a [`SimpleProxy`].
///
/// Only string keys reach the callbacks; symbol lookups read as `undefined`.
/// `set` receives an owned handle to the assigned value and returns whether
/// the write was accepted.
#[derive(Clone)]
pub struct SimpleProxyHandler {
    pub get: Rc<dyn Fn(&Sandbox, &str) -> Result<Handle, VmException>>,
    pub set: Rc<dyn Fn(&Sandbox, &str, Handle) -> Result<bool, VmException>>,
    pub has: Rc<dyn Fn(&Sandbox, &str) -> Result<bool, VmException>>,
    pub keys: Rc<dyn Fn(&Sandbox) -> Result<Vec<String>, VmException>>,
}

/// A revocable VM object whose property traps call into the host.
///
/// After [`SimpleProxy::revoke`] every operation on the proxy throws inside
/// the VM. Dropping the proxy revokes it and releases its handles.
pub struct SimpleProxy {
    sandbox: WeakSandbox,
    proxy: Handle,
    revoke: RefCell<Option<Handle>>,
}

impl SimpleProxy {
    /// Handle to the proxy object
    pub fn handle(&self) -> &Handle {
        &self.proxy
    }

    /// Whether the proxy has been revoked
    pub fn is_revoked(&self) -> bool {
        self.revoke.borrow().is_none()
    }

    /// Revoke the proxy; later calls are no-ops
    pub fn revoke(&self) -> SandboxResult<()> {
        let Some(revoke) = self.revoke.borrow_mut().take() else {
            return Ok(());
        };
        let sandbox = self.sandbox.upgrade().ok_or(SandboxError::Disposed)?;
        let undefined = sandbox.undefined()?;
        sandbox.call(&revoke, &undefined, &[])?;
        Ok(())
    }
}

impl Drop for SimpleProxy {
    fn drop(&mut self) {
        // A disposed sandbox has already freed the proxy.
        let _ = self.revoke();
    }
}

impl fmt::Debug for SimpleProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleProxy")
            .field("proxy", &self.proxy)
            .field("revoked", &self.is_revoked())
            .finish()
    }
}

impl Sandbox {
    /// Install an enumerable, configurable accessor `name` on `obj`
    pub fn define_property(&self, obj: &Handle, name: &str, accessor: PropertyAccessor) -> SandboxResult<PropertyRevoker> {
        let PropertyAccessor { get, set } = accessor;

        let getter: HostCallback = Rc::new(move |sandbox: &Sandbox, _args: Vec<Handle>| get(sandbox));
        let getter = self.new_function(&format!("get {}", name), getter)?;

        let setter = match set {
            Some(set) => {
                let callback: HostCallback = Rc::new(move |sandbox: &Sandbox, args: Vec<Handle>| {
                    let value = match args.into_iter().next() {
                        Some(value) => value,
                        None => sandbox.undefined().map_err(SandboxError::into_exception)?,
                    };
                    let accepted = set(sandbox, value)?;
                    sandbox.boolean(accepted).map_err(SandboxError::into_exception)
                });
                self.new_function(&format!("set {}", name), callback)?
            }
            None => self.undefined()?,
        };

        self.with(|ctx| {
            let args = (
                self.load(ctx, obj)?,
                name,
                self.load(ctx, &getter)?,
                self.load(ctx, &setter)?,
            );
            self.invoke(ctx, "defineAccessor", args)?;
            Ok(())
        })?;

        Ok(PropertyRevoker {
            sandbox: self.downgrade(),
            object: obj.dup()?,
            name: name.to_string(),
        })
    }

    /// Create a revocable proxy whose traps call `handler`
    pub fn make_simple_proxy(&self, handler: SimpleProxyHandler) -> SandboxResult<SimpleProxy> {
        let SimpleProxyHandler { get, set, has, keys } = handler;

        let get_trap: HostCallback = Rc::new(move |sandbox: &Sandbox, args: Vec<Handle>| {
            let key = trap_key(sandbox, &args)?;
            get(sandbox, &key)
        });
        let set_trap: HostCallback = Rc::new(move |sandbox: &Sandbox, args: Vec<Handle>| {
            let key = trap_key(sandbox, &args)?;
            let value = match args.into_iter().nth(1) {
                Some(value) => value,
                None => sandbox.undefined().map_err(SandboxError::into_exception)?,
            };
            let accepted = set(sandbox, &key, value)?;
            sandbox.boolean(accepted).map_err(SandboxError::into_exception)
        });
        let has_trap: HostCallback = Rc::new(move |sandbox: &Sandbox, args: Vec<Handle>| {
            let key = trap_key(sandbox, &args)?;
            let present = has(sandbox, &key)?;
            sandbox.boolean(present).map_err(SandboxError::into_exception)
        });
        let keys_trap: HostCallback = Rc::new(move |sandbox: &Sandbox, _args: Vec<Handle>| {
            let names = keys(sandbox)?;
            string_array(sandbox, &names).map_err(SandboxError::into_exception)
        });

        let traps = [
            self.new_function("get", get_trap)?,
            self.new_function("set", set_trap)?,
            self.new_function("has", has_trap)?,
            self.new_function("ownKeys", keys_trap)?,
        ];

        let (proxy, revoke) = self.with(|ctx| {
            let args = (
                self.load(ctx, &traps[0])?,
                self.load(ctx, &traps[1])?,
                self.load(ctx, &traps[2])?,
                self.load(ctx, &traps[3])?,
            );
            let pair = self.invoke(ctx, "simpleProxy", args)?;
            let pair = pair.into_array().ok_or_else(|| SandboxError::TypeMismatch {
                expected: "[proxy, revoke]".to_string(),
                got: "non-array".to_string(),
            })?;
            let proxy = pair.get(0).catch_in(self, ctx)?;
            let revoke = pair.get(1).catch_in(self, ctx)?;
            Ok((self.store(ctx, proxy), self.store(ctx, revoke)))
        })?;

        Ok(SimpleProxy {
            sandbox: self.downgrade(),
            proxy,
            revoke: RefCell::new(Some(revoke)),
        })
    }
}

fn trap_key(sandbox: &Sandbox, args: &[Handle]) -> Result<String, VmException> {
    match args.first() {
        Some(key) => sandbox.as_string(key).map_err(SandboxError::into_exception),
        None => Err(VmException::named("TypeError", "proxy trap called without a key")),
    }
}

fn string_array(sandbox: &Sandbox, items: &[String]) -> SandboxResult<Handle> {
    let array = sandbox.new_array()?;
    for (index, item) in items.iter().enumerate() {
        let value = sandbox.string(item)?;
        sandbox.set_prop(&array, index, &value)?;
    }
    Ok(array)
}
