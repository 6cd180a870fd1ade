//! Host-fed cells
//!
//! A [`DynamicField`] publishes a value the host owns (an input's current
//! text, a timer tick) under a reactive name, using the same scope rules as
//! [`DynamicValue`](crate::DynamicValue). VM code reads it like any other
//! cell; assignments from the VM are rejected.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use tracing::{debug, warn};
use xcell_reactive::{untracked, Calc, Dyn, Subscription};

use crate::bridge::HostValue;
use crate::dynamic_value::BindingSlot;
use crate::element::Element;
use crate::error::{EngineError, ScopeError};
use crate::scope::{find_scope, Accessor, Namespace};

struct FieldInner {
    name: Dyn<Option<String>>,
    namespace: Namespace,
    host: Option<Element>,
    evaluated: Calc<Result<HostValue, EngineError>>,
    binding: BindingSlot,
    subscription: Cell<Option<Subscription>>,
}

/// A named binding to a host-supplied reactive value
#[derive(Clone)]
pub struct DynamicField(Rc<FieldInner>);

impl DynamicField {
    /// Bind `value` under `name` in the scope of `host` (root when `None`)
    pub fn new(
        namespace: &Namespace,
        name: impl Into<Dyn<Option<String>>>,
        value: impl Into<Dyn<Option<HostValue>>>,
        host: Option<&Element>,
    ) -> Result<DynamicField, ScopeError> {
        let value: Dyn<Option<HostValue>> = value.into();
        let evaluated = Calc::new(move || -> Result<HostValue, EngineError> {
            Ok(value.get()?.unwrap_or(HostValue::Undefined))
        });

        let field = DynamicField(Rc::new(FieldInner {
            name: name.into(),
            namespace: namespace.clone(),
            host: host.cloned(),
            evaluated,
            binding: BindingSlot::default(),
            subscription: Cell::new(None),
        }));

        let weak = Rc::downgrade(&field.0);
        let subscription = field.0.name.subscribe(move || {
            if let Some(inner) = weak.upgrade() {
                if let Err(err) = inner.update_binding() {
                    warn!(target: "xcell::cell", "field rebinding failed: {}", err);
                }
            }
        });
        field.0.subscription.set(Some(subscription));
        field.0.update_binding()?;
        Ok(field)
    }

    /// Current value, recording a dependency
    pub fn value(&self) -> Result<HostValue, EngineError> {
        self.0.evaluated.get()?
    }

    pub fn bound_name(&self) -> Option<String> {
        self.0.binding.name()
    }

    /// Stop following the name and remove the binding
    pub fn dispose(&self) {
        if let Some(subscription) = self.0.subscription.take() {
            subscription.unsubscribe();
        }
        self.0.binding.clear();
    }
}

impl FieldInner {
    fn update_binding(self: &Rc<Self>) -> Result<(), ScopeError> {
        let name = untracked(|| self.name.get()).ok().flatten();
        let scope = match &self.host {
            Some(host) => find_scope(host, &self.namespace),
            None => self.namespace.root().clone(),
        };
        let weak = Rc::downgrade(self);
        let result = self.binding.rebind(name.as_deref().map(|name| (&scope, name)), move || {
            Accessor::new(move || match weak.upgrade() {
                Some(inner) => inner.evaluated.get()?,
                None => Ok(HostValue::Undefined),
            })
        });
        debug!(target: "xcell::cell", name = ?self.binding.name(), "field bound");
        result
    }
}

impl fmt::Debug for DynamicField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicField")
            .field("name", &self.bound_name())
            .finish()
    }
}
