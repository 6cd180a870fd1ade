//! Resource tracking for interpreter-side objects
//!
//! Conversions across the boundary create VM objects whose lifetime is tied
//! to whoever asked for the conversion (function wrappers, element proxies,
//! retained calc functions). They are handed to a [`GarbageDisposal`] sink,
//! and disposing the sink releases them all.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::trace;

use crate::sandbox::{Handle, PropertyRevoker, SimpleProxy};
use crate::scope::Unbind;

/// Something that can be released exactly once
pub trait Disposable {
    /// Release the resource
    fn dispose(self: Box<Self>);
}

impl Disposable for Handle {
    fn dispose(self: Box<Self>) {
        self.release();
    }
}

/// Shared handles are released when the last owner lets go; the sink drops
/// its share, which invalidates `Weak` references held by function wrappers.
impl Disposable for Rc<Handle> {
    fn dispose(self: Box<Self>) {
        drop(self);
    }
}

impl Disposable for SimpleProxy {
    fn dispose(self: Box<Self>) {
        if let Err(err) = self.revoke() {
            trace!(target: "xcell::disposal", "proxy revoke skipped: {}", err);
        }
    }
}

impl Disposable for PropertyRevoker {
    fn dispose(self: Box<Self>) {
        let name = self.name().to_string();
        if let Err(err) = self.revoke() {
            trace!(target: "xcell::disposal", property = %name, "property removal skipped: {}", err);
        }
    }
}

impl Disposable for Unbind {
    fn dispose(self: Box<Self>) {
        let _ = self.unbind();
    }
}

/// Arbitrary cleanup closure
pub struct OnDispose(Box<dyn FnOnce()>);

impl OnDispose {
    pub fn new(f: impl FnOnce() + 'static) -> Self {
        Self(Box::new(f))
    }
}

impl Disposable for OnDispose {
    fn dispose(self: Box<Self>) {
        (self.0)()
    }
}

struct DisposalInner {
    items: RefCell<Vec<Box<dyn Disposable>>>,
}

impl DisposalInner {
    fn dispose_all(&self) {
        // Disposing may manage new items (or dispose re-entrantly), so drain
        // until the list stays empty.
        loop {
            let items = std::mem::take(&mut *self.items.borrow_mut());
            if items.is_empty() {
                break;
            }
            for item in items {
                item.dispose();
            }
        }
    }
}

impl Drop for DisposalInner {
    fn drop(&mut self) {
        self.dispose_all();
    }
}

/// A sink of [`Disposable`]s, disposed together.
///
/// Cheap to clone; clones share the same list. [`GarbageDisposal::dispose`]
/// may be called any number of times and empties the list each time; dropping
/// the last clone disposes whatever is left.
#[derive(Clone)]
pub struct GarbageDisposal {
    inner: Rc<DisposalInner>,
}

impl Default for GarbageDisposal {
    fn default() -> Self {
        Self::new()
    }
}

impl GarbageDisposal {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(DisposalInner {
                items: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Record `item` for disposal
    pub fn manage(&self, item: impl Disposable + 'static) {
        self.inner.items.borrow_mut().push(Box::new(item));
    }

    /// Number of items waiting for disposal
    pub fn len(&self) -> usize {
        self.inner.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dispose everything recorded so far, in insertion order
    pub fn dispose(&self) {
        self.inner.dispose_all();
    }

    /// Non-owning reference, for closures that end up stored inside the VM
    pub fn downgrade(&self) -> WeakDisposal {
        WeakDisposal(Rc::downgrade(&self.inner))
    }
}

/// Non-owning reference to a [`GarbageDisposal`]
#[derive(Clone)]
pub struct WeakDisposal(Weak<DisposalInner>);

impl WeakDisposal {
    /// The sink if it is still alive, otherwise a fresh one that disposes
    /// its items as soon as the caller drops it
    pub fn upgrade_or_transient(&self) -> GarbageDisposal {
        match self.0.upgrade() {
            Some(inner) => GarbageDisposal { inner },
            None => GarbageDisposal::new(),
        }
    }
}

impl fmt::Debug for GarbageDisposal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GarbageDisposal")
            .field("items", &self.len())
            .finish()
    }
}
