//! Owned references to interpreter values
//!
//! A [`Handle`] names one slot in its sandbox's handle table. The slot keeps
//! the VM value alive; releasing the handle (explicitly or by dropping it)
//! frees the slot. Handles never keep the sandbox itself alive.

use std::fmt;
use std::rc::Weak;

use super::{Sandbox, SandboxInner};
use crate::error::SandboxResult;

/// Owned reference to a value inside a [`Sandbox`].
///
/// Not `Clone`: a second owner is created with [`Handle::dup`], which takes a
/// new table slot for the same VM value. Every handle must be released
/// exactly once; `Drop` does that automatically and [`Handle::release`] makes
/// it explicit.
pub struct Handle {
    id: u64,
    owner: Weak<SandboxInner>,
}

impl Handle {
    pub(crate) fn new(id: u64, owner: Weak<SandboxInner>) -> Self {
        Self { id, owner }
    }

    /// Slot id within the owning sandbox
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the handle still refers to a live slot
    pub fn is_alive(&self) -> bool {
        self.owner
            .upgrade()
            .map_or(false, |inner| inner.handles.borrow().contains_key(&self.id))
    }

    /// Create a second owned handle to the same VM value
    pub fn dup(&self) -> SandboxResult<Handle> {
        self.sandbox()?.dup(self)
    }

    /// Whether both handles name the same VM value (`===`). Handles from
    /// different sandboxes never do.
    pub fn same_value(&self, other: &Handle) -> SandboxResult<bool> {
        if !std::ptr::eq(self.owner.as_ptr(), other.owner.as_ptr()) {
            return Ok(false);
        }
        self.sandbox()?.eq(self, other)
    }

    /// Release the handle now
    pub fn release(self) {
        drop(self);
    }

    pub(crate) fn belongs_to(&self, inner: &std::rc::Rc<SandboxInner>) -> bool {
        std::ptr::eq(self.owner.as_ptr(), std::rc::Rc::as_ptr(inner))
    }

    fn sandbox(&self) -> SandboxResult<Sandbox> {
        self.owner
            .upgrade()
            .map(Sandbox::from_inner)
            .ok_or(crate::error::SandboxError::Disposed)
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        if let Some(inner) = self.owner.upgrade() {
            inner.release_slot(self.id);
        }
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle(#{})", self.id)
    }
}

/// Property key accepted by sandbox property operations
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropKey {
    /// String property name
    Name(String),
    /// Array index
    Index(u32),
}

impl From<&str> for PropKey {
    fn from(name: &str) -> Self {
        PropKey::Name(name.to_string())
    }
}

impl From<String> for PropKey {
    fn from(name: String) -> Self {
        PropKey::Name(name)
    }
}

impl From<u32> for PropKey {
    fn from(index: u32) -> Self {
        PropKey::Index(index)
    }
}

impl From<usize> for PropKey {
    fn from(index: usize) -> Self {
        PropKey::Index(index as u32)
    }
}

impl fmt::Display for PropKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropKey::Name(name) => f.write_str(name),
            PropKey::Index(index) => write!(f, "{}", index),
        }
    }
}
