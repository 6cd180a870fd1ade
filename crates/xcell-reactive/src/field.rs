//! Mutable reactive values

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::graph::{self, Node, Notify, Source};
use crate::subscription::Subscription;

pub(crate) struct FieldInner<T> {
    node: Node,
    value: RefCell<T>,
    version: Cell<u64>,
}

impl<T> Source for FieldInner<T> {
    fn node(&self) -> &Node {
        &self.node
    }
}

impl<T> Notify for FieldInner<T> {
    fn notify(&self) {
        self.node.run_subscribers();
    }
}

/// A shared, version-tracked mutable value.
///
/// Cloning a `Field` yields another handle to the same value. Reading it with
/// [`Field::get`] inside a [`Calc`](crate::Calc) makes the calc depend on it.
pub struct Field<T: 'static>(Rc<FieldInner<T>>);

impl<T: 'static> Clone for Field<T> {
    fn clone(&self) -> Self {
        Field(Rc::clone(&self.0))
    }
}

impl<T: Default + 'static> Default for Field<T> {
    fn default() -> Self {
        Field::new(T::default())
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for Field<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("value", &self.0.value.borrow())
            .field("version", &self.0.version.get())
            .finish()
    }
}

impl<T: 'static> Field<T> {
    /// Create a field holding `value`
    pub fn new(value: T) -> Self {
        Field(Rc::new(FieldInner {
            node: Node::new(),
            value: RefCell::new(value),
            version: Cell::new(0),
        }))
    }

    /// Read the value through `f`, recording a dependency
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        graph::track(Rc::clone(&self.0) as Rc<dyn Source>);
        f(&self.0.value.borrow())
    }

    /// Read the value through `f` without recording a dependency
    pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.0.value.borrow())
    }

    /// Replace the value and return the previous one.
    ///
    /// Dependents are invalidated immediately; subscribers run on the next
    /// [`flush`](crate::flush).
    pub fn replace(&self, value: T) -> T {
        let previous = std::mem::replace(&mut *self.0.value.borrow_mut(), value);
        self.changed();
        previous
    }

    /// Set a new value (the previous one is dropped after notification)
    pub fn set(&self, value: T) {
        let previous = self.replace(value);
        drop(previous);
    }

    /// Mutate the value in place
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        f(&mut self.0.value.borrow_mut());
        self.changed();
    }

    /// Number of mutations so far
    pub fn version(&self) -> u64 {
        self.0.version.get()
    }

    /// Register `callback` to run on flush after each change
    pub fn subscribe(&self, callback: impl Fn() + 'static) -> Subscription {
        let id = self.0.node.add_subscriber(Rc::new(callback));
        Subscription::new(Rc::downgrade(&self.0) as std::rc::Weak<dyn Source>, id)
    }

    /// Whether two handles refer to the same field
    pub fn ptr_eq(&self, other: &Field<T>) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn changed(&self) {
        self.0.version.set(self.0.version.get() + 1);
        self.0.node.invalidate_dependents();
        if self.0.node.has_subscribers() {
            graph::enqueue(Rc::clone(&self.0) as Rc<dyn Notify>);
        }
    }
}

impl<T: Clone + 'static> Field<T> {
    /// Read a copy of the value, recording a dependency
    pub fn get(&self) -> T {
        self.with(T::clone)
    }

    /// Read a copy of the value without recording a dependency
    pub fn get_untracked(&self) -> T {
        self.with_untracked(T::clone)
    }
}

impl<T: PartialEq + 'static> Field<T> {
    /// Set the value only if it differs; returns whether it changed
    pub fn set_if_changed(&self, value: T) -> bool {
        if *self.0.value.borrow() == value {
            return false;
        }
        self.set(value);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_bumps_version() {
        let field = Field::new(1);
        assert_eq!(field.version(), 0);
        field.set(2);
        field.update(|v| *v += 1);
        assert_eq!(field.get(), 3);
        assert_eq!(field.version(), 2);
    }

    #[test]
    fn test_set_if_changed_skips_equal_values() {
        let field = Field::new("a".to_string());
        assert!(!field.set_if_changed("a".to_string()));
        assert!(field.set_if_changed("b".to_string()));
        assert_eq!(field.version(), 1);
    }

    #[test]
    fn test_clones_share_state() {
        let a = Field::new(vec![1]);
        let b = a.clone();
        b.update(|v| v.push(2));
        assert_eq!(a.get(), vec![1, 2]);
        assert!(a.ptr_eq(&b));
    }
}
