//! Minimal host element tree
//!
//! Stands in for the UI layer: elements carry reactive string attributes
//! (the source of cell names and code), host-side properties that the VM can
//! read and write through a proxy, a parent link, and optionally an attached
//! [`Scope`] that descendants resolve names against.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use xcell_reactive::Field;

use crate::bridge::HostValue;
use crate::scope::Scope;

struct ElementInner {
    tag: String,
    attributes: RefCell<IndexMap<String, Field<Option<String>>>>,
    properties: RefCell<IndexMap<String, HostValue>>,
    parent: RefCell<Weak<ElementInner>>,
    children: RefCell<Vec<Element>>,
    scope: RefCell<Option<Scope>>,
}

/// A host element. Cheap to clone; clones are the same element.
#[derive(Clone)]
pub struct Element(Rc<ElementInner>);

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Element(Rc::new(ElementInner {
            tag: tag.into(),
            attributes: RefCell::new(IndexMap::new()),
            properties: RefCell::new(IndexMap::new()),
            parent: RefCell::new(Weak::new()),
            children: RefCell::new(Vec::new()),
            scope: RefCell::new(None),
        }))
    }

    pub fn tag(&self) -> &str {
        &self.0.tag
    }

    /// Whether both values are the same element
    pub fn ptr_eq(&self, other: &Element) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    // ------------------------------------------------------------------------
    // Tree
    // ------------------------------------------------------------------------

    /// Append `child`, detaching it from its previous parent
    pub fn append_child(&self, child: &Element) {
        if let Some(previous) = child.parent() {
            previous.remove_child(child);
        }
        *child.0.parent.borrow_mut() = Rc::downgrade(&self.0);
        self.0.children.borrow_mut().push(child.clone());
    }

    /// Remove `child` if it is a direct child
    pub fn remove_child(&self, child: &Element) -> bool {
        let mut children = self.0.children.borrow_mut();
        let Some(index) = children.iter().position(|c| c.ptr_eq(child)) else {
            return false;
        };
        let removed = children.remove(index);
        drop(children);
        *removed.0.parent.borrow_mut() = Weak::new();
        true
    }

    pub fn parent(&self) -> Option<Element> {
        self.0.parent.borrow().upgrade().map(Element)
    }

    pub fn children(&self) -> Vec<Element> {
        self.0.children.borrow().clone()
    }

    /// This element followed by its ancestors, nearest first
    pub fn ancestors(&self) -> impl Iterator<Item = Element> {
        std::iter::successors(Some(self.clone()), Element::parent)
    }

    // ------------------------------------------------------------------------
    // Attributes
    // ------------------------------------------------------------------------

    /// Reactive attribute; created (unset) on first request
    pub fn attribute(&self, name: &str) -> Field<Option<String>> {
        self.0
            .attributes
            .borrow_mut()
            .entry(name.to_string())
            .or_insert_with(|| Field::new(None))
            .clone()
    }

    /// Current attribute value, recording a dependency
    pub fn get_attribute(&self, name: &str) -> Option<String> {
        self.attribute(name).get()
    }

    pub fn set_attribute(&self, name: &str, value: impl Into<String>) {
        self.attribute(name).set_if_changed(Some(value.into()));
    }

    pub fn remove_attribute(&self, name: &str) {
        self.attribute(name).set_if_changed(None);
    }

    // ------------------------------------------------------------------------
    // Properties
    // ------------------------------------------------------------------------

    pub fn property(&self, name: &str) -> Option<HostValue> {
        self.0.properties.borrow().get(name).cloned()
    }

    pub fn set_property(&self, name: &str, value: HostValue) {
        // The previous value may own VM resources; drop it after the borrow.
        let previous = self.0.properties.borrow_mut().insert(name.to_string(), value);
        drop(previous);
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.0.properties.borrow().contains_key(name)
    }

    pub fn property_names(&self) -> Vec<String> {
        self.0.properties.borrow().keys().cloned().collect()
    }

    // ------------------------------------------------------------------------
    // Scope
    // ------------------------------------------------------------------------

    /// Make `scope` the scope of this element and its descendants
    pub fn attach_scope(&self, scope: Scope) {
        *self.0.scope.borrow_mut() = Some(scope);
    }

    pub fn detach_scope(&self) -> Option<Scope> {
        self.0.scope.borrow_mut().take()
    }

    /// Scope attached to this element itself
    pub fn scope(&self) -> Option<Scope> {
        self.0.scope.borrow().clone()
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Element")
            .field("tag", &self.0.tag)
            .field("properties", &self.0.properties.borrow().len())
            .field("children", &self.0.children.borrow().len())
            .finish()
    }
}
