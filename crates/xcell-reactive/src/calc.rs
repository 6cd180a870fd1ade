//! Lazily-evaluated derived values

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::error::ReactiveError;
use crate::graph::{self, Node, Notify, Observer, Source};
use crate::subscription::Subscription;

struct CalcInner<T> {
    node: Node,
    value: RefCell<Option<T>>,
    dirty: Cell<bool>,
    computing: Cell<bool>,
    compute: Box<dyn Fn() -> T>,
    sources: RefCell<Vec<Rc<dyn Source>>>,
    this: Weak<CalcInner<T>>,
}

impl<T: 'static> Source for CalcInner<T> {
    fn node(&self) -> &Node {
        &self.node
    }
}

impl<T: 'static> Observer for CalcInner<T> {
    fn invalidate(&self) {
        if self.dirty.get() {
            return;
        }
        self.dirty.set(true);
        self.node.invalidate_dependents();
        if self.node.has_subscribers() {
            if let Some(this) = self.this.upgrade() {
                graph::enqueue(this as Rc<dyn Notify>);
            }
        }
    }
}

impl<T: 'static> Notify for CalcInner<T> {
    fn notify(&self) {
        // Subscribers expect to observe the new value, and recomputing also
        // re-arms invalidation for the next change.
        let _ = self.refresh();
        self.node.run_subscribers();
    }
}

struct ComputingGuard<'a>(&'a Cell<bool>);

impl Drop for ComputingGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl<T: 'static> CalcInner<T> {
    fn refresh(&self) -> Result<(), ReactiveError> {
        if self.computing.get() {
            return Err(ReactiveError::Cycle(self.node.id()));
        }
        if !self.dirty.get() && self.value.borrow().is_some() {
            return Ok(());
        }

        self.computing.set(true);
        self.dirty.set(false);
        let (value, mut sources) = {
            let _guard = ComputingGuard(&self.computing);
            graph::collect(|| (self.compute)())
        };

        let id = self.node.id();
        sources.retain(|source| source.node().id() != id);
        let previous_sources = std::mem::replace(&mut *self.sources.borrow_mut(), sources);
        for source in &previous_sources {
            source.node().remove_dependent(id);
        }
        for source in self.sources.borrow().iter() {
            source
                .node()
                .add_dependent(id, self.this.clone() as Weak<dyn Observer>);
        }

        let previous = self.value.borrow_mut().replace(value);
        drop(previous);
        Ok(())
    }
}

/// A memoized value derived from other reactive values.
///
/// The closure runs on first [`Calc::get`] and again on the first read after
/// any field or calc it read has changed. It must be `Fn`: it may run many
/// times, and reading a calc from inside its own closure is reported as
/// [`ReactiveError::Cycle`].
pub struct Calc<T: 'static>(Rc<CalcInner<T>>);

impl<T: 'static> Clone for Calc<T> {
    fn clone(&self) -> Self {
        Calc(Rc::clone(&self.0))
    }
}

impl<T: 'static> fmt::Debug for Calc<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Calc")
            .field("id", &self.0.node.id())
            .field("dirty", &self.0.dirty.get())
            .field("sources", &self.0.sources.borrow().len())
            .finish()
    }
}

impl<T: 'static> Calc<T> {
    /// Create a calc; nothing runs until the first read
    pub fn new(compute: impl Fn() -> T + 'static) -> Self {
        Calc(Rc::new_cyclic(|this| CalcInner {
            node: Node::new(),
            value: RefCell::new(None),
            dirty: Cell::new(true),
            computing: Cell::new(false),
            compute: Box::new(compute),
            sources: RefCell::new(Vec::new()),
            this: this.clone(),
        }))
    }

    /// Read the current value through `f`, recomputing first if needed
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, ReactiveError> {
        // A reader that hit a cycle still depends on this calc, so it
        // recomputes once the cycle is broken.
        let refreshed = self.0.refresh();
        graph::track(Rc::clone(&self.0) as Rc<dyn Source>);
        refreshed?;
        let value = self.0.value.borrow();
        match value.as_ref() {
            Some(value) => Ok(f(value)),
            // refresh() always leaves a value behind unless it failed
            None => Err(ReactiveError::Cycle(self.0.node.id())),
        }
    }

    /// Whether the next read will recompute
    pub fn is_dirty(&self) -> bool {
        self.0.dirty.get() || self.0.value.borrow().is_none()
    }

    /// Mark the calc stale so the next read recomputes
    pub fn invalidate(&self) {
        self.0.invalidate();
    }

    /// Stable identity within this thread's graph
    pub fn id(&self) -> u64 {
        self.0.node.id()
    }

    /// Register `callback` to run on flush after the value may have changed.
    ///
    /// The calc is evaluated once up front so that it is wired to its
    /// sources; a cycle at that point is ignored and reported on read.
    pub fn subscribe(&self, callback: impl Fn() + 'static) -> Subscription {
        let _ = graph::untracked(|| self.0.refresh());
        let id = self.0.node.add_subscriber(Rc::new(callback));
        Subscription::new(Rc::downgrade(&self.0) as Weak<dyn Source>, id)
    }

    /// Whether two handles refer to the same calc
    pub fn ptr_eq(&self, other: &Calc<T>) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl<T: Clone + 'static> Calc<T> {
    /// Read a copy of the current value
    pub fn get(&self) -> Result<T, ReactiveError> {
        self.with(T::clone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Field;

    #[test]
    fn test_calc_is_lazy_and_memoized() {
        let runs = Rc::new(Cell::new(0));
        let source = Field::new(2);
        let calc = {
            let runs = Rc::clone(&runs);
            let source = source.clone();
            Calc::new(move || {
                runs.set(runs.get() + 1);
                source.get() * 10
            })
        };
        assert_eq!(runs.get(), 0);
        assert_eq!(calc.get().unwrap(), 20);
        assert_eq!(calc.get().unwrap(), 20);
        assert_eq!(runs.get(), 1);

        source.set(3);
        assert!(calc.is_dirty());
        assert_eq!(calc.get().unwrap(), 30);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn test_dependencies_are_rewired_on_recompute() {
        let use_a = Field::new(true);
        let a = Field::new(1);
        let b = Field::new(100);
        let runs = Rc::new(Cell::new(0));
        let calc = {
            let (use_a, a, b, runs) = (use_a.clone(), a.clone(), b.clone(), Rc::clone(&runs));
            Calc::new(move || {
                runs.set(runs.get() + 1);
                if use_a.get() { a.get() } else { b.get() }
            })
        };
        assert_eq!(calc.get().unwrap(), 1);
        use_a.set(false);
        assert_eq!(calc.get().unwrap(), 100);

        // `a` is no longer a dependency
        a.set(2);
        assert!(!calc.is_dirty());
        assert_eq!(calc.get().unwrap(), 100);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let slot: Rc<RefCell<Option<Calc<Result<i32, ReactiveError>>>>> = Rc::new(RefCell::new(None));
        let calc = {
            let slot = Rc::clone(&slot);
            Calc::new(move || -> Result<i32, ReactiveError> {
                let inner = slot.borrow().clone();
                match inner {
                    Some(me) => me.get()?.map(|v| v + 1),
                    None => Ok(0),
                }
            })
        };
        *slot.borrow_mut() = Some(calc.clone());
        let result = calc.get().unwrap();
        assert!(matches!(result, Err(ReactiveError::Cycle(_))));
    }

    #[test]
    fn test_cycle_after_first_value_is_detected() {
        let closed = Field::new(false);
        let slot: Rc<RefCell<Option<Calc<Result<i32, ReactiveError>>>>> = Rc::new(RefCell::new(None));
        let calc = {
            let (closed, slot) = (closed.clone(), Rc::clone(&slot));
            Calc::new(move || -> Result<i32, ReactiveError> {
                if !closed.get() {
                    return Ok(1);
                }
                let inner = slot.borrow().clone();
                match inner {
                    Some(me) => me.get()?.map(|v| v + 1),
                    None => Ok(0),
                }
            })
        };
        *slot.borrow_mut() = Some(calc.clone());
        assert_eq!(calc.get().unwrap(), Ok(1));

        closed.set(true);
        assert_eq!(calc.get().unwrap(), Err(ReactiveError::Cycle(calc.id())));

        closed.set(false);
        assert_eq!(calc.get().unwrap(), Ok(1));
    }
}
