//! Shared graph plumbing: node identity, dependency edges, the tracking
//! stack and the deferred notification queue.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use tracing::warn;

/// Identity of a field or calc in the graph
pub(crate) type NodeId = u64;

/// Upper bound on notification rounds in one [`flush`]
const MAX_FLUSH_ROUNDS: usize = 100;

thread_local! {
    static NEXT_ID: Cell<NodeId> = const { Cell::new(1) };
    static TRACKING: RefCell<Vec<Option<Vec<Rc<dyn Source>>>>> = const { RefCell::new(Vec::new()) };
    static PENDING: RefCell<Vec<Rc<dyn Notify>>> = const { RefCell::new(Vec::new()) };
    static BATCH_DEPTH: Cell<usize> = const { Cell::new(0) };
    static FLUSHING: Cell<bool> = const { Cell::new(false) };
}

pub(crate) fn next_id() -> NodeId {
    NEXT_ID.with(|id| {
        let next = id.get();
        id.set(next + 1);
        next
    })
}

// ============================================================================
// Nodes
// ============================================================================

/// Something that reacts when one of its sources changes
pub(crate) trait Observer {
    fn invalidate(&self);
}

/// Something that can be read (and therefore depended upon)
pub(crate) trait Source {
    fn node(&self) -> &Node;
}

/// Something whose subscribers can be notified during [`flush`]
pub(crate) trait Notify: Source {
    fn notify(&self);
}

type Callback = Rc<dyn Fn()>;

/// Bookkeeping common to fields and calcs
pub(crate) struct Node {
    id: NodeId,
    dependents: RefCell<Vec<(NodeId, Weak<dyn Observer>)>>,
    subscribers: RefCell<Vec<(u64, Callback)>>,
    queued: Cell<bool>,
}

impl Node {
    pub(crate) fn new() -> Self {
        Self {
            id: next_id(),
            dependents: RefCell::new(Vec::new()),
            subscribers: RefCell::new(Vec::new()),
            queued: Cell::new(false),
        }
    }

    pub(crate) fn id(&self) -> NodeId {
        self.id
    }

    pub(crate) fn add_dependent(&self, id: NodeId, observer: Weak<dyn Observer>) {
        let mut dependents = self.dependents.borrow_mut();
        if let Some(slot) = dependents.iter_mut().find(|(existing, _)| *existing == id) {
            slot.1 = observer;
        } else {
            dependents.push((id, observer));
        }
    }

    pub(crate) fn remove_dependent(&self, id: NodeId) {
        self.dependents.borrow_mut().retain(|(existing, _)| *existing != id);
    }

    /// Invalidate every live dependent, pruning dead links on the way
    pub(crate) fn invalidate_dependents(&self) {
        let live: Vec<Rc<dyn Observer>> = {
            let mut dependents = self.dependents.borrow_mut();
            dependents.retain(|(_, w)| w.strong_count() > 0);
            dependents.iter().filter_map(|(_, w)| w.upgrade()).collect()
        };
        for observer in live {
            observer.invalidate();
        }
    }

    pub(crate) fn add_subscriber(&self, callback: Callback) -> u64 {
        let id = next_id();
        self.subscribers.borrow_mut().push((id, callback));
        id
    }

    pub(crate) fn remove_subscriber(&self, id: u64) {
        self.subscribers.borrow_mut().retain(|(existing, _)| *existing != id);
    }

    pub(crate) fn has_subscribers(&self) -> bool {
        !self.subscribers.borrow().is_empty()
    }

    /// Run subscriber callbacks without holding the borrow
    pub(crate) fn run_subscribers(&self) {
        let callbacks: Vec<Callback> = self
            .subscribers
            .borrow()
            .iter()
            .map(|(_, cb)| Rc::clone(cb))
            .collect();
        for callback in callbacks {
            callback();
        }
    }

    pub(crate) fn clear_queued(&self) {
        self.queued.set(false);
    }
}

// ============================================================================
// Dependency tracking
// ============================================================================

/// Record `source` as a dependency of the calc currently computing, if any
pub(crate) fn track(source: Rc<dyn Source>) {
    TRACKING.with(|stack| {
        if let Some(Some(frame)) = stack.borrow_mut().last_mut() {
            if !frame.iter().any(|s| s.node().id() == source.node().id()) {
                frame.push(source);
            }
        }
    });
}

struct FrameGuard;

impl Drop for FrameGuard {
    fn drop(&mut self) {
        TRACKING.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Run `f` in a fresh tracking frame and return what it read
pub(crate) fn collect<R>(f: impl FnOnce() -> R) -> (R, Vec<Rc<dyn Source>>) {
    TRACKING.with(|stack| stack.borrow_mut().push(Some(Vec::new())));
    let guard = FrameGuard;
    let value = f();
    let sources = TRACKING.with(|stack| {
        stack
            .borrow_mut()
            .last_mut()
            .and_then(Option::take)
            .unwrap_or_default()
    });
    drop(guard);
    (value, sources)
}

/// Run `f` without recording any reads as dependencies of the enclosing calc.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    TRACKING.with(|stack| stack.borrow_mut().push(None));
    let _guard = FrameGuard;
    f()
}

// ============================================================================
// Deferred notification
// ============================================================================

pub(crate) fn enqueue(item: Rc<dyn Notify>) {
    let node = item.node();
    if node.queued.get() {
        return;
    }
    node.queued.set(true);
    PENDING.with(|pending| pending.borrow_mut().push(item));
}

/// Whether any subscriber notifications are waiting for [`flush`].
pub fn has_pending() -> bool {
    PENDING.with(|pending| !pending.borrow().is_empty())
}

struct FlushGuard;

impl Drop for FlushGuard {
    fn drop(&mut self) {
        FLUSHING.with(|f| f.set(false));
    }
}

/// Deliver pending subscriber notifications until the graph settles.
///
/// Callbacks may set fields, which queues further notifications; those are
/// delivered in later rounds of the same call. Inside a [`batch`] this is a
/// no-op (the outermost batch flushes on exit), and a flush started from a
/// callback returns immediately since the running flush will pick its work up.
pub fn flush() {
    if BATCH_DEPTH.with(Cell::get) > 0 || FLUSHING.with(Cell::get) {
        return;
    }
    FLUSHING.with(|f| f.set(true));
    let _guard = FlushGuard;

    for _ in 0..MAX_FLUSH_ROUNDS {
        let pending = PENDING.with(|pending| std::mem::take(&mut *pending.borrow_mut()));
        if pending.is_empty() {
            return;
        }
        for item in pending {
            item.node().clear_queued();
            item.notify();
        }
    }
    warn!(
        target: "xcell::reactive",
        "flush did not settle after {} rounds; remaining notifications deferred",
        MAX_FLUSH_ROUNDS
    );
}

struct BatchGuard;

impl Drop for BatchGuard {
    fn drop(&mut self) {
        BATCH_DEPTH.with(|d| d.set(d.get() - 1));
    }
}

/// Run `f` with notifications deferred, then flush once.
///
/// Nested batches are allowed; only the outermost one flushes.
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    BATCH_DEPTH.with(|d| d.set(d.get() + 1));
    let value = {
        let _guard = BatchGuard;
        f()
    };
    flush();
    value
}
