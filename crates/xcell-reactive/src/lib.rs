//! Reactive substrate for xcell.
//!
//! Change-tracking primitives the engine builds its cells on:
//!
//! - [`Field`]: a shared, version-tracked mutable value.
//! - [`Calc`]: a lazily-evaluated, memoized value derived from whatever
//!   fields and calcs its closure reads.
//! - [`Dyn`]: "either a plain value or a reactive one", so callers can hand a
//!   constant or a live source to the same API.
//! - [`Subscription`]: RAII guard that unsubscribes on drop.
//! - [`flush`] / [`batch`]: deliver deferred subscriber notifications.
//!
//! # Architecture
//!
//! All types are single-threaded (`Rc<RefCell<..>>`). Dependencies are
//! discovered at runtime: while a `Calc` recomputes, every `get()` on a field
//! or calc is recorded in a thread-local tracking frame, and after the
//! closure returns the calc rewires itself to exactly that set of sources.
//! Sources keep `Weak` links to their dependents and are kept alive by them.
//!
//! Invalidation is synchronous (a `set` marks every transitive dependent
//! dirty immediately), recomputation is lazy (`Calc::get` is always fresh),
//! and subscriber callbacks are deferred until [`flush`].
//!
//! # Invariants
//!
//! 1. `Calc::get()` never returns a stale value.
//! 2. A calc reading itself, directly or through other calcs, yields
//!    [`ReactiveError::Cycle`] instead of recursing.
//! 3. Subscribers of one node run in registration order.
//! 4. Dropping a [`Subscription`] removes the callback before the next flush.
//! 5. Within [`batch`], values update immediately but notifications wait
//!    until the outermost batch exits.

pub mod calc;
pub mod dynamic;
pub mod error;
pub mod field;
mod graph;
pub mod subscription;

pub use calc::Calc;
pub use dynamic::Dyn;
pub use error::ReactiveError;
pub use field::Field;
pub use graph::{batch, flush, has_pending, untracked};
pub use subscription::Subscription;
