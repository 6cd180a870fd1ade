//! RAII subscription guard

use std::rc::Weak;

use crate::graph::Source;

/// Keeps a subscriber callback registered; dropping it unsubscribes.
///
/// A subscription on a source that has already been dropped is inert.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    target: Option<(Weak<dyn Source>, u64)>,
}

impl Subscription {
    pub(crate) fn new(source: Weak<dyn Source>, id: u64) -> Self {
        Self {
            target: Some((source, id)),
        }
    }

    /// A subscription that watches nothing (for constant values)
    pub fn inert() -> Self {
        Self { target: None }
    }

    /// Unsubscribe now
    pub fn unsubscribe(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if let Some((source, id)) = self.target.take() {
            if let Some(source) = source.upgrade() {
                source.node().remove_subscriber(id);
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.target.is_some())
            .finish()
    }
}
