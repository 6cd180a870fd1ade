//! Error types for the reactive graph

/// Errors raised while reading reactive values
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReactiveError {
    /// A calc was read while it was already computing
    #[error("Reactive cycle detected: calc #{0} depends on itself")]
    Cycle(u64),
}
