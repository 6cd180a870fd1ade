//! Error types for the engine
//!
//! One enum per layer; [`EngineError`] wraps them all for callers that do not
//! care which layer failed. Everything here is `Clone` because evaluation
//! results (including failures) are memoized in reactive calcs.

use serde::Serialize;
use xcell_reactive::ReactiveError;

/// Result type for sandbox operations
pub type SandboxResult<T> = Result<T, SandboxError>;

/// An exception thrown inside the interpreter, with its parts extracted
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VmException {
    /// `error.name` (or `"Error"` for thrown non-errors)
    pub name: String,
    /// `error.message` (or the stringified thrown value)
    pub message: String,
    /// `error.stack`, when the interpreter recorded one
    pub stack: Option<String>,
}

impl VmException {
    /// Exception with the generic `Error` name
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            name: "Error".to_string(),
            message: message.into(),
            stack: None,
        }
    }

    /// Exception with a specific error class name
    pub fn named(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
        }
    }
}

impl std::fmt::Display for VmException {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

/// Failures of the sandbox runtime itself
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SandboxError {
    /// Code threw (or evaluation failed) inside the interpreter
    #[error("Uncaught {0}")]
    Exception(VmException),

    /// Evaluation exceeded its time budget
    #[error("Evaluation interrupted after exceeding {budget_ms}ms")]
    Interrupted {
        /// Configured budget in milliseconds
        budget_ms: u64,
    },

    /// The interpreter reported an internal failure (allocation, limits, ...)
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// The sandbox was disposed
    #[error("Sandbox has been disposed")]
    Disposed,

    /// The sandbox is busy and cannot be torn down right now
    #[error("Sandbox is in use and cannot be disposed from inside an evaluation")]
    Busy,

    /// Handle was already released
    #[error("Handle #{0} has been released")]
    Released(u64),

    /// Handle belongs to a different sandbox
    #[error("Handle #{0} belongs to another sandbox")]
    ForeignHandle(u64),

    /// Value has the wrong shape for the requested operation
    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch {
        /// Expected kind
        expected: String,
        /// Actual kind
        got: String,
    },

    /// Handles were still alive at disposal
    #[error("{0} handle(s) were still alive when the sandbox was disposed")]
    LeakedHandles(usize),
}

impl SandboxError {
    /// Convert into the exception a host callback should throw into the VM
    pub fn into_exception(self) -> VmException {
        match self {
            SandboxError::Exception(exception) => exception,
            SandboxError::Interrupted { .. } => VmException::named("InternalError", "interrupted"),
            other => VmException::new(other.to_string()),
        }
    }
}

/// Failures marshalling values across the host/VM boundary
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BridgeError {
    /// Value kind has no counterpart on the other side
    #[error("Unsupported value kind: {kind}")]
    Unsupported {
        /// Kind name (e.g. `symbol`)
        kind: String,
    },

    /// A function wrapper outlived the handle it calls
    #[error("Function has been released")]
    Released,

    /// Value nests deeper than the marshalling limit (usually a cycle)
    #[error("Value nests deeper than {0} levels")]
    TooDeep(usize),

    /// Underlying sandbox failure
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    /// Reading a computed value failed
    #[error(transparent)]
    Reactive(#[from] ReactiveError),

    /// A host function failed
    #[error("Host function failed: {0}")]
    Host(String),
}

impl BridgeError {
    /// Convert into the exception a host callback should throw into the VM
    pub fn into_exception(self) -> VmException {
        match self {
            BridgeError::Sandbox(err) => err.into_exception(),
            other => VmException::new(other.to_string()),
        }
    }
}

/// Failures of the compile service
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    /// Source could not be transformed
    #[error("Syntax error at offset {offset}: {message}")]
    Syntax {
        /// What went wrong
        message: String,
        /// Byte offset into the submitted source
        offset: usize,
    },

    /// The queue was dropped before the job settled
    #[error("Compilation was cancelled")]
    Cancelled,

    /// The transform task failed
    #[error("Compiler failure: {0}")]
    Internal(String),
}

/// Failures of lexical scope operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScopeError {
    /// Name is already bound in this scope
    #[error("Duplicate binding '{0}' in scope")]
    DuplicateBinding(String),

    /// Binding was already removed
    #[error("Binding '{0}' was already removed")]
    AlreadyUnbound(String),

    /// Assignment to a binding that has no setter
    #[error("Binding '{0}' is read-only")]
    ReadOnly(String),

    /// Underlying sandbox failure
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

/// Umbrella error for engine operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    /// Sandbox failure
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    /// Bridge failure
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    /// Compile failure
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// Scope failure
    #[error(transparent)]
    Scope(#[from] ScopeError),

    /// Reactive graph failure (cycles between cells)
    #[error(transparent)]
    Reactive(#[from] ReactiveError),
}

impl EngineError {
    /// Convert into the exception a binding getter should throw into the VM
    pub fn into_exception(self) -> VmException {
        match self {
            EngineError::Sandbox(err) => err.into_exception(),
            EngineError::Bridge(err) => err.into_exception(),
            other => VmException::new(other.to_string()),
        }
    }
}
