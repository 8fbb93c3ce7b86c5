//! Error types for the bridge.
//!
//! Every failure inside the bridge is a [`BridgeError`]. At the runtime
//! boundary it is turned into a [`JsError`](crate::host::JsError): thrown for
//! synchronous calls, delivered as a promise rejection for `load` and `run`.
//!
//! ```text
//! BridgeError
//! ├── Fetch                -- network/IO while retrieving model bytes
//! ├── ModelParse           -- bytes are not a model the engine can read
//! ├── BackendUnavailable   -- requested delegate missing from this build
//! ├── SessionCreation      -- interpreter could not be created
//! ├── TensorAllocation     -- allocate_tensors returned a non-OK status
//! ├── InputCountMismatch   -- wrong number of input buffers
//! ├── TensorCopy           -- size/type mismatch between buffer and tensor
//! ├── EngineInvocation     -- invoke returned a non-OK status
//! ├── TensorIntrospection  -- engine returned no tensor at an index
//! ├── SessionBusy          -- a run is already in flight
//! ├── InvalidArgument      -- bad arguments from the runtime
//! ├── Worker               -- background task could not be started
//! ├── RuntimeClosed        -- the runtime thread has shut down
//! └── Timeout              -- waiting on the runtime timed out
//! ```

use crate::delegate::Delegate;
use crate::engine::EngineStatus;
use thiserror::Error;

/// Which side of the interpreter a tensor lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorRole {
    Input,
    Output,
}

impl TensorRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TensorRole::Input => "input",
            TensorRole::Output => "output",
        }
    }
}

impl std::fmt::Display for TensorRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for all bridge operations.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Failed to fetch model from \"{url}\": {reason}")]
    Fetch { url: String, reason: String },

    #[error("Failed to load model from \"{url}\"!")]
    ModelParse { url: String },

    #[error("{} delegate is not supported in this build!", .delegate.display_name())]
    BackendUnavailable { delegate: Delegate },

    #[error("Failed to create TFLite interpreter from model \"{url}\"!")]
    SessionCreation { url: String },

    #[error("Failed to allocate memory for input/output tensors! Status: {status}")]
    TensorAllocation { status: EngineStatus },

    #[error("Input values have a different size ({actual}) than there are input tensors ({expected})!")]
    InputCountMismatch { expected: usize, actual: usize },

    #[error("Tensor copy failed: {0}")]
    TensorCopy(String),

    #[error("Failed to run TFLite model! Status: {status}")]
    EngineInvocation { status: EngineStatus },

    #[error("Failed to get {role} tensor {index}!")]
    TensorIntrospection { role: TensorRole, index: usize },

    #[error("Session busy: another run is still in flight")]
    SessionBusy,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Failed to start background task: {0}")]
    Worker(String),

    #[error("Runtime thread has shut down")]
    RuntimeClosed,

    #[error("Timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

impl BridgeError {
    pub(crate) fn fetch(url: &str, reason: impl std::fmt::Display) -> Self {
        BridgeError::Fetch {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn tensor_copy(message: impl Into<String>) -> Self {
        BridgeError::TensorCopy(message.into())
    }
}
