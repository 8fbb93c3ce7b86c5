//! Inference engine capability.
//!
//! The bridge does not run models itself. It drives an engine through two
//! traits shaped after the TensorFlow Lite C API:
//!
//! - [`InferenceEngine`]: parse model bytes, report delegate support, create
//!   interpreters.
//! - [`Interpreter`]: allocate tensors, invoke, and expose input/output tensors
//!   as raw byte views.
//!
//! ```text
//! InferenceEngine::parse_model(bytes)      -> Model
//! InferenceEngine::create_interpreter(...) -> Interpreter
//!     Interpreter::allocate_tensors()
//!     Interpreter::input_tensor_mut(i)     <- copy in
//!     Interpreter::invoke()
//!     Interpreter::output_tensor(i)        -> copy out
//! ```
//!
//! With the `tflite` feature, [`tflite::TfLiteEngine`] implements both traits
//! over `libtensorflowlite_c`.

use crate::buffer::ForeignBuffer;
use crate::delegate::Delegate;
use crate::tensor::ElementType;
use std::fmt;

#[cfg(feature = "tflite")]
pub mod tflite;

/// Status code returned by the engine. Zero means success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineStatus(i32);

impl EngineStatus {
    pub const OK: EngineStatus = EngineStatus(0);
    pub const ERROR: EngineStatus = EngineStatus(1);
    pub const DELEGATE_ERROR: EngineStatus = EngineStatus(2);

    pub fn from_code(code: i32) -> Self {
        EngineStatus(code)
    }

    pub fn code(&self) -> i32 {
        self.0
    }

    pub fn is_ok(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Interpreter options assembled by the loader before creating an interpreter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterpreterOptions {
    /// Delegates to attach, in order.
    pub delegates: Vec<Delegate>,
    /// Number of CPU threads, or the engine default.
    pub num_threads: Option<i32>,
}

impl InterpreterOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a delegate. `Delegate::Default` means plain CPU and is not recorded.
    pub fn add_delegate(&mut self, delegate: Delegate) {
        if delegate != Delegate::Default && !self.delegates.contains(&delegate) {
            self.delegates.push(delegate);
        }
    }
}

/// Read-only view of one tensor inside an interpreter.
#[derive(Debug)]
pub struct TensorView<'a> {
    pub name: &'a str,
    pub shape: Vec<usize>,
    pub element_type: ElementType,
    pub data: &'a [u8],
}

/// Writable view of one input tensor.
#[derive(Debug)]
pub struct TensorViewMut<'a> {
    pub name: &'a str,
    pub shape: Vec<usize>,
    pub element_type: ElementType,
    pub data: &'a mut [u8],
}

impl TensorViewMut<'_> {
    pub fn as_view(&self) -> TensorView<'_> {
        TensorView {
            name: self.name,
            shape: self.shape.clone(),
            element_type: self.element_type,
            data: &self.data[..],
        }
    }
}

/// Engine entry points: model parsing and interpreter construction.
///
/// Implementations must be thread-safe; the loader calls them from background
/// workers.
pub trait InferenceEngine: Send + Sync + 'static {
    /// Parsed model handle.
    type Model: Send + 'static;
    /// Interpreter built from a model.
    type Interpreter: Interpreter + 'static;

    /// Returns the name of the engine (e.g., "tflite", "mock").
    fn name(&self) -> &str;

    /// Parses a model from raw bytes. Returns `None` if the bytes are not a
    /// model this engine understands.
    ///
    /// The model may keep pointers into `bytes` without copying them. Callers
    /// keep the buffer alive, at a stable address, until the model and every
    /// interpreter created from it have been dropped.
    fn parse_model(&self, bytes: &ForeignBuffer) -> Option<Self::Model>;

    /// Whether the delegate can be attached in this build.
    fn supports_delegate(&self, delegate: Delegate) -> bool {
        delegate.compiled_in()
    }

    /// Creates an interpreter for `model`. Returns `None` on failure.
    fn create_interpreter(
        &self,
        model: &Self::Model,
        options: &InterpreterOptions,
    ) -> Option<Self::Interpreter>;
}

/// A single interpreter instance. Not reentrant: callers serialize access.
pub trait Interpreter: Send {
    /// Allocates memory for all input and output tensors.
    fn allocate_tensors(&mut self) -> EngineStatus;

    /// Runs the model on the current input tensors.
    fn invoke(&mut self) -> EngineStatus;

    fn input_count(&self) -> usize;

    fn output_count(&self) -> usize;

    /// Input tensor at `index`, or `None` if the engine has none there.
    fn input_tensor(&self, index: usize) -> Option<TensorView<'_>>;

    /// Mutable input tensor at `index`.
    fn input_tensor_mut(&mut self, index: usize) -> Option<TensorViewMut<'_>>;

    /// Output tensor at `index`.
    fn output_tensor(&self, index: usize) -> Option<TensorView<'_>>;
}
