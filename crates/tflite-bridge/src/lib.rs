//! tflite-bridge - Exposes a TensorFlow Lite style inference engine to a
//! single-threaded scripting runtime.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tflite_bridge::prelude::*;
//!
//! let runtime_thread = RuntimeThread::spawn()?;
//! let loader = ModelLoader::new(TfLiteEngine::new(), runtime_thread.invoker());
//! runtime_thread.call(move |rt| loader.install(rt))?;
//!
//! // From a script:
//! //   const model = await __loadTensorflowModel("https://.../model.tflite", "core-ml")
//! //   const [scores] = model.runSync([new Float32Array(input)])
//! ```
//!
//! ## Module Organization
//!
//! ### Runtime Surface
//! - [`host`] - Runtime, values, typed arrays, host objects, call-invoker
//! - [`promise`] - Promises settled on the runtime thread
//!
//! ### Loading and Running
//! - [`loader`] - Async model loading and the global entry point
//! - [`session`] - The session host object (`run`, `runSync`, ...)
//! - [`tensor`] - Tensor descriptors and typed-array marshalling
//!
//! ### Engine
//! - [`engine`] - Engine and interpreter traits (TFLite binding behind `tflite`)
//! - [`delegate`] - Execution backend selection
//! - [`buffer`] - Owned model bytes
//!
//! ### Support
//! - [`config`], [`fetch`], [`worker`], [`error`]
//! - [`testing`] - Mock engine and fixtures

// ============================================================================
// Feature Combination Guards
// ============================================================================

// CoreML and Metal delegates ship only in Apple builds of libtensorflowlite_c.
#[cfg(all(any(feature = "coreml", feature = "metal"), not(target_vendor = "apple")))]
compile_error!(
    "Invalid feature combination: `coreml` and `metal` require an Apple target.\n\n\
    Use the default CPU delegate on other platforms."
);

pub mod buffer;
pub mod config;
pub mod delegate;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod host;
pub mod loader;
pub mod promise;
pub mod session;
pub mod tensor;
pub mod worker;

/// Testing utilities (mocks, fixtures)
#[doc(hidden)]
pub mod testing;

pub use buffer::ForeignBuffer;
pub use config::BridgeConfig;
pub use delegate::Delegate;
pub use engine::{EngineStatus, InferenceEngine, Interpreter, InterpreterOptions, TensorView, TensorViewMut};
pub use error::{BridgeError, BridgeResult};
pub use fetch::{ModelFetcher, UrlFetcher};
pub use loader::ModelLoader;
pub use promise::{create_promise, Deferred, Promise, ABANDONED_MESSAGE};
pub use session::{InferenceSession, SessionContext};
pub use tensor::{ElementType, TensorBridge, TensorDescriptor};
pub use worker::BackgroundExecutor;

#[cfg(feature = "tflite")]
pub use engine::tflite::TfLiteEngine;

/// Common imports.
pub mod prelude {
    pub use crate::host::{CallInvoker, HostObject, JsError, Runtime, RuntimeThread, TypedArray, TypedArrayKind, Value};
    pub use crate::{
        BackgroundExecutor, BridgeConfig, BridgeError, BridgeResult, Delegate, InferenceSession, ModelLoader,
        Promise,
    };

    #[cfg(feature = "tflite")]
    pub use crate::TfLiteEngine;
}
