//! Script runtime object model.
//!
//! The bridge talks to a JavaScript-style runtime through a small set of
//! abstractions:
//!
//! - [`Runtime`]: globals, function calls and property access. Single-threaded.
//! - [`Value`]: everything a script can hold, including [`TypedArray`]s,
//!   [`Promise`](crate::promise::Promise)s, [`HostFunction`]s and
//!   [`HostObject`]s.
//! - [`CallInvoker`]: the only way to reach the runtime from another thread.
//!
//! [`RuntimeThread`] hosts a runtime on its own thread, which is how tests and
//! embedders without a runtime of their own drive the bridge.

mod invoker;
mod runtime;
mod typed_array;
mod value;

pub use invoker::{CallInvoker, RuntimeJob, RuntimeThread};
pub use runtime::Runtime;
pub use typed_array::{Element, TypedArray, TypedArrayKind};
pub use value::{HostFunction, HostObject, JsError, Value};
