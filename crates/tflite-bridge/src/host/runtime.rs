//! The script runtime handle.
//!
//! A [`Runtime`] is single-threaded: it is created on, and only touched from,
//! its owner thread. Native code running elsewhere reaches it by posting jobs
//! through a [`CallInvoker`](super::invoker::CallInvoker).

use super::value::{JsError, Value};
use std::collections::HashMap;
use std::thread::{self, ThreadId};

pub struct Runtime {
    globals: HashMap<String, Value>,
    owner: ThreadId,
}

impl Runtime {
    /// Creates a runtime owned by the calling thread.
    pub fn new() -> Self {
        Self {
            globals: HashMap::new(),
            owner: thread::current().id(),
        }
    }

    pub fn owner_thread(&self) -> ThreadId {
        self.owner
    }

    /// Whether the caller is on the runtime thread.
    pub fn is_owner_thread(&self) -> bool {
        thread::current().id() == self.owner
    }

    /// Global lookup. Missing names are `undefined`.
    pub fn global(&self, name: &str) -> Value {
        self.globals.get(name).cloned().unwrap_or_default()
    }

    pub fn has_global(&self, name: &str) -> bool {
        self.globals.contains_key(name)
    }

    /// Defines or replaces a global.
    pub fn set_global(&mut self, name: &str, value: Value) {
        debug_assert!(self.is_owner_thread(), "runtime touched off its thread");
        self.globals.insert(name.to_string(), value);
    }

    /// Calls a function value.
    pub fn call(&mut self, function: &Value, args: &[Value]) -> Result<Value, JsError> {
        debug_assert!(self.is_owner_thread(), "runtime touched off its thread");
        match function {
            Value::Function(func) => func.call(self, args),
            other => Err(JsError::new(format!("{} is not a function", other.type_name()))),
        }
    }

    /// Reads `target[name]`.
    pub fn get_property(&mut self, target: &Value, name: &str) -> Result<Value, JsError> {
        match target {
            Value::HostObject(object) => object.get(self, name),
            Value::Object(map) => Ok(map.get(name).cloned().unwrap_or_default()),
            Value::Array(items) if name == "length" => Ok(Value::from(items.len())),
            Value::TypedArray(array) if name == "length" => Ok(Value::from(array.len())),
            Value::Undefined | Value::Null => Err(JsError::new(format!(
                "Cannot read properties of {} (reading '{}')",
                target.type_name(),
                name
            ))),
            _ => Ok(Value::Undefined),
        }
    }

    /// Reads `target[name]` and calls it with `args`.
    pub fn call_method(&mut self, target: &Value, name: &str, args: &[Value]) -> Result<Value, JsError> {
        let method = self.get_property(target, name)?;
        self.call(&method, args)
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}
