//! Runtime values, host objects and host functions.

use super::runtime::Runtime;
use super::typed_array::TypedArray;
use crate::error::BridgeError;
use crate::promise::Promise;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Error thrown into the runtime. Carries the message scripts see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsError {
    message: String,
}

impl JsError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for JsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for JsError {}

impl From<BridgeError> for JsError {
    fn from(err: BridgeError) -> Self {
        JsError::new(err.to_string())
    }
}

/// A native object exposed to scripts through property lookups.
pub trait HostObject: Send + Sync {
    /// Property lookup. Unknown names return `Value::Undefined`.
    fn get(&self, runtime: &mut Runtime, name: &str) -> Result<Value, JsError>;

    /// Names of the properties this object exposes.
    fn property_names(&self) -> Vec<String>;

    /// For downcasting to the concrete type.
    fn as_any(&self) -> &dyn Any;
}

type NativeFn = dyn Fn(&mut Runtime, &[Value]) -> Result<Value, JsError> + Send + Sync;

/// A native function callable from scripts.
#[derive(Clone)]
pub struct HostFunction {
    name: Arc<str>,
    arity: usize,
    func: Arc<NativeFn>,
}

impl HostFunction {
    pub fn new<F>(name: &str, arity: usize, func: F) -> Self
    where
        F: Fn(&mut Runtime, &[Value]) -> Result<Value, JsError> + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name),
            arity,
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared number of parameters.
    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn call(&self, runtime: &mut Runtime, args: &[Value]) -> Result<Value, JsError> {
        (self.func)(runtime, args)
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Function: {}]", self.name)
    }
}

/// A value in the script runtime.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
    TypedArray(TypedArray),
    Promise(Promise),
    Function(HostFunction),
    HostObject(Arc<dyn HostObject>),
}

impl Value {
    /// Builds a plain object from key/value pairs.
    pub fn object<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// The `typeof`-style name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::TypedArray(_) => "typed array",
            Value::Promise(_) => "promise",
            Value::Function(_) => "function",
            Value::HostObject(_) => "host object",
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_typed_array(&self) -> Option<&TypedArray> {
        match self {
            Value::TypedArray(array) => Some(array),
            _ => None,
        }
    }

    pub fn as_promise(&self) -> Option<&Promise> {
        match self {
            Value::Promise(promise) => Some(promise),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&HostFunction> {
        match self {
            Value::Function(func) => Some(func),
            _ => None,
        }
    }

    pub fn as_host_object(&self) -> Option<&Arc<dyn HostObject>> {
        match self {
            Value::HostObject(object) => Some(object),
            _ => None,
        }
    }

    /// Downcasts a host object to its concrete type.
    pub fn downcast_host_object<T: 'static>(&self) -> Option<&T> {
        self.as_host_object()?.as_any().downcast_ref::<T>()
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Array(items) => f.debug_list().entries(items).finish(),
            Value::Object(map) => f.debug_map().entries(map).finish(),
            Value::TypedArray(array) => write!(f, "{}({})", array.kind(), array.len()),
            Value::Promise(promise) => write!(f, "{promise:?}"),
            Value::Function(func) => write!(f, "{func:?}"),
            Value::HostObject(object) => {
                write!(f, "[HostObject {{ {} }}]", object.property_names().join(", "))
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<TypedArray> for Value {
    fn from(array: TypedArray) -> Self {
        Value::TypedArray(array)
    }
}

impl From<Promise> for Value {
    fn from(promise: Promise) -> Self {
        Value::Promise(promise)
    }
}

impl From<HostFunction> for Value {
    fn from(func: HostFunction) -> Self {
        Value::Function(func)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_js_error_from_bridge_error() {
        let err: JsError = BridgeError::SessionBusy.into();
        assert_eq!(err.message(), "Session busy: another run is still in flight");
    }

    #[test]
    fn test_object_builder_and_accessors() {
        let value = Value::object([("name", Value::from("input")), ("rank", Value::from(2usize))]);
        let map = value.as_object().unwrap();
        assert_eq!(map["name"].as_str(), Some("input"));
        assert_eq!(map["rank"].as_number(), Some(2.0));
        assert!(value.as_array().is_none());
        assert_eq!(value.type_name(), "object");
    }

    #[test]
    fn test_host_function_call() {
        let add = HostFunction::new("add", 2, |_rt, args| {
            let sum: f64 = args.iter().filter_map(Value::as_number).sum();
            Ok(Value::Number(sum))
        });
        let mut runtime = Runtime::new();
        let result = add.call(&mut runtime, &[Value::Number(1.0), Value::Number(2.0)]).unwrap();
        assert_eq!(result.as_number(), Some(3.0));
        assert_eq!(add.arity(), 2);
        assert_eq!(format!("{add:?}"), "[Function: add]");
    }
}
