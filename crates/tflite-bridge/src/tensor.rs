//! Tensor metadata and byte-exact copies between typed arrays and tensors.
//!
//! Element types follow the TensorFlow Lite `TfLiteType` codes. Each
//! numeric type maps onto one typed-array kind:
//!
//! | Element type | Typed array |
//! |--------------|-------------|
//! | float32 | `Float32Array` |
//! | float64 | `Float64Array` |
//! | float16 | `Uint16Array` (raw half-precision bits) |
//! | int8 / uint8 | `Int8Array` / `Uint8Array` |
//! | int16 / uint16 | `Int16Array` / `Uint16Array` |
//! | int32 / uint32 | `Int32Array` / `Uint32Array` |
//! | int64 / uint64 | `BigInt64Array` / `BigUint64Array` |
//! | bool | `Uint8Array` |
//!
//! String, complex and unknown tensors have no typed-array form and are
//! rejected on copy.

use crate::engine::{TensorView, TensorViewMut};
use crate::error::{BridgeError, BridgeResult, TensorRole};
use crate::host::{TypedArray, TypedArrayKind, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

/// Tensor element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    Float32,
    Float16,
    Float64,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Bool,
    String,
    Complex64,
    Complex128,
    Unknown,
}

impl ElementType {
    /// Maps a `TfLiteType` code.
    pub fn from_tflite_code(code: i32) -> Self {
        match code {
            1 => ElementType::Float32,
            2 => ElementType::Int32,
            3 => ElementType::UInt8,
            4 => ElementType::Int64,
            5 => ElementType::String,
            6 => ElementType::Bool,
            7 => ElementType::Int16,
            8 => ElementType::Complex64,
            9 => ElementType::Int8,
            10 => ElementType::Float16,
            11 => ElementType::Float64,
            12 => ElementType::Complex128,
            13 => ElementType::UInt64,
            16 => ElementType::UInt32,
            17 => ElementType::UInt16,
            _ => ElementType::Unknown,
        }
    }

    /// Name reported in tensor descriptors.
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementType::Float32 => "float32",
            ElementType::Float16 => "float16",
            ElementType::Float64 => "float64",
            ElementType::Int8 => "int8",
            ElementType::UInt8 => "uint8",
            ElementType::Int16 => "int16",
            ElementType::UInt16 => "uint16",
            ElementType::Int32 => "int32",
            ElementType::UInt32 => "uint32",
            ElementType::Int64 => "int64",
            ElementType::UInt64 => "uint64",
            ElementType::Bool => "bool",
            ElementType::String => "string",
            ElementType::Complex64 => "complex64",
            ElementType::Complex128 => "complex128",
            ElementType::Unknown => "unknown",
        }
    }

    /// Bytes per element, if fixed.
    pub fn byte_width(&self) -> Option<usize> {
        match self {
            ElementType::Int8 | ElementType::UInt8 | ElementType::Bool => Some(1),
            ElementType::Float16 | ElementType::Int16 | ElementType::UInt16 => Some(2),
            ElementType::Float32 | ElementType::Int32 | ElementType::UInt32 => Some(4),
            ElementType::Float64 | ElementType::Int64 | ElementType::UInt64 | ElementType::Complex64 => Some(8),
            ElementType::Complex128 => Some(16),
            ElementType::String | ElementType::Unknown => None,
        }
    }

    /// The typed-array kind that carries this element type.
    pub fn typed_array_kind(&self) -> Option<TypedArrayKind> {
        match self {
            ElementType::Float32 => Some(TypedArrayKind::Float32),
            ElementType::Float64 => Some(TypedArrayKind::Float64),
            ElementType::Float16 | ElementType::UInt16 => Some(TypedArrayKind::Uint16),
            ElementType::Int8 => Some(TypedArrayKind::Int8),
            ElementType::UInt8 | ElementType::Bool => Some(TypedArrayKind::Uint8),
            ElementType::Int16 => Some(TypedArrayKind::Int16),
            ElementType::Int32 => Some(TypedArrayKind::Int32),
            ElementType::UInt32 => Some(TypedArrayKind::Uint32),
            ElementType::Int64 => Some(TypedArrayKind::BigInt64),
            ElementType::UInt64 => Some(TypedArrayKind::BigUint64),
            ElementType::String | ElementType::Complex64 | ElementType::Complex128 | ElementType::Unknown => None,
        }
    }

    fn require_kind(&self, tensor_name: &str) -> BridgeResult<TypedArrayKind> {
        self.typed_array_kind().ok_or_else(|| {
            BridgeError::tensor_copy(format!(
                "tensor \"{tensor_name}\" has element type {self}, which has no typed array form"
            ))
        })
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name, shape and element type of one tensor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorDescriptor {
    pub name: String,
    pub shape: Vec<usize>,
    #[serde(rename = "type")]
    pub element_type: ElementType,
}

impl TensorDescriptor {
    /// Product of the dimensions. A rank-0 tensor holds one element.
    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn byte_size(&self) -> Option<usize> {
        self.element_type.byte_width().map(|w| w * self.element_count())
    }

    /// The `{ name, shape, type }` object handed to scripts.
    pub fn to_value(&self) -> Value {
        Value::object([
            ("name", Value::from(self.name.as_str())),
            (
                "shape",
                Value::Array(self.shape.iter().map(|&d| Value::from(d)).collect()),
            ),
            ("type", Value::from(self.element_type.as_str())),
        ])
    }
}

/// Descriptor for a tensor view.
pub fn descriptor_of(tensor: &TensorView<'_>) -> TensorDescriptor {
    TensorDescriptor {
        name: tensor.name.to_string(),
        shape: tensor.shape.clone(),
        element_type: tensor.element_type,
    }
}

/// `name` if it is present and non-empty, otherwise `"{role}_{index}"`.
///
/// Output caching is keyed by name, so every tensor needs a distinct one.
pub fn tensor_name_or_default(name: Option<&str>, role: TensorRole, index: usize) -> String {
    match name {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => format!("{}_{}", role.as_str(), index),
    }
}

/// Cache of output typed arrays, keyed by tensor name.
///
/// A run returns the same array objects as the previous run, overwritten in
/// place, unless the tensor changed size or type.
#[derive(Default)]
pub struct TensorBridge {
    buffers: Mutex<HashMap<String, TypedArray>>,
}

impl TensorBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached typed array for `tensor`, created on first use and replaced
    /// when the tensor's byte size or type changes.
    pub fn buffer_for(&self, tensor: &TensorView<'_>) -> BridgeResult<TypedArray> {
        let kind = tensor.element_type.require_kind(tensor.name)?;
        let mut buffers = self.buffers.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(existing) = buffers.get(tensor.name) {
            if existing.kind() == kind && existing.byte_len() == tensor.data.len() {
                return Ok(existing.clone());
            }
            log::debug!(
                "Output tensor \"{}\" changed to {} bytes, reallocating",
                tensor.name,
                tensor.data.len()
            );
        }

        let buffer = TypedArray::new(kind, tensor.data.len() / kind.element_size());
        buffers.insert(tensor.name.to_string(), buffer.clone());
        Ok(buffer)
    }

    /// Previously created buffer for a tensor name.
    pub fn cached(&self, name: &str) -> Option<TypedArray> {
        self.buffers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    /// Number of cached buffers.
    pub fn len(&self) -> usize {
        self.buffers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Copies a typed array into an input tensor, byte for byte.
///
/// The array's kind must be the one that carries the tensor's element type and
/// its byte length must equal the tensor's.
pub fn copy_in(source: &TypedArray, tensor: &mut TensorViewMut<'_>) -> BridgeResult<()> {
    let kind = tensor.element_type.require_kind(tensor.name)?;
    if source.kind() != kind {
        return Err(BridgeError::tensor_copy(format!(
            "input tensor \"{}\" expects a {} ({}), got a {}",
            tensor.name,
            kind,
            tensor.element_type,
            source.kind()
        )));
    }
    source.read(|bytes| {
        if bytes.len() != tensor.data.len() {
            return Err(BridgeError::tensor_copy(format!(
                "input tensor \"{}\" holds {} bytes, buffer has {}",
                tensor.name,
                tensor.data.len(),
                bytes.len()
            )));
        }
        tensor.data.copy_from_slice(bytes);
        Ok(())
    })
}

/// Copies plain numbers into an input tensor, converting each to the tensor's
/// element type.
///
/// Float16 tensors only accept typed arrays of raw bits.
pub fn copy_values_in(values: &[Value], tensor: &mut TensorViewMut<'_>) -> BridgeResult<()> {
    tensor.element_type.require_kind(tensor.name)?;
    let width = tensor.element_type.byte_width().unwrap_or(1);

    let expected = tensor.data.len() / width;
    if values.len() != expected {
        return Err(BridgeError::tensor_copy(format!(
            "input tensor \"{}\" holds {} elements, got {} values",
            tensor.name,
            expected,
            values.len()
        )));
    }

    let mut numbers = Vec::with_capacity(values.len());
    for (i, value) in values.iter().enumerate() {
        let number = match value {
            Value::Number(n) => *n,
            Value::Bool(b) => f64::from(u8::from(*b)),
            other => {
                return Err(BridgeError::tensor_copy(format!(
                    "input tensor \"{}\" element {} is a {}, expected a number",
                    tensor.name,
                    i,
                    other.type_name()
                )))
            }
        };
        numbers.push(number);
    }

    fn pack<T: bytemuck::Pod>(numbers: &[f64], out: &mut [u8], convert: impl Fn(f64) -> T) {
        let converted: Vec<T> = numbers.iter().map(|&n| convert(n)).collect();
        out.copy_from_slice(bytemuck::cast_slice(&converted));
    }

    let out = &mut *tensor.data;
    match tensor.element_type {
        ElementType::Float32 => pack(&numbers, out, |n| n as f32),
        ElementType::Float64 => pack(&numbers, out, |n| n),
        ElementType::Int8 => pack(&numbers, out, |n| n as i8),
        ElementType::UInt8 => pack(&numbers, out, |n| n as u8),
        ElementType::Bool => pack(&numbers, out, |n| u8::from(n != 0.0)),
        ElementType::Int16 => pack(&numbers, out, |n| n as i16),
        ElementType::UInt16 => pack(&numbers, out, |n| n as u16),
        ElementType::Int32 => pack(&numbers, out, |n| n as i32),
        ElementType::UInt32 => pack(&numbers, out, |n| n as u32),
        ElementType::Int64 => pack(&numbers, out, |n| n as i64),
        ElementType::UInt64 => pack(&numbers, out, |n| n as u64),
        ElementType::Float16 => {
            return Err(BridgeError::tensor_copy(format!(
                "input tensor \"{}\" is float16; pass a Uint16Array of raw half-precision bits",
                tensor.name
            )))
        }
        other => {
            return Err(BridgeError::tensor_copy(format!(
                "input tensor \"{}\" has element type {}, which cannot be filled from numbers",
                tensor.name, other
            )))
        }
    }
    Ok(())
}

/// Copies an output tensor into `target`, byte for byte.
pub fn copy_out(tensor: &TensorView<'_>, target: &TypedArray) -> BridgeResult<()> {
    target.write(|bytes| {
        if bytes.len() != tensor.data.len() {
            return Err(BridgeError::tensor_copy(format!(
                "output tensor \"{}\" holds {} bytes, buffer has {}",
                tensor.name,
                tensor.data.len(),
                bytes.len()
            )));
        }
        bytes.copy_from_slice(tensor.data);
        Ok(())
    })
}

/// Copies a tensor into a fresh typed array.
pub fn read_tensor(tensor: &TensorView<'_>) -> BridgeResult<TypedArray> {
    let kind = tensor.element_type.require_kind(tensor.name)?;
    Ok(TypedArray::from_bytes(kind, tensor.data.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view<'a>(name: &'a str, element_type: ElementType, data: &'a [u8]) -> TensorView<'a> {
        TensorView {
            name,
            shape: vec![data.len() / element_type.byte_width().unwrap_or(1)],
            element_type,
            data,
        }
    }

    fn view_mut<'a>(name: &'a str, element_type: ElementType, data: &'a mut [u8]) -> TensorViewMut<'a> {
        TensorViewMut {
            name,
            shape: vec![data.len() / element_type.byte_width().unwrap_or(1)],
            element_type,
            data,
        }
    }

    #[test]
    fn test_tflite_codes() {
        assert_eq!(ElementType::from_tflite_code(1), ElementType::Float32);
        assert_eq!(ElementType::from_tflite_code(9), ElementType::Int8);
        assert_eq!(ElementType::from_tflite_code(17), ElementType::UInt16);
        assert_eq!(ElementType::from_tflite_code(14), ElementType::Unknown);
        assert_eq!(ElementType::from_tflite_code(0), ElementType::Unknown);
    }

    #[test]
    fn test_descriptor_value_shape() {
        let descriptor = TensorDescriptor {
            name: "input".to_string(),
            shape: vec![1, 224, 224, 3],
            element_type: ElementType::UInt8,
        };
        assert_eq!(descriptor.byte_size(), Some(224 * 224 * 3));

        let value = descriptor.to_value();
        let map = value.as_object().unwrap();
        assert_eq!(map["name"].as_str(), Some("input"));
        assert_eq!(map["type"].as_str(), Some("uint8"));
        let shape: Vec<f64> = map["shape"].as_array().unwrap().iter().filter_map(Value::as_number).collect();
        assert_eq!(shape, vec![1.0, 224.0, 224.0, 3.0]);
    }

    #[test]
    fn test_descriptor_serializes_type_key() {
        let descriptor = TensorDescriptor {
            name: "logits".to_string(),
            shape: vec![1, 10],
            element_type: ElementType::Float32,
        };
        let json = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(json["type"], "float32");
        assert_eq!(json["shape"], serde_json::json!([1, 10]));
    }

    #[test]
    fn test_copy_in_is_byte_exact() {
        let source = TypedArray::from_slice(&[1.0f32, -2.5, 3.25, 0.0]);
        let mut storage = vec![0u8; 16];
        copy_in(&source, &mut view_mut("input", ElementType::Float32, &mut storage)).unwrap();
        assert_eq!(storage, source.read(|b| b.to_vec()));
    }

    #[test]
    fn test_copy_in_rejects_size_mismatch() {
        let source = TypedArray::from_slice(&[1.0f32, 2.0]);
        let mut storage = vec![0u8; 16];
        let err = copy_in(&source, &mut view_mut("input", ElementType::Float32, &mut storage)).unwrap_err();
        assert!(matches!(err, BridgeError::TensorCopy(_)));
        assert_eq!(storage, vec![0u8; 16]);
    }

    #[test]
    fn test_copy_in_rejects_wrong_kind() {
        let source = TypedArray::from_slice(&[1i32, 2, 3, 4]);
        let mut storage = vec![0u8; 16];
        let err = copy_in(&source, &mut view_mut("input", ElementType::Float32, &mut storage)).unwrap_err();
        assert!(err.to_string().contains("Float32Array"));
    }

    #[test]
    fn test_copy_values_in_converts_numbers() {
        let values = vec![Value::Number(1.0), Value::Number(2.0), Value::Number(255.0)];
        let mut storage = vec![0u8; 3];
        copy_values_in(&values, &mut view_mut("pixels", ElementType::UInt8, &mut storage)).unwrap();
        assert_eq!(storage, vec![1, 2, 255]);

        let mut storage = vec![0u8; 8];
        copy_values_in(&[Value::Number(0.5), Value::Number(1.5)], &mut view_mut("x", ElementType::Float32, &mut storage)).unwrap();
        assert_eq!(bytemuck::pod_collect_to_vec::<u8, f32>(&storage), vec![0.5, 1.5]);
    }

    #[test]
    fn test_copy_values_in_rejects_non_numbers() {
        let mut storage = vec![0u8; 8];
        let err = copy_values_in(
            &[Value::from("a"), Value::Null],
            &mut view_mut("x", ElementType::Float32, &mut storage),
        )
        .unwrap_err();
        assert!(err.to_string().contains("string"));
    }

    #[test]
    fn test_string_tensors_are_rejected() {
        let data = [0u8; 4];
        let tensor = view("text", ElementType::String, &data);
        assert!(read_tensor(&tensor).is_err());
        assert!(TensorBridge::new().buffer_for(&tensor).is_err());
    }

    #[test]
    fn test_buffer_for_reuses_and_reallocates() {
        let bridge = TensorBridge::new();
        let first_data = [0u8; 16];
        let first = bridge.buffer_for(&view("out", ElementType::Float32, &first_data)).unwrap();
        let again = bridge.buffer_for(&view("out", ElementType::Float32, &first_data)).unwrap();
        assert!(first.ptr_eq(&again));
        assert_eq!(bridge.len(), 1);

        let bigger = [0u8; 32];
        let resized = bridge.buffer_for(&view("out", ElementType::Float32, &bigger)).unwrap();
        assert!(!resized.ptr_eq(&first));
        assert_eq!(resized.len(), 8);
        assert!(bridge.cached("out").unwrap().ptr_eq(&resized));
    }

    #[test]
    fn test_copy_out_overwrites_in_place() {
        let bridge = TensorBridge::new();
        let data = bytemuck::cast_slice::<f32, u8>(&[4.0, 5.0]).to_vec();
        let tensor = view("out", ElementType::Float32, &data);
        let buffer = bridge.buffer_for(&tensor).unwrap();
        copy_out(&tensor, &buffer).unwrap();
        assert_eq!(buffer.to_vec::<f32>(), Some(vec![4.0, 5.0]));
    }

    #[test]
    fn test_bool_tensor_uses_uint8() {
        let data = [1u8, 0, 1];
        let array = read_tensor(&view("mask", ElementType::Bool, &data)).unwrap();
        assert_eq!(array.kind(), TypedArrayKind::Uint8);
        assert_eq!(array.to_vec::<u8>(), Some(vec![1, 0, 1]));
    }

    #[test]
    fn test_copy_in_then_read_back() {
        let source = TypedArray::from_slice(&[0.5f32, -1.25, 3.0]);
        let mut storage = vec![0u8; 12];
        let mut tensor = view_mut("embedding", ElementType::Float32, &mut storage);

        copy_in(&source, &mut tensor).unwrap();
        let read = read_tensor(&tensor.as_view()).unwrap();

        assert_eq!(read.to_vec::<f32>(), Some(vec![0.5, -1.25, 3.0]));
        assert!(!read.ptr_eq(&source));
    }

    #[test]
    fn test_unnamed_tensors_get_positional_names() {
        assert_eq!(tensor_name_or_default(Some("logits"), TensorRole::Output, 0), "logits");
        assert_eq!(tensor_name_or_default(Some(""), TensorRole::Output, 1), "output_1");
        assert_eq!(tensor_name_or_default(None, TensorRole::Input, 2), "input_2");
        assert_ne!(
            tensor_name_or_default(None, TensorRole::Output, 0),
            tensor_name_or_default(None, TensorRole::Output, 1)
        );
    }
}
