//! Typed arrays: fixed-length numeric buffers shared with the runtime.

use bytemuck::Pod;
use ndarray::{ArrayD, IxDyn};
use std::fmt;
use std::sync::{Arc, RwLock};

/// Element kind of a [`TypedArray`], named after the runtime's constructors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypedArrayKind {
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float32,
    Float64,
    BigInt64,
    BigUint64,
}

impl TypedArrayKind {
    /// Size in bytes of one element.
    pub fn element_size(&self) -> usize {
        match self {
            TypedArrayKind::Int8 | TypedArrayKind::Uint8 => 1,
            TypedArrayKind::Int16 | TypedArrayKind::Uint16 => 2,
            TypedArrayKind::Int32 | TypedArrayKind::Uint32 | TypedArrayKind::Float32 => 4,
            TypedArrayKind::Float64 | TypedArrayKind::BigInt64 | TypedArrayKind::BigUint64 => 8,
        }
    }

    /// Constructor name as seen by scripts.
    pub fn name(&self) -> &'static str {
        match self {
            TypedArrayKind::Int8 => "Int8Array",
            TypedArrayKind::Uint8 => "Uint8Array",
            TypedArrayKind::Int16 => "Int16Array",
            TypedArrayKind::Uint16 => "Uint16Array",
            TypedArrayKind::Int32 => "Int32Array",
            TypedArrayKind::Uint32 => "Uint32Array",
            TypedArrayKind::Float32 => "Float32Array",
            TypedArrayKind::Float64 => "Float64Array",
            TypedArrayKind::BigInt64 => "BigInt64Array",
            TypedArrayKind::BigUint64 => "BigUint64Array",
        }
    }
}

impl fmt::Display for TypedArrayKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Rust element type backing a [`TypedArrayKind`].
pub trait Element: Pod {
    const KIND: TypedArrayKind;
}

macro_rules! impl_element {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(impl Element for $ty {
            const KIND: TypedArrayKind = TypedArrayKind::$kind;
        })*
    };
}

impl_element! {
    i8 => Int8,
    u8 => Uint8,
    i16 => Int16,
    u16 => Uint16,
    i32 => Int32,
    u32 => Uint32,
    f32 => Float32,
    f64 => Float64,
    i64 => BigInt64,
    u64 => BigUint64,
}

/// A typed array. Clones share the same backing store, like two script
/// references to one array object.
#[derive(Clone)]
pub struct TypedArray {
    kind: TypedArrayKind,
    bytes: Arc<RwLock<Vec<u8>>>,
}

impl TypedArray {
    /// Zero-filled array of `len` elements.
    pub fn new(kind: TypedArrayKind, len: usize) -> Self {
        Self::from_bytes(kind, vec![0; len * kind.element_size()])
    }

    pub fn from_slice<T: Element>(values: &[T]) -> Self {
        Self::from_bytes(T::KIND, bytemuck::cast_slice(values).to_vec())
    }

    /// Wraps raw bytes. Trailing bytes that do not fill a whole element are
    /// dropped.
    pub fn from_bytes(kind: TypedArrayKind, mut bytes: Vec<u8>) -> Self {
        let whole = bytes.len() - bytes.len() % kind.element_size();
        bytes.truncate(whole);
        Self {
            kind,
            bytes: Arc::new(RwLock::new(bytes)),
        }
    }

    pub fn kind(&self) -> TypedArrayKind {
        self.kind
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.byte_len() / self.kind.element_size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn byte_len(&self) -> usize {
        self.read(|bytes| bytes.len())
    }

    /// Whether both handles refer to the same backing store.
    pub fn ptr_eq(&self, other: &TypedArray) -> bool {
        Arc::ptr_eq(&self.bytes, &other.bytes)
    }

    /// Runs `f` with the raw bytes.
    pub fn read<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let bytes = self.bytes.read().unwrap_or_else(|e| e.into_inner());
        f(&bytes)
    }

    /// Runs `f` with mutable access to the raw bytes.
    pub fn write<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut bytes = self.bytes.write().unwrap_or_else(|e| e.into_inner());
        f(&mut bytes)
    }

    /// Copies the elements out as `T`, or `None` if `T` is not this array's
    /// element type.
    pub fn to_vec<T: Element>(&self) -> Option<Vec<T>> {
        if T::KIND != self.kind {
            return None;
        }
        Some(self.read(|bytes| bytemuck::pod_collect_to_vec::<u8, T>(bytes)))
    }

    /// Copies the elements into an n-dimensional array of the given shape.
    pub fn to_ndarray<T: Element>(&self, shape: &[usize]) -> Option<ArrayD<T>> {
        let values = self.to_vec::<T>()?;
        ArrayD::from_shape_vec(IxDyn(shape), values).ok()
    }

    /// Elements widened to `f64`, whatever the kind. 64-bit integers beyond
    /// 2^53 lose precision.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        fn widen<T: Pod + Copy>(bytes: &[u8], f: impl Fn(T) -> f64) -> Vec<f64> {
            bytemuck::pod_collect_to_vec::<u8, T>(bytes).into_iter().map(f).collect()
        }
        self.read(|bytes| match self.kind {
            TypedArrayKind::Int8 => widen::<i8>(bytes, f64::from),
            TypedArrayKind::Uint8 => widen::<u8>(bytes, f64::from),
            TypedArrayKind::Int16 => widen::<i16>(bytes, f64::from),
            TypedArrayKind::Uint16 => widen::<u16>(bytes, f64::from),
            TypedArrayKind::Int32 => widen::<i32>(bytes, f64::from),
            TypedArrayKind::Uint32 => widen::<u32>(bytes, f64::from),
            TypedArrayKind::Float32 => widen::<f32>(bytes, f64::from),
            TypedArrayKind::Float64 => widen::<f64>(bytes, |v| v),
            TypedArrayKind::BigInt64 => widen::<i64>(bytes, |v| v as f64),
            TypedArrayKind::BigUint64 => widen::<u64>(bytes, |v| v as f64),
        })
    }
}

impl fmt::Debug for TypedArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedArray")
            .field("kind", &self.kind)
            .field("len", &self.len())
            .finish()
    }
}
