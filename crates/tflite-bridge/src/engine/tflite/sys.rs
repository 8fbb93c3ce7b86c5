//! Raw bindings to the TensorFlow Lite C API (`libtensorflowlite_c`).
//!
//! Only the calls the bridge needs are declared. Delegate constructors are
//! behind the `coreml` and `metal` features and link against the respective
//! delegate libraries.

use std::os::raw::{c_char, c_int, c_void};

// =============================================================================
// Opaque Types
// =============================================================================

#[repr(C)]
pub struct TfLiteModel {
    _private: [u8; 0],
}

#[repr(C)]
pub struct TfLiteInterpreterOptions {
    _private: [u8; 0],
}

#[repr(C)]
pub struct TfLiteInterpreter {
    _private: [u8; 0],
}

#[repr(C)]
pub struct TfLiteTensor {
    _private: [u8; 0],
}

#[repr(C)]
pub struct TfLiteDelegate {
    _private: [u8; 0],
}

/// `TfLiteStatus`; `kTfLiteOk` is 0.
pub type TfLiteStatus = c_int;

/// `TfLiteType` element type code.
pub type TfLiteType = c_int;

// =============================================================================
// FFI Declarations
// =============================================================================

#[link(name = "tensorflowlite_c")]
extern "C" {
    pub fn TfLiteModelCreate(model_data: *const c_void, model_size: usize) -> *mut TfLiteModel;
    pub fn TfLiteModelDelete(model: *mut TfLiteModel);

    pub fn TfLiteInterpreterOptionsCreate() -> *mut TfLiteInterpreterOptions;
    pub fn TfLiteInterpreterOptionsDelete(options: *mut TfLiteInterpreterOptions);
    pub fn TfLiteInterpreterOptionsSetNumThreads(options: *mut TfLiteInterpreterOptions, num_threads: i32);
    pub fn TfLiteInterpreterOptionsAddDelegate(options: *mut TfLiteInterpreterOptions, delegate: *mut TfLiteDelegate);

    pub fn TfLiteInterpreterCreate(
        model: *const TfLiteModel,
        optional_options: *const TfLiteInterpreterOptions,
    ) -> *mut TfLiteInterpreter;
    pub fn TfLiteInterpreterDelete(interpreter: *mut TfLiteInterpreter);

    pub fn TfLiteInterpreterAllocateTensors(interpreter: *mut TfLiteInterpreter) -> TfLiteStatus;
    pub fn TfLiteInterpreterInvoke(interpreter: *mut TfLiteInterpreter) -> TfLiteStatus;

    pub fn TfLiteInterpreterGetInputTensorCount(interpreter: *const TfLiteInterpreter) -> i32;
    pub fn TfLiteInterpreterGetOutputTensorCount(interpreter: *const TfLiteInterpreter) -> i32;
    pub fn TfLiteInterpreterGetInputTensor(interpreter: *const TfLiteInterpreter, input_index: i32) -> *mut TfLiteTensor;
    pub fn TfLiteInterpreterGetOutputTensor(
        interpreter: *const TfLiteInterpreter,
        output_index: i32,
    ) -> *const TfLiteTensor;

    pub fn TfLiteTensorType(tensor: *const TfLiteTensor) -> TfLiteType;
    pub fn TfLiteTensorNumDims(tensor: *const TfLiteTensor) -> i32;
    pub fn TfLiteTensorDim(tensor: *const TfLiteTensor, dim_index: i32) -> i32;
    pub fn TfLiteTensorByteSize(tensor: *const TfLiteTensor) -> usize;
    pub fn TfLiteTensorData(tensor: *const TfLiteTensor) -> *mut c_void;
    pub fn TfLiteTensorName(tensor: *const TfLiteTensor) -> *const c_char;
}

// =============================================================================
// CoreML Delegate
// =============================================================================

/// `TfLiteCoreMlDelegateOptions`.
#[cfg(feature = "coreml")]
#[repr(C)]
pub struct TfLiteCoreMlDelegateOptions {
    /// 0: devices with a Neural Engine only, 1: all devices.
    pub enabled_devices: c_int,
    /// 0 picks the highest version the device supports.
    pub coreml_version: c_int,
    /// 0 means no limit.
    pub max_delegated_partitions: c_int,
    pub min_nodes_per_partition: c_int,
}

#[cfg(feature = "coreml")]
#[link(name = "tensorflowlite_c")]
extern "C" {
    pub fn TfLiteCoreMlDelegateCreate(options: *const TfLiteCoreMlDelegateOptions) -> *mut TfLiteDelegate;
    pub fn TfLiteCoreMlDelegateDelete(delegate: *mut TfLiteDelegate);
}

// =============================================================================
// Metal Delegate
// =============================================================================

#[cfg(feature = "metal")]
#[link(name = "tensorflowlite_c")]
extern "C" {
    /// A null `options` selects the defaults.
    pub fn TFLGpuDelegateCreate(options: *const c_void) -> *mut TfLiteDelegate;
    pub fn TFLGpuDelegateDelete(delegate: *mut TfLiteDelegate);
}
