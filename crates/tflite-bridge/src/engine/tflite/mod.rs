//! TensorFlow Lite engine over the C API.
//!
//! # Build Requirements
//!
//! Enable the `tflite` feature and make `libtensorflowlite_c` visible to the
//! linker. The `coreml` and `metal` features additionally need a library
//! built with the respective delegate.
//!
//! # Safety
//!
//! Handles free their C objects on drop. The engine contract keeps the model
//! bytes alive until the model and every interpreter are gone; delegates are
//! owned by the interpreter handle and deleted after the interpreter.

mod sys;

use super::{EngineStatus, InferenceEngine, Interpreter, InterpreterOptions, TensorView, TensorViewMut};
use crate::buffer::ForeignBuffer;
use crate::delegate::Delegate;
use crate::error::TensorRole;
use crate::tensor::{tensor_name_or_default, ElementType};
use std::ffi::CStr;
use std::ptr::NonNull;

/// Engine backed by `libtensorflowlite_c`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TfLiteEngine;

impl TfLiteEngine {
    pub fn new() -> Self {
        Self
    }
}

/// A parsed `TfLiteModel`.
pub struct TfLiteModel {
    ptr: NonNull<sys::TfLiteModel>,
}

// The model is immutable after creation.
unsafe impl Send for TfLiteModel {}
unsafe impl Sync for TfLiteModel {}

impl Drop for TfLiteModel {
    fn drop(&mut self) {
        unsafe { sys::TfLiteModelDelete(self.ptr.as_ptr()) };
    }
}

struct DelegateHandle {
    ptr: NonNull<sys::TfLiteDelegate>,
    kind: Delegate,
}

impl DelegateHandle {
    fn create(kind: Delegate) -> Option<Self> {
        let ptr: *mut sys::TfLiteDelegate = match kind {
            #[cfg(feature = "coreml")]
            Delegate::CoreMl => {
                let options = sys::TfLiteCoreMlDelegateOptions {
                    enabled_devices: 1,
                    coreml_version: 0,
                    max_delegated_partitions: 0,
                    min_nodes_per_partition: 2,
                };
                unsafe { sys::TfLiteCoreMlDelegateCreate(&options) }
            }
            #[cfg(feature = "metal")]
            Delegate::Metal => unsafe { sys::TFLGpuDelegateCreate(std::ptr::null()) },
            #[allow(unreachable_patterns)]
            _ => std::ptr::null_mut(),
        };
        NonNull::new(ptr).map(|ptr| Self { ptr, kind })
    }
}

impl Drop for DelegateHandle {
    fn drop(&mut self) {
        match self.kind {
            #[cfg(feature = "coreml")]
            Delegate::CoreMl => unsafe { sys::TfLiteCoreMlDelegateDelete(self.ptr.as_ptr()) },
            #[cfg(feature = "metal")]
            Delegate::Metal => unsafe { sys::TFLGpuDelegateDelete(self.ptr.as_ptr()) },
            #[allow(unreachable_patterns)]
            _ => {}
        }
    }
}

/// A `TfLiteInterpreter` and the delegates attached to it.
///
/// `Send` but not `Sync`: invoke mutates interpreter state. Sessions keep it
/// behind a mutex.
pub struct TfLiteInterpreter {
    ptr: NonNull<sys::TfLiteInterpreter>,
    // Deleted after the interpreter, in Drop.
    delegates: Vec<DelegateHandle>,
    input_names: Vec<String>,
    output_names: Vec<String>,
}

unsafe impl Send for TfLiteInterpreter {}

impl Drop for TfLiteInterpreter {
    fn drop(&mut self) {
        unsafe { sys::TfLiteInterpreterDelete(self.ptr.as_ptr()) };
        self.delegates.clear();
    }
}

impl TfLiteInterpreter {
    fn new(ptr: NonNull<sys::TfLiteInterpreter>, delegates: Vec<DelegateHandle>) -> Self {
        let mut interpreter = Self {
            ptr,
            delegates,
            input_names: Vec::new(),
            output_names: Vec::new(),
        };
        interpreter.input_names = (0..interpreter.input_count())
            .map(|index| {
                let tensor = unsafe { sys::TfLiteInterpreterGetInputTensor(ptr.as_ptr(), index as i32) };
                unsafe { tensor_name(tensor, TensorRole::Input, index) }
            })
            .collect();
        interpreter.output_names = (0..interpreter.output_count())
            .map(|index| {
                let tensor = unsafe { sys::TfLiteInterpreterGetOutputTensor(ptr.as_ptr(), index as i32) };
                unsafe { tensor_name(tensor, TensorRole::Output, index) }
            })
            .collect();
        interpreter
    }

    /// # Safety
    ///
    /// `tensor` must be null or a tensor owned by this interpreter.
    unsafe fn describe(
        &self,
        tensor: *const sys::TfLiteTensor,
        role: TensorRole,
        index: usize,
    ) -> Option<(&str, Vec<usize>, ElementType, *mut u8, usize)> {
        if tensor.is_null() {
            return None;
        }
        let names = match role {
            TensorRole::Input => &self.input_names,
            TensorRole::Output => &self.output_names,
        };
        let name = names.get(index)?.as_str();
        let rank = sys::TfLiteTensorNumDims(tensor).max(0);
        let shape = (0..rank)
            .map(|dim| sys::TfLiteTensorDim(tensor, dim).max(0) as usize)
            .collect();
        let element_type = ElementType::from_tflite_code(sys::TfLiteTensorType(tensor));
        let data = sys::TfLiteTensorData(tensor) as *mut u8;
        let size = if data.is_null() { 0 } else { sys::TfLiteTensorByteSize(tensor) };
        Some((name, shape, element_type, data, size))
    }

    fn view(&self, tensor: *const sys::TfLiteTensor, role: TensorRole, index: usize) -> Option<TensorView<'_>> {
        let (name, shape, element_type, data, size) = unsafe { self.describe(tensor, role, index)? };
        let data: &[u8] = if size == 0 {
            &[]
        } else {
            // SAFETY: TFLite owns `size` bytes at `data` while the interpreter lives
            unsafe { std::slice::from_raw_parts(data, size) }
        };
        Some(TensorView {
            name,
            shape,
            element_type,
            data,
        })
    }
}

/// Name of `tensor`, or a positional name when it has none or it is not
/// valid UTF-8.
///
/// # Safety
///
/// `tensor` must be null or a live tensor.
unsafe fn tensor_name(tensor: *const sys::TfLiteTensor, role: TensorRole, index: usize) -> String {
    let name_ptr = if tensor.is_null() {
        std::ptr::null()
    } else {
        sys::TfLiteTensorName(tensor)
    };
    let name = if name_ptr.is_null() {
        None
    } else {
        CStr::from_ptr(name_ptr).to_str().ok()
    };
    tensor_name_or_default(name, role, index)
}

impl InferenceEngine for TfLiteEngine {
    type Model = TfLiteModel;
    type Interpreter = TfLiteInterpreter;

    fn name(&self) -> &str {
        "tflite"
    }

    fn parse_model(&self, bytes: &ForeignBuffer) -> Option<TfLiteModel> {
        if bytes.is_empty() {
            return None;
        }
        let ptr = unsafe { sys::TfLiteModelCreate(bytes.as_ptr().cast(), bytes.len()) };
        NonNull::new(ptr).map(|ptr| TfLiteModel { ptr })
    }

    fn create_interpreter(&self, model: &TfLiteModel, options: &InterpreterOptions) -> Option<TfLiteInterpreter> {
        let raw_options = NonNull::new(unsafe { sys::TfLiteInterpreterOptionsCreate() })?;

        let mut delegates = Vec::with_capacity(options.delegates.len());
        for &kind in &options.delegates {
            match DelegateHandle::create(kind) {
                Some(handle) => {
                    unsafe { sys::TfLiteInterpreterOptionsAddDelegate(raw_options.as_ptr(), handle.ptr.as_ptr()) };
                    delegates.push(handle);
                }
                None => {
                    log::warn!("Failed to create {} delegate", kind.display_name());
                    unsafe { sys::TfLiteInterpreterOptionsDelete(raw_options.as_ptr()) };
                    return None;
                }
            }
        }
        if let Some(threads) = options.num_threads {
            unsafe { sys::TfLiteInterpreterOptionsSetNumThreads(raw_options.as_ptr(), threads) };
        }

        let ptr = unsafe { sys::TfLiteInterpreterCreate(model.ptr.as_ptr(), raw_options.as_ptr()) };
        unsafe { sys::TfLiteInterpreterOptionsDelete(raw_options.as_ptr()) };

        NonNull::new(ptr).map(|ptr| TfLiteInterpreter::new(ptr, delegates))
    }
}

impl Interpreter for TfLiteInterpreter {
    fn allocate_tensors(&mut self) -> EngineStatus {
        EngineStatus::from_code(unsafe { sys::TfLiteInterpreterAllocateTensors(self.ptr.as_ptr()) })
    }

    fn invoke(&mut self) -> EngineStatus {
        EngineStatus::from_code(unsafe { sys::TfLiteInterpreterInvoke(self.ptr.as_ptr()) })
    }

    fn input_count(&self) -> usize {
        unsafe { sys::TfLiteInterpreterGetInputTensorCount(self.ptr.as_ptr()) }.max(0) as usize
    }

    fn output_count(&self) -> usize {
        unsafe { sys::TfLiteInterpreterGetOutputTensorCount(self.ptr.as_ptr()) }.max(0) as usize
    }

    fn input_tensor(&self, index: usize) -> Option<TensorView<'_>> {
        let raw_index = i32::try_from(index).ok()?;
        let tensor = unsafe { sys::TfLiteInterpreterGetInputTensor(self.ptr.as_ptr(), raw_index) };
        self.view(tensor, TensorRole::Input, index)
    }

    fn input_tensor_mut(&mut self, index: usize) -> Option<TensorViewMut<'_>> {
        let raw_index = i32::try_from(index).ok()?;
        let tensor = unsafe { sys::TfLiteInterpreterGetInputTensor(self.ptr.as_ptr(), raw_index) };
        let (name, shape, element_type, data, size) = unsafe { self.describe(tensor, TensorRole::Input, index)? };
        let data: &mut [u8] = if size == 0 {
            &mut []
        } else {
            // SAFETY: input tensor memory is owned by the interpreter, which is
            // exclusively borrowed for the lifetime of the view
            unsafe { std::slice::from_raw_parts_mut(data, size) }
        };
        Some(TensorViewMut {
            name,
            shape,
            element_type,
            data,
        })
    }

    fn output_tensor(&self, index: usize) -> Option<TensorView<'_>> {
        let raw_index = i32::try_from(index).ok()?;
        let tensor = unsafe { sys::TfLiteInterpreterGetOutputTensor(self.ptr.as_ptr(), raw_index) };
        self.view(tensor, TensorRole::Output, index)
    }
}
