//! Mock engine for testing.
//!
//! [`MockEngine`] implements the engine traits in memory. It can be configured
//! to:
//! - Expose any set of input/output tensors
//! - Compute outputs with a custom kernel (default: doubles the first input)
//! - Fail at parse, interpreter creation, allocation or invocation
//! - Report which delegates it supports
//! - Count calls and record the order in which handles are dropped
//!
//! Clones share counters and controls, so a test can keep a clone after
//! handing the engine to a loader.
//!
//! # Example
//!
//! ```rust,ignore
//! use tflite_bridge::testing::mocks::MockEngine;
//!
//! let engine = MockEngine::new().with_delegates(&[Delegate::Default, Delegate::Metal]);
//! let stats = engine.stats();
//! let loader = ModelLoader::new(engine.clone(), invoker);
//! // ...
//! assert_eq!(stats.invoke_calls(), 1);
//! ```

use crate::buffer::ForeignBuffer;
use crate::delegate::Delegate;
use crate::engine::{EngineStatus, InferenceEngine, Interpreter, InterpreterOptions, TensorView, TensorViewMut};
use crate::error::{BridgeError, BridgeResult, TensorRole};
use crate::host::{TypedArray, Value};
use crate::session::EngineCore;
use crate::tensor::{copy_values_in, tensor_name_or_default, ElementType};
use ndarray::Array1;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// File identifier a mock model must carry at bytes 4..8.
pub const MODEL_IDENTIFIER: &[u8; 4] = b"TFL3";

/// Shared record of dropped handles, in drop order.
pub type DropLog = Arc<Mutex<Vec<&'static str>>>;

/// Computes outputs from inputs on `invoke`.
pub type MockKernel = Arc<dyn Fn(&[MockTensor], &mut [MockTensor]) + Send + Sync>;

/// Declared tensor of a mock model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockTensorSpec {
    pub name: String,
    pub shape: Vec<usize>,
    pub element_type: ElementType,
}

impl MockTensorSpec {
    pub fn new(name: impl Into<String>, shape: Vec<usize>, element_type: ElementType) -> Self {
        Self {
            name: name.into(),
            shape,
            element_type,
        }
    }

    pub fn float32(name: impl Into<String>, shape: Vec<usize>) -> Self {
        Self::new(name, shape, ElementType::Float32)
    }

    pub fn byte_size(&self) -> usize {
        self.shape.iter().product::<usize>() * self.element_type.byte_width().unwrap_or(0)
    }
}

/// A tensor inside a [`MockInterpreter`]. `data` is empty until allocation.
#[derive(Debug, Clone)]
pub struct MockTensor {
    pub spec: MockTensorSpec,
    pub data: Vec<u8>,
}

impl MockTensor {
    /// Unnamed specs get the positional name a real engine would report.
    fn unallocated(spec: &MockTensorSpec, role: TensorRole, index: usize) -> Self {
        let mut spec = spec.clone();
        spec.name = tensor_name_or_default(Some(&spec.name), role, index);
        Self { spec, data: Vec::new() }
    }

    /// Elements widened to `f64`. Empty for types without a typed-array form.
    pub fn values(&self) -> Vec<f64> {
        match self.spec.element_type.typed_array_kind() {
            Some(kind) => TypedArray::from_bytes(kind, self.data.clone()).to_f64_vec(),
            None => Vec::new(),
        }
    }

    /// Overwrites the elements, converting to the tensor's element type.
    pub fn write_values(&mut self, values: &[f64]) -> BridgeResult<()> {
        let values: Vec<Value> = values.iter().map(|&v| Value::Number(v)).collect();
        copy_values_in(&values, &mut self.view_mut())
    }

    fn view(&self) -> TensorView<'_> {
        TensorView {
            name: &self.spec.name,
            shape: self.spec.shape.clone(),
            element_type: self.spec.element_type,
            data: &self.data,
        }
    }

    fn view_mut(&mut self) -> TensorViewMut<'_> {
        TensorViewMut {
            name: &self.spec.name,
            shape: self.spec.shape.clone(),
            element_type: self.spec.element_type,
            data: &mut self.data,
        }
    }
}

/// Kernel that fills every output with the first input doubled, repeating the
/// input when the output is longer.
pub fn doubling_kernel() -> MockKernel {
    Arc::new(|inputs: &[MockTensor], outputs: &mut [MockTensor]| {
        let Some(first) = inputs.first() else {
            return;
        };
        let doubled = Array1::from(first.values()) * 2.0;
        if doubled.is_empty() {
            return;
        }
        for output in outputs.iter_mut() {
            let count = output.spec.shape.iter().product::<usize>();
            let values: Vec<f64> = (0..count).map(|i| doubled[i % doubled.len()]).collect();
            if let Err(err) = output.write_values(&values) {
                log::debug!("doubling kernel skipped {}: {}", output.spec.name, err);
            }
        }
    })
}

/// Call counters shared by an engine and everything it creates.
#[derive(Debug, Default)]
pub struct MockEngineStats {
    parse_calls: AtomicUsize,
    create_calls: AtomicUsize,
    allocate_calls: AtomicUsize,
    invoke_calls: AtomicUsize,
}

impl MockEngineStats {
    pub fn parse_calls(&self) -> usize {
        self.parse_calls.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn allocate_calls(&self) -> usize {
        self.allocate_calls.load(Ordering::SeqCst)
    }

    pub fn invoke_calls(&self) -> usize {
        self.invoke_calls.load(Ordering::SeqCst)
    }
}

/// In-memory engine.
#[derive(Clone)]
pub struct MockEngine {
    inputs: Vec<MockTensorSpec>,
    outputs: Vec<MockTensorSpec>,
    kernel: MockKernel,
    delegates: Vec<Delegate>,
    fail_parse: bool,
    fail_create: bool,
    allocate_status: EngineStatus,
    invoke_status: Arc<AtomicI32>,
    invoke_delay: Option<Duration>,
    missing_output: Option<usize>,
    stats: Arc<MockEngineStats>,
    drop_log: DropLog,
    last_options: Arc<Mutex<Option<InterpreterOptions>>>,
}

impl MockEngine {
    /// One `float32[1,4]` input named "input", one `float32[1,4]` output named
    /// "output", the doubling kernel, CPU only.
    pub fn new() -> Self {
        Self {
            inputs: vec![MockTensorSpec::float32("input", vec![1, 4])],
            outputs: vec![MockTensorSpec::float32("output", vec![1, 4])],
            kernel: doubling_kernel(),
            delegates: vec![Delegate::Default],
            fail_parse: false,
            fail_create: false,
            allocate_status: EngineStatus::OK,
            invoke_status: Arc::new(AtomicI32::new(EngineStatus::OK.code())),
            invoke_delay: None,
            missing_output: None,
            stats: Arc::new(MockEngineStats::default()),
            drop_log: Arc::new(Mutex::new(Vec::new())),
            last_options: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_inputs(mut self, inputs: Vec<MockTensorSpec>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_outputs(mut self, outputs: Vec<MockTensorSpec>) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn with_kernel<F>(mut self, kernel: F) -> Self
    where
        F: Fn(&[MockTensor], &mut [MockTensor]) + Send + Sync + 'static,
    {
        self.kernel = Arc::new(kernel);
        self
    }

    /// Delegates reported as supported.
    pub fn with_delegates(mut self, delegates: &[Delegate]) -> Self {
        self.delegates = delegates.to_vec();
        self
    }

    /// Every parse fails.
    pub fn failing_parse(mut self) -> Self {
        self.fail_parse = true;
        self
    }

    /// Every interpreter creation fails.
    pub fn failing_interpreter(mut self) -> Self {
        self.fail_create = true;
        self
    }

    pub fn with_allocate_status(mut self, status: EngineStatus) -> Self {
        self.allocate_status = status;
        self
    }

    /// Each invoke sleeps this long before computing.
    pub fn with_invoke_delay(mut self, delay: Duration) -> Self {
        self.invoke_delay = Some(delay);
        self
    }

    /// The output tensor at `index` cannot be read.
    pub fn with_missing_output(mut self, index: usize) -> Self {
        self.missing_output = Some(index);
        self
    }

    /// Status returned by subsequent invokes, including on live interpreters.
    pub fn set_invoke_status(&self, status: EngineStatus) {
        self.invoke_status.store(status.code(), Ordering::SeqCst);
    }

    pub fn stats(&self) -> Arc<MockEngineStats> {
        self.stats.clone()
    }

    pub fn drop_log(&self) -> DropLog {
        self.drop_log.clone()
    }

    /// Snapshot of the drop log.
    pub fn dropped(&self) -> Vec<&'static str> {
        self.drop_log.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Options passed to the most recent `create_interpreter`.
    pub fn last_options(&self) -> Option<InterpreterOptions> {
        self.last_options.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Parses `model_bytes` and creates a CPU interpreter, without allocating.
    pub fn build_core(&self, model_bytes: ForeignBuffer) -> BridgeResult<EngineCore<MockEngine>> {
        let model = self.parse_model(&model_bytes).ok_or_else(|| BridgeError::ModelParse {
            url: "mock".to_string(),
        })?;
        let interpreter = self
            .create_interpreter(&model, &InterpreterOptions::new())
            .ok_or_else(|| BridgeError::SessionCreation {
                url: "mock".to_string(),
            })?;
        Ok(EngineCore::new(interpreter, model, model_bytes))
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Parsed mock model.
pub struct MockModel {
    drop_log: DropLog,
}

impl Drop for MockModel {
    fn drop(&mut self) {
        self.drop_log.lock().unwrap_or_else(|e| e.into_inner()).push("model");
    }
}

/// Interpreter over in-memory tensors.
pub struct MockInterpreter {
    inputs: Vec<MockTensor>,
    outputs: Vec<MockTensor>,
    kernel: MockKernel,
    allocate_status: EngineStatus,
    invoke_status: Arc<AtomicI32>,
    invoke_delay: Option<Duration>,
    missing_output: Option<usize>,
    stats: Arc<MockEngineStats>,
    drop_log: DropLog,
}

impl Drop for MockInterpreter {
    fn drop(&mut self) {
        self.drop_log.lock().unwrap_or_else(|e| e.into_inner()).push("interpreter");
    }
}

impl InferenceEngine for MockEngine {
    type Model = MockModel;
    type Interpreter = MockInterpreter;

    fn name(&self) -> &str {
        "mock"
    }

    fn parse_model(&self, bytes: &ForeignBuffer) -> Option<MockModel> {
        self.stats.parse_calls.fetch_add(1, Ordering::SeqCst);
        let data = bytes.as_slice();
        if self.fail_parse || data.len() < 8 || &data[4..8] != MODEL_IDENTIFIER {
            return None;
        }
        Some(MockModel {
            drop_log: self.drop_log.clone(),
        })
    }

    fn supports_delegate(&self, delegate: Delegate) -> bool {
        self.delegates.contains(&delegate)
    }

    fn create_interpreter(&self, _model: &MockModel, options: &InterpreterOptions) -> Option<MockInterpreter> {
        self.stats.create_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_options.lock().unwrap_or_else(|e| e.into_inner()) = Some(options.clone());
        if self.fail_create {
            return None;
        }
        Some(MockInterpreter {
            inputs: self
                .inputs
                .iter()
                .enumerate()
                .map(|(index, spec)| MockTensor::unallocated(spec, TensorRole::Input, index))
                .collect(),
            outputs: self
                .outputs
                .iter()
                .enumerate()
                .map(|(index, spec)| MockTensor::unallocated(spec, TensorRole::Output, index))
                .collect(),
            kernel: self.kernel.clone(),
            allocate_status: self.allocate_status,
            invoke_status: self.invoke_status.clone(),
            invoke_delay: self.invoke_delay,
            missing_output: self.missing_output,
            stats: self.stats.clone(),
            drop_log: self.drop_log.clone(),
        })
    }
}

impl Interpreter for MockInterpreter {
    fn allocate_tensors(&mut self) -> EngineStatus {
        self.stats.allocate_calls.fetch_add(1, Ordering::SeqCst);
        if !self.allocate_status.is_ok() {
            return self.allocate_status;
        }
        for tensor in self.inputs.iter_mut().chain(self.outputs.iter_mut()) {
            tensor.data = vec![0; tensor.spec.byte_size()];
        }
        EngineStatus::OK
    }

    fn invoke(&mut self) -> EngineStatus {
        self.stats.invoke_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.invoke_delay {
            std::thread::sleep(delay);
        }
        let status = EngineStatus::from_code(self.invoke_status.load(Ordering::SeqCst));
        if status.is_ok() {
            (self.kernel)(&self.inputs, &mut self.outputs);
        }
        status
    }

    fn input_count(&self) -> usize {
        self.inputs.len()
    }

    fn output_count(&self) -> usize {
        self.outputs.len()
    }

    fn input_tensor(&self, index: usize) -> Option<TensorView<'_>> {
        self.inputs.get(index).map(MockTensor::view)
    }

    fn input_tensor_mut(&mut self, index: usize) -> Option<TensorViewMut<'_>> {
        self.inputs.get_mut(index).map(MockTensor::view_mut)
    }

    fn output_tensor(&self, index: usize) -> Option<TensorView<'_>> {
        if self.missing_output == Some(index) {
            return None;
        }
        self.outputs.get(index).map(MockTensor::view)
    }
}
