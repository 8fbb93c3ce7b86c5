//! Inference sessions exposed to the runtime.
//!
//! An [`InferenceSession`] wraps one interpreter built from one model. Scripts
//! see it as a host object with these properties:
//!
//! | Property | Value |
//! |----------|-------|
//! | `run(inputs)` | `Promise<TypedArray[]>`, invoked on a background worker |
//! | `runSync(inputs)` | `TypedArray[]`, invoked on the calling thread |
//! | `inputs` | `{ name, shape, type }[]` |
//! | `outputs` | `{ name, shape, type }[]` |
//! | `delegate` | `"default"`, `"core-ml"` or `"metal"` |
//!
//! Every run follows copy in, invoke, copy out. Output typed arrays come from
//! a per-session cache, so consecutive runs return the same array objects with
//! new contents.

use crate::buffer::ForeignBuffer;
use crate::config::BridgeConfig;
use crate::delegate::Delegate;
use crate::engine::{InferenceEngine, Interpreter};
use crate::error::{BridgeError, BridgeResult, TensorRole};
use crate::host::{CallInvoker, HostFunction, HostObject, JsError, Runtime, Value};
use crate::promise::{create_promise, Promise};
use crate::tensor::{copy_in, copy_out, copy_values_in, descriptor_of, TensorBridge, TensorDescriptor};
use crate::worker::BackgroundExecutor;
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

const PROPERTY_NAMES: [&str; 5] = ["run", "runSync", "inputs", "outputs", "delegate"];

/// The engine handles of a session and the bytes they point into.
pub struct EngineCore<E: InferenceEngine> {
    // Field order is drop order: interpreter, then model, then the bytes the
    // model was parsed from.
    interpreter: E::Interpreter,
    model: E::Model,
    model_bytes: ForeignBuffer,
}

impl<E: InferenceEngine> EngineCore<E> {
    pub fn new(interpreter: E::Interpreter, model: E::Model, model_bytes: ForeignBuffer) -> Self {
        Self {
            interpreter,
            model,
            model_bytes,
        }
    }

    pub fn model(&self) -> &E::Model {
        &self.model
    }
}

/// Runtime-side collaborators shared by every session from one loader.
#[derive(Clone)]
pub struct SessionContext {
    pub invoker: Arc<dyn CallInvoker>,
    pub executor: BackgroundExecutor,
    pub reject_overlapping_runs: bool,
}

impl SessionContext {
    pub fn new(invoker: Arc<dyn CallInvoker>) -> Self {
        Self::from_config(invoker, &BridgeConfig::default())
    }

    pub fn from_config(invoker: Arc<dyn CallInvoker>, config: &BridgeConfig) -> Self {
        Self {
            invoker,
            executor: BackgroundExecutor::thread(config.worker_thread_name.clone()),
            reject_overlapping_runs: config.reject_overlapping_runs,
        }
    }

    pub fn with_executor(mut self, executor: BackgroundExecutor) -> Self {
        self.executor = executor;
        self
    }
}

struct SessionInner<E: InferenceEngine> {
    core: Mutex<EngineCore<E>>,
    delegate: Delegate,
    model_url: String,
    outputs: TensorBridge,
    in_flight: AtomicBool,
    context: SessionContext,
}

impl<E: InferenceEngine> Drop for SessionInner<E> {
    fn drop(&mut self) {
        log::debug!("Releasing session for \"{}\"", self.model_url);
    }
}

/// Clears the in-flight flag when the run it guards ends.
struct RunGuard<E: InferenceEngine> {
    session: Option<Arc<SessionInner<E>>>,
}

impl<E: InferenceEngine> Drop for RunGuard<E> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            session.in_flight.store(false, Ordering::Release);
        }
    }
}

/// A loaded model bound to one interpreter. Clones share the same session.
pub struct InferenceSession<E: InferenceEngine> {
    inner: Arc<SessionInner<E>>,
}

impl<E: InferenceEngine> Clone for InferenceSession<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E: InferenceEngine> InferenceSession<E> {
    /// Allocates tensors and wraps the engine core in a session.
    ///
    /// On allocation failure the core is dropped, releasing the interpreter,
    /// model and bytes in that order.
    pub fn new(
        mut core: EngineCore<E>,
        delegate: Delegate,
        model_url: impl Into<String>,
        context: SessionContext,
    ) -> BridgeResult<Self> {
        let model_url = model_url.into();
        let status = core.interpreter.allocate_tensors();
        if !status.is_ok() {
            return Err(BridgeError::TensorAllocation { status });
        }
        log::debug!(
            "Allocated tensors for \"{}\" ({} model bytes, {} delegate)",
            model_url,
            core.model_bytes.len(),
            delegate
        );
        Ok(Self {
            inner: Arc::new(SessionInner {
                core: Mutex::new(core),
                delegate,
                model_url,
                outputs: TensorBridge::new(),
                in_flight: AtomicBool::new(false),
                context,
            }),
        })
    }

    pub fn delegate(&self) -> Delegate {
        self.inner.delegate
    }

    pub fn model_url(&self) -> &str {
        &self.inner.model_url
    }

    /// Whether a run is currently in flight.
    pub fn is_running(&self) -> bool {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// The output typed-array cache.
    pub fn output_cache(&self) -> &TensorBridge {
        &self.inner.outputs
    }

    pub fn input_descriptors(&self) -> BridgeResult<Vec<TensorDescriptor>> {
        let core = self.lock_core();
        (0..core.interpreter.input_count())
            .map(|index| {
                core.interpreter
                    .input_tensor(index)
                    .map(|tensor| descriptor_of(&tensor))
                    .ok_or(BridgeError::TensorIntrospection {
                        role: TensorRole::Input,
                        index,
                    })
            })
            .collect()
    }

    pub fn output_descriptors(&self) -> BridgeResult<Vec<TensorDescriptor>> {
        let core = self.lock_core();
        (0..core.interpreter.output_count())
            .map(|index| {
                core.interpreter
                    .output_tensor(index)
                    .map(|tensor| descriptor_of(&tensor))
                    .ok_or(BridgeError::TensorIntrospection {
                        role: TensorRole::Output,
                        index,
                    })
            })
            .collect()
    }

    /// Runs the model on the calling thread and returns the output arrays.
    pub fn run_sync(&self, runtime: &mut Runtime, inputs: &Value) -> BridgeResult<Value> {
        debug_assert!(runtime.is_owner_thread(), "runSync called off the runtime thread");
        let _guard = self.begin_run()?;
        let started = Instant::now();

        let mut core = self.lock_core();
        copy_inputs(&mut core.interpreter, inputs)?;
        invoke(&mut core.interpreter)?;
        let outputs = self.copy_outputs(&core.interpreter)?;

        log::debug!("runSync finished in {:?}", started.elapsed());
        Ok(outputs)
    }

    /// Copies inputs in now, invokes on a background worker and returns a
    /// promise for the output arrays.
    ///
    /// Argument and copy-in errors are returned directly; engine errors reject
    /// the promise.
    pub fn run(&self, runtime: &mut Runtime, inputs: &Value) -> BridgeResult<Promise> {
        let guard = self.begin_run()?;
        {
            let mut core = self.lock_core();
            copy_inputs(&mut core.interpreter, inputs)?;
        }

        let session = self.clone();
        let promise = create_promise(runtime, &self.inner.context.invoker, |deferred| {
            let worker_deferred = deferred.clone();
            let spawned = self.inner.context.executor.spawn("run", move || {
                let started = Instant::now();
                let invoked = {
                    let mut core = session.lock_core();
                    invoke(&mut core.interpreter)
                };
                log::debug!("run invoked in {:?}", started.elapsed());

                match invoked {
                    Ok(()) => {
                        worker_deferred.settle_with(move |_runtime| {
                            let outputs = {
                                let core = session.lock_core();
                                session.copy_outputs(&core.interpreter)
                            };
                            drop(guard);
                            outputs.map_err(JsError::from)
                        });
                    }
                    Err(err) => {
                        drop(guard);
                        worker_deferred.reject(err);
                    }
                }
            });
            if let Err(err) = spawned {
                deferred.reject(err);
            }
        });
        Ok(promise)
    }

    fn begin_run(&self) -> BridgeResult<RunGuard<E>> {
        if !self.inner.context.reject_overlapping_runs {
            return Ok(RunGuard { session: None });
        }
        if self.inner.in_flight.swap(true, Ordering::AcqRel) {
            return Err(BridgeError::SessionBusy);
        }
        Ok(RunGuard {
            session: Some(self.inner.clone()),
        })
    }

    fn copy_outputs(&self, interpreter: &E::Interpreter) -> BridgeResult<Value> {
        let count = interpreter.output_count();
        let mut outputs = Vec::with_capacity(count);
        for index in 0..count {
            let tensor = interpreter
                .output_tensor(index)
                .ok_or(BridgeError::TensorIntrospection {
                    role: TensorRole::Output,
                    index,
                })?;
            let buffer = self.inner.outputs.buffer_for(&tensor)?;
            copy_out(&tensor, &buffer)?;
            outputs.push(Value::TypedArray(buffer));
        }
        Ok(Value::Array(outputs))
    }

    fn lock_core(&self) -> MutexGuard<'_, EngineCore<E>> {
        self.inner.core.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn descriptors_value(descriptors: BridgeResult<Vec<TensorDescriptor>>) -> Result<Value, JsError> {
        Ok(Value::Array(descriptors?.iter().map(TensorDescriptor::to_value).collect()))
    }
}

fn copy_inputs<I: Interpreter>(interpreter: &mut I, inputs: &Value) -> BridgeResult<()> {
    let values = inputs.as_array().ok_or_else(|| {
        BridgeError::InvalidArgument(format!(
            "expected an array of input buffers, got {}",
            inputs.type_name()
        ))
    })?;

    let expected = interpreter.input_count();
    if values.len() != expected {
        return Err(BridgeError::InputCountMismatch {
            expected,
            actual: values.len(),
        });
    }

    for (index, value) in values.iter().enumerate() {
        let mut tensor = interpreter
            .input_tensor_mut(index)
            .ok_or(BridgeError::TensorIntrospection {
                role: TensorRole::Input,
                index,
            })?;
        match value {
            Value::TypedArray(array) => copy_in(array, &mut tensor)?,
            Value::Array(numbers) => copy_values_in(numbers, &mut tensor)?,
            other => {
                return Err(BridgeError::tensor_copy(format!(
                    "input {index} must be a typed array or an array of numbers, got {}",
                    other.type_name()
                )))
            }
        }
    }
    Ok(())
}

fn invoke<I: Interpreter>(interpreter: &mut I) -> BridgeResult<()> {
    let status = interpreter.invoke();
    if status.is_ok() {
        Ok(())
    } else {
        Err(BridgeError::EngineInvocation { status })
    }
}

impl<E: InferenceEngine> HostObject for InferenceSession<E> {
    fn get(&self, _runtime: &mut Runtime, name: &str) -> Result<Value, JsError> {
        match name {
            "run" => {
                let session = self.clone();
                Ok(Value::Function(HostFunction::new("runModel", 1, move |rt, args| {
                    let inputs = args.first().cloned().unwrap_or_default();
                    Ok(Value::Promise(session.run(rt, &inputs)?))
                })))
            }
            "runSync" => {
                let session = self.clone();
                Ok(Value::Function(HostFunction::new("runModelSync", 1, move |rt, args| {
                    let inputs = args.first().cloned().unwrap_or_default();
                    Ok(session.run_sync(rt, &inputs)?)
                })))
            }
            "inputs" => Self::descriptors_value(self.input_descriptors()),
            "outputs" => Self::descriptors_value(self.output_descriptors()),
            "delegate" => Ok(Value::from(self.delegate().as_str())),
            _ => Ok(Value::Undefined),
        }
    }

    fn property_names(&self) -> Vec<String> {
        PROPERTY_NAMES.iter().map(|name| name.to_string()).collect()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
