//! Asynchronous model loading and the runtime entry point.
//!
//! ```text
//! __loadTensorflowModel(path, delegate?)      runtime thread
//!   └─ Promise (returned immediately)
//!        worker: fetch → parse → delegate check → create interpreter
//!                → allocate tensors → session
//!        runtime thread: resolve(session host object) | reject(message)
//! ```

use crate::buffer::ForeignBuffer;
use crate::config::BridgeConfig;
use crate::delegate::Delegate;
use crate::engine::{InferenceEngine, InterpreterOptions};
use crate::error::{BridgeError, BridgeResult};
use crate::fetch::{ModelFetcher, UrlFetcher};
use crate::host::{CallInvoker, HostFunction, Runtime, Value};
use crate::promise::{create_promise, Promise};
use crate::session::{EngineCore, InferenceSession, SessionContext};
use crate::worker::BackgroundExecutor;
use std::sync::Arc;
use std::time::Instant;

/// Loads models into [`InferenceSession`]s.
pub struct ModelLoader<E: InferenceEngine> {
    engine: Arc<E>,
    fetcher: Arc<dyn ModelFetcher>,
    context: SessionContext,
    config: BridgeConfig,
}

impl<E: InferenceEngine> Clone for ModelLoader<E> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            fetcher: self.fetcher.clone(),
            context: self.context.clone(),
            config: self.config.clone(),
        }
    }
}

impl<E: InferenceEngine> ModelLoader<E> {
    /// Loader with the default config and a [`UrlFetcher`].
    pub fn new(engine: E, invoker: Arc<dyn CallInvoker>) -> Self {
        Self::with_config(engine, invoker, BridgeConfig::default())
    }

    pub fn with_config(engine: E, invoker: Arc<dyn CallInvoker>, config: BridgeConfig) -> Self {
        Self {
            engine: Arc::new(engine),
            fetcher: Arc::new(UrlFetcher::from_config(&config)),
            context: SessionContext::from_config(invoker, &config),
            config,
        }
    }

    /// Replaces the fetcher.
    pub fn with_fetcher(mut self, fetcher: impl ModelFetcher + 'static) -> Self {
        self.fetcher = Arc::new(fetcher);
        self
    }

    /// Replaces the background executor used for loads and runs.
    pub fn with_executor(mut self, executor: BackgroundExecutor) -> Self {
        self.context.executor = executor;
        self
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Installs the global loader function into `runtime`.
    ///
    /// The function takes `(modelPath, delegate?)` and returns a promise. A
    /// missing or non-string path throws; a non-string delegate is ignored.
    pub fn install(&self, runtime: &mut Runtime) {
        let loader = self.clone();
        let name = self.config.global_name.clone();
        let function = HostFunction::new(&name, 2, move |rt, args| {
            let path = match args.first() {
                Some(Value::String(path)) => path.clone(),
                Some(other) => {
                    return Err(BridgeError::InvalidArgument(format!(
                        "model path must be a string, got {}",
                        other.type_name()
                    ))
                    .into())
                }
                None => return Err(BridgeError::InvalidArgument("model path is required".to_string()).into()),
            };
            let hint = args.get(1).and_then(Value::as_str);
            Ok(Value::Promise(loader.load(rt, &path, hint)?))
        });
        runtime.set_global(&name, Value::Function(function));
        log::info!("Installed {} (engine: {})", name, self.engine.name());
    }

    /// Starts loading `model_url` and returns a promise for the session host
    /// object.
    pub fn load(&self, runtime: &mut Runtime, model_url: &str, delegate_hint: Option<&str>) -> BridgeResult<Promise> {
        if model_url.is_empty() {
            return Err(BridgeError::InvalidArgument("model path must not be empty".to_string()));
        }
        let delegate = Delegate::from_optional_hint(delegate_hint);
        log::info!("Loading model \"{}\" with {} delegate", model_url, delegate);

        let loader = self.clone();
        let url = model_url.to_string();
        let promise = create_promise(runtime, &self.context.invoker, |deferred| {
            let worker_deferred = deferred.clone();
            let spawned = self.context.executor.spawn("load", move || {
                let started = Instant::now();
                match loader.build_session(&url, delegate) {
                    Ok(session) => {
                        log::info!("Successfully loaded model \"{}\" in {:?}", url, started.elapsed());
                        worker_deferred.settle_with(move |_runtime| Ok(Value::HostObject(Arc::new(session))));
                    }
                    Err(err) => {
                        log::warn!("Failed to load model \"{}\": {}", url, err);
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

    /// Fetches, parses and builds a ready session. Blocking; runs on a worker.
    pub fn build_session(&self, model_url: &str, delegate: Delegate) -> BridgeResult<InferenceSession<E>> {
        let model_bytes = self.fetcher.fetch(model_url)?;
        let core = self.build_core(model_url, model_bytes, delegate)?;
        InferenceSession::new(core, delegate, model_url, self.context.clone())
    }

    fn build_core(&self, model_url: &str, model_bytes: ForeignBuffer, delegate: Delegate) -> BridgeResult<EngineCore<E>> {
        let model = self.engine.parse_model(&model_bytes).ok_or_else(|| BridgeError::ModelParse {
            url: model_url.to_string(),
        })?;

        if !self.engine.supports_delegate(delegate) {
            return Err(BridgeError::BackendUnavailable { delegate });
        }

        let mut options = InterpreterOptions::new();
        options.add_delegate(delegate);
        options.num_threads = self.config.num_threads;
        let interpreter = self
            .engine
            .create_interpreter(&model, &options)
            .ok_or_else(|| BridgeError::SessionCreation {
                url: model_url.to_string(),
            })?;

        Ok(EngineCore::new(interpreter, model, model_bytes))
    }
}
