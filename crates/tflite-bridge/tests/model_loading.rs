//! Integration tests for the model loading pipeline.
//!
//! Drives the loader the way a script would: call the installed global,
//! await the returned promise on the runtime thread, then inspect the session
//! host object or the rejection message.
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p tflite-bridge --test model_loading
//! ```

use std::sync::Arc;
use std::time::Duration;
use tflite_bridge::host::{JsError, RuntimeThread, Value};
use tflite_bridge::testing::fixtures::{self, BufferTracker};
use tflite_bridge::testing::mocks::MockEngine;
use tflite_bridge::{
    BackgroundExecutor, BridgeConfig, Delegate, InferenceSession, ModelFetcher, ModelLoader, ABANDONED_MESSAGE,
};

const WAIT: Duration = Duration::from_secs(5);

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Installs `loader`, calls the global with `args` and waits for the outcome.
fn load_via_global(runtime_thread: &RuntimeThread, loader: ModelLoader<MockEngine>, args: Vec<Value>) -> Result<Value, JsError> {
    let name = loader.config().global_name.clone();
    let promise = runtime_thread
        .call(move |rt| {
            loader.install(rt);
            let load = rt.global(&name);
            rt.call(&load, &args)
        })
        .unwrap()?;
    runtime_thread
        .await_promise(promise.as_promise().expect("loader returns a promise"), WAIT)
        .unwrap()
}

fn loader_with(
    runtime_thread: &RuntimeThread,
    engine: &MockEngine,
    fetcher: impl ModelFetcher + 'static,
) -> ModelLoader<MockEngine> {
    ModelLoader::new(engine.clone(), runtime_thread.invoker()).with_fetcher(fetcher)
}

fn args(url: &str, delegate: Option<&str>) -> Vec<Value> {
    let mut args = vec![Value::from(url)];
    if let Some(delegate) = delegate {
        args.push(Value::from(delegate));
    }
    args
}

// ─────────────────────────────────────────────────────────────────────────────
// Successful loads
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_load_without_hint_uses_default_delegate() {
    let runtime_thread = RuntimeThread::spawn().unwrap();
    let engine = MockEngine::new();
    let loader = loader_with(&runtime_thread, &engine, fixtures::static_fetcher(fixtures::model_bytes()));

    let session = load_via_global(&runtime_thread, loader, args("model.tflite", None)).unwrap();
    let delegate = runtime_thread
        .call(move |rt| rt.get_property(&session, "delegate"))
        .unwrap()
        .unwrap();
    assert_eq!(delegate.as_str(), Some("default"));
    assert!(engine.last_options().unwrap().delegates.is_empty());
}

#[test]
fn test_unknown_hint_falls_back_to_default() {
    let runtime_thread = RuntimeThread::spawn().unwrap();
    let engine = MockEngine::new();
    let loader = loader_with(&runtime_thread, &engine, fixtures::static_fetcher(fixtures::model_bytes()));

    let session = load_via_global(&runtime_thread, loader, args("model.tflite", Some("tpu"))).unwrap();
    let session = session.downcast_host_object::<InferenceSession<MockEngine>>().unwrap();
    assert_eq!(session.delegate(), Delegate::Default);
}

#[test]
fn test_supported_accelerator_is_configured() {
    let runtime_thread = RuntimeThread::spawn().unwrap();
    let engine = MockEngine::new().with_delegates(&[Delegate::Default, Delegate::CoreMl]);
    let loader = loader_with(&runtime_thread, &engine, fixtures::static_fetcher(fixtures::model_bytes()));

    let session = load_via_global(&runtime_thread, loader, args("model.tflite", Some("core-ml"))).unwrap();
    let session = session.downcast_host_object::<InferenceSession<MockEngine>>().unwrap();
    assert_eq!(session.delegate(), Delegate::CoreMl);
    assert_eq!(engine.last_options().unwrap().delegates, vec![Delegate::CoreMl]);
}

#[test]
fn test_successful_load_moves_one_buffer_into_session() {
    let runtime_thread = RuntimeThread::spawn().unwrap();
    let engine = MockEngine::new();
    let tracker = BufferTracker::new();
    let loader = loader_with(
        &runtime_thread,
        &engine,
        fixtures::tracked_fetcher(tracker.clone(), fixtures::model_bytes()),
    );

    let session = load_via_global(&runtime_thread, loader, args("model.tflite", None)).unwrap();
    assert_eq!(tracker.allocated(), 1);
    assert_eq!(tracker.live(), 1);

    drop(session);
    assert!(fixtures::wait_until(WAIT, || tracker.released() == 1));
    assert_eq!(engine.dropped(), vec!["interpreter", "model"]);
}

#[test]
fn test_load_settles_on_runtime_thread() {
    let runtime_thread = RuntimeThread::spawn().unwrap();
    let runtime_id = runtime_thread.thread_id();
    let engine = MockEngine::new();
    let loader = loader_with(&runtime_thread, &engine, fixtures::static_fetcher(fixtures::model_bytes()));
    let (tx, rx) = std::sync::mpsc::channel();

    runtime_thread
        .call(move |rt| {
            let promise = loader.load(rt, "model.tflite", None).unwrap();
            assert!(promise.is_pending());
            promise.on_settled(rt, move |_rt, outcome| {
                let _ = tx.send((std::thread::current().id(), outcome.is_ok()));
            });
        })
        .unwrap();

    let (thread_id, ok) = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(thread_id, runtime_id);
    assert!(ok);
}

#[test]
fn test_load_from_file_with_url_fetcher() {
    use std::io::Write;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&fixtures::model_bytes()).unwrap();
    let path = file.path().to_str().unwrap().to_string();

    let runtime_thread = RuntimeThread::spawn().unwrap();
    let loader = ModelLoader::new(MockEngine::new(), runtime_thread.invoker());
    let session = load_via_global(&runtime_thread, loader, args(&format!("file://{path}"), None)).unwrap();
    assert!(session.downcast_host_object::<InferenceSession<MockEngine>>().is_some());
}

#[test]
fn test_load_on_tokio_blocking_pool() {
    let tokio_runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .build()
        .unwrap();
    let runtime_thread = RuntimeThread::spawn().unwrap();
    let loader = ModelLoader::new(MockEngine::new(), runtime_thread.invoker())
        .with_fetcher(fixtures::static_fetcher(fixtures::model_bytes()))
        .with_executor(BackgroundExecutor::tokio(tokio_runtime.handle().clone()));

    let session = load_via_global(&runtime_thread, loader, args("model.tflite", None)).unwrap();
    assert!(session.downcast_host_object::<InferenceSession<MockEngine>>().is_some());
}

#[test]
fn test_custom_global_name() {
    let runtime_thread = RuntimeThread::spawn().unwrap();
    let config = BridgeConfig::default().with_global_name("__loadModel");
    let loader = ModelLoader::with_config(MockEngine::new(), runtime_thread.invoker(), config)
        .with_fetcher(fixtures::static_fetcher(fixtures::model_bytes()));

    let installed = runtime_thread
        .call(move |rt| {
            loader.install(rt);
            (rt.has_global("__loadModel"), rt.has_global("__loadTensorflowModel"))
        })
        .unwrap();
    assert_eq!(installed, (true, false));
}

// ─────────────────────────────────────────────────────────────────────────────
// Failed loads
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_unreachable_url_rejects_with_fetch_error() {
    let runtime_thread = RuntimeThread::spawn().unwrap();
    let engine = MockEngine::new();
    let loader = loader_with(&runtime_thread, &engine, fixtures::unreachable_fetcher());

    let err = load_via_global(&runtime_thread, loader, args("https://unreachable.invalid/m.tflite", None)).unwrap_err();
    assert!(err.message().contains("https://unreachable.invalid/m.tflite"));
    assert!(err.message().contains("connection refused"));
    assert_eq!(engine.stats().parse_calls(), 0);
}

#[test]
fn test_interrupted_download_releases_partial_buffer() {
    let runtime_thread = RuntimeThread::spawn().unwrap();
    let engine = MockEngine::new();
    let tracker = BufferTracker::new();
    let loader = loader_with(
        &runtime_thread,
        &engine,
        fixtures::partial_download_fetcher(tracker.clone(), fixtures::model_bytes()),
    );

    let err = load_via_global(&runtime_thread, loader, args("https://models.invalid/m.tflite", None)).unwrap_err();
    assert!(err.message().contains("https://models.invalid/m.tflite"), "{}", err.message());
    assert!(err.message().contains("partial download"), "{}", err.message());
    assert_eq!(tracker.allocated(), 1);
    assert_eq!(tracker.released(), tracker.allocated());
    assert_eq!(tracker.live(), 0);
    assert_eq!(engine.stats().parse_calls(), 0);
}

#[test]
fn test_load_on_shut_down_tokio_runtime_rejects() {
    let tokio_runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .build()
        .unwrap();
    let handle = tokio_runtime.handle().clone();
    drop(tokio_runtime);

    let runtime_thread = RuntimeThread::spawn().unwrap();
    let engine = MockEngine::new();
    let loader = loader_with(&runtime_thread, &engine, fixtures::static_fetcher(fixtures::model_bytes()))
        .with_executor(BackgroundExecutor::tokio(handle));

    let err = load_via_global(&runtime_thread, loader, args("model.tflite", None)).unwrap_err();
    assert_eq!(err.message(), ABANDONED_MESSAGE);
    assert_eq!(engine.stats().parse_calls(), 0);
}

#[test]
fn test_parse_failure_releases_buffer_once() {
    let runtime_thread = RuntimeThread::spawn().unwrap();
    let engine = MockEngine::new();
    let tracker = BufferTracker::new();
    let loader = loader_with(
        &runtime_thread,
        &engine,
        fixtures::tracked_fetcher(tracker.clone(), fixtures::invalid_model_bytes()),
    );

    let err = load_via_global(&runtime_thread, loader, args("broken.tflite", None)).unwrap_err();
    assert_eq!(err.message(), "Failed to load model from \"broken.tflite\"!");
    assert!(fixtures::wait_until(WAIT, || tracker.released() == 1));
    assert_eq!(tracker.allocated(), 1);
    assert_eq!(tracker.live(), 0);
}

#[test]
fn test_unsupported_backend_rejected_before_allocation() {
    let runtime_thread = RuntimeThread::spawn().unwrap();
    let engine = MockEngine::new();
    let tracker = BufferTracker::new();
    let loader = loader_with(
        &runtime_thread,
        &engine,
        fixtures::tracked_fetcher(tracker.clone(), fixtures::model_bytes()),
    );

    let err = load_via_global(&runtime_thread, loader, args("model.tflite", Some("metal"))).unwrap_err();
    assert!(err.message().contains("not supported"), "{}", err.message());
    assert_eq!(engine.stats().create_calls(), 0);
    assert_eq!(engine.stats().allocate_calls(), 0);
    assert!(fixtures::wait_until(WAIT, || tracker.live() == 0));
    assert_eq!(tracker.released(), 1);
}

#[test]
fn test_interpreter_failure_rejects() {
    let runtime_thread = RuntimeThread::spawn().unwrap();
    let engine = MockEngine::new().failing_interpreter();
    let tracker = BufferTracker::new();
    let loader = loader_with(
        &runtime_thread,
        &engine,
        fixtures::tracked_fetcher(tracker.clone(), fixtures::model_bytes()),
    );

    let err = load_via_global(&runtime_thread, loader, args("model.tflite", None)).unwrap_err();
    assert_eq!(err.message(), "Failed to create TFLite interpreter from model \"model.tflite\"!");
    assert!(fixtures::wait_until(WAIT, || tracker.live() == 0));
}

#[test]
fn test_allocation_failure_rejects_with_status() {
    let runtime_thread = RuntimeThread::spawn().unwrap();
    let engine = MockEngine::new().with_allocate_status(tflite_bridge::EngineStatus::from_code(1));
    let tracker = BufferTracker::new();
    let loader = loader_with(
        &runtime_thread,
        &engine,
        fixtures::tracked_fetcher(tracker.clone(), fixtures::model_bytes()),
    );

    let err = load_via_global(&runtime_thread, loader, args("model.tflite", None)).unwrap_err();
    assert_eq!(err.message(), "Failed to allocate memory for input/output tensors! Status: 1");
    assert!(fixtures::wait_until(WAIT, || tracker.live() == 0));
    assert_eq!(engine.dropped(), vec!["interpreter", "model"]);
}

#[test]
fn test_empty_path_throws_synchronously() {
    let runtime_thread = RuntimeThread::spawn().unwrap();
    let loader = ModelLoader::new(MockEngine::new(), runtime_thread.invoker());
    let result = runtime_thread
        .call(move |rt| {
            loader.install(rt);
            let load = rt.global("__loadTensorflowModel");
            rt.call(&load, &[Value::from("")]).map(|_| ())
        })
        .unwrap();
    assert!(result.unwrap_err().message().contains("must not be empty"));
}

#[test]
fn test_each_load_resolves_its_own_session() {
    let runtime_thread = RuntimeThread::spawn().unwrap();
    let engine = MockEngine::new();
    let loader = loader_with(&runtime_thread, &engine, fixtures::static_fetcher(fixtures::model_bytes()));

    let promises = runtime_thread
        .call(move |rt| {
            (0..3)
                .map(|i| loader.load(rt, &format!("model-{i}.tflite"), None).unwrap())
                .collect::<Vec<_>>()
        })
        .unwrap();

    let mut urls = Vec::new();
    for promise in &promises {
        let value = runtime_thread.await_promise(promise, WAIT).unwrap().unwrap();
        let session = value.downcast_host_object::<InferenceSession<MockEngine>>().unwrap();
        urls.push(session.model_url().to_string());
    }
    assert_eq!(urls, vec!["model-0.tflite", "model-1.tflite", "model-2.tflite"]);
    assert!(!Arc::ptr_eq(
        promises[0].outcome().unwrap().unwrap().as_host_object().unwrap(),
        promises[1].outcome().unwrap().unwrap().as_host_object().unwrap()
    ));
}
