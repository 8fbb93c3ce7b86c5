//! Posting work onto the runtime thread.
//!
//! Background workers never touch the [`Runtime`] directly. They hand a
//! [`RuntimeJob`] to a [`CallInvoker`], which runs it later on the runtime
//! thread. [`RuntimeThread`] is a channel-driven implementation: one thread
//! owns the runtime and drains queued jobs in order.

use super::runtime::Runtime;
use super::value::{JsError, Value};
use crate::error::{BridgeError, BridgeResult};
use crate::promise::Promise;
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

/// A unit of work executed on the runtime thread.
pub type RuntimeJob = Box<dyn FnOnce(&mut Runtime) + Send + 'static>;

/// Schedules jobs onto the runtime thread. Callable from any thread.
pub trait CallInvoker: Send + Sync {
    /// Queues `job`. Jobs run in submission order. If the runtime is gone the
    /// job is dropped without running.
    fn invoke_async(&self, job: RuntimeJob);
}

enum Message {
    Job(RuntimeJob),
    Shutdown,
}

struct ChannelInvoker {
    sender: Mutex<Sender<Message>>,
}

impl CallInvoker for ChannelInvoker {
    fn invoke_async(&self, job: RuntimeJob) {
        let sender = self.sender.lock().unwrap_or_else(|e| e.into_inner());
        if sender.send(Message::Job(job)).is_err() {
            log::warn!("Runtime thread is gone, dropping job");
        }
    }
}

/// A dedicated thread that owns a [`Runtime`].
///
/// Dropping the handle stops the thread after the jobs already queued, then
/// joins it. Anything still held by the runtime (globals, sessions) is dropped
/// on that thread.
pub struct RuntimeThread {
    invoker: Arc<ChannelInvoker>,
    handle: Option<JoinHandle<()>>,
    thread_id: ThreadId,
}

impl RuntimeThread {
    pub fn spawn() -> BridgeResult<Self> {
        Self::spawn_named("js-runtime")
    }

    pub fn spawn_named(name: &str) -> BridgeResult<Self> {
        let (sender, receiver) = mpsc::channel::<Message>();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut runtime = Runtime::new();
                log::debug!("Runtime thread started");
                while let Ok(message) = receiver.recv() {
                    match message {
                        Message::Job(job) => job(&mut runtime),
                        Message::Shutdown => break,
                    }
                }
                log::debug!("Runtime thread exiting");
            })
            .map_err(|e| BridgeError::Worker(e.to_string()))?;

        Ok(Self {
            invoker: Arc::new(ChannelInvoker {
                sender: Mutex::new(sender),
            }),
            thread_id: handle.thread().id(),
            handle: Some(handle),
        })
    }

    /// Invoker that posts onto this thread.
    pub fn invoker(&self) -> Arc<dyn CallInvoker> {
        self.invoker.clone()
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// Runs `f` on the runtime thread and waits for its result.
    ///
    /// Fails with `InvalidArgument` when called from the runtime thread itself,
    /// which would otherwise deadlock.
    pub fn call<R, F>(&self, f: F) -> BridgeResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut Runtime) -> R + Send + 'static,
    {
        if thread::current().id() == self.thread_id {
            return Err(BridgeError::InvalidArgument(
                "RuntimeThread::call from the runtime thread".to_string(),
            ));
        }
        let (tx, rx) = mpsc::sync_channel(1);
        self.invoker.invoke_async(Box::new(move |runtime| {
            let _ = tx.send(f(runtime));
        }));
        rx.recv().map_err(|_| BridgeError::RuntimeClosed)
    }

    /// Blocks until every job queued before this call has run.
    pub fn flush(&self) -> BridgeResult<()> {
        self.call(|_| ())
    }

    /// Waits for `promise` to settle and returns its outcome.
    pub fn await_promise(&self, promise: &Promise, timeout: Duration) -> BridgeResult<Result<Value, JsError>> {
        let (tx, rx) = mpsc::channel();
        let promise = promise.clone();
        self.call(move |runtime| {
            promise.on_settled(runtime, move |_runtime, outcome| {
                let _ = tx.send(outcome);
            });
        })?;
        rx.recv_timeout(timeout).map_err(|e| match e {
            mpsc::RecvTimeoutError::Timeout => BridgeError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            },
            mpsc::RecvTimeoutError::Disconnected => BridgeError::RuntimeClosed,
        })
    }
}

impl Drop for RuntimeThread {
    fn drop(&mut self) {
        {
            let sender = self.invoker.sender.lock().unwrap_or_else(|e| e.into_inner());
            let _ = sender.send(Message::Shutdown);
        }
        if let Some(handle) = self.handle.take() {
            if thread::current().id() == self.thread_id {
                return;
            }
            if handle.join().is_err() {
                log::warn!("Runtime thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_call_runs_on_runtime_thread() {
        let runtime_thread = RuntimeThread::spawn().unwrap();
        let expected = runtime_thread.thread_id();
        let (id, owner) = runtime_thread
            .call(|rt| (thread::current().id(), rt.is_owner_thread()))
            .unwrap();
        assert_eq!(id, expected);
        assert!(owner);
    }

    #[test]
    fn test_jobs_run_in_order() {
        let runtime_thread = RuntimeThread::spawn().unwrap();
        let invoker = runtime_thread.invoker();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let seen = seen.clone();
            invoker.invoke_async(Box::new(move |_| seen.lock().unwrap().push(i)));
        }
        runtime_thread.flush().unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_jobs_after_shutdown_are_dropped() {
        let runtime_thread = RuntimeThread::spawn().unwrap();
        let invoker = runtime_thread.invoker();
        drop(runtime_thread);

        let ran = Arc::new(AtomicUsize::new(0));
        let ran_clone = ran.clone();
        invoker.invoke_async(Box::new(move |_| {
            ran_clone.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_call_from_runtime_thread_is_rejected() {
        let runtime_thread = Arc::new(RuntimeThread::spawn().unwrap());
        let inner = runtime_thread.clone();
        let nested = runtime_thread
            .call(move |_| matches!(inner.call(|_| ()), Err(BridgeError::InvalidArgument(_))))
            .unwrap();
        assert!(nested);
    }
}
