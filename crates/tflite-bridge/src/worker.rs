//! Background execution for loads and asynchronous runs.

use crate::config::DEFAULT_WORKER_THREAD_NAME;
use crate::error::{BridgeError, BridgeResult};
use std::panic::{self, AssertUnwindSafe};

/// Where fire-and-forget background tasks run.
#[derive(Debug, Clone)]
pub enum BackgroundExecutor {
    /// A fresh named OS thread per task.
    Thread { name: String },
    /// The blocking pool of an existing tokio runtime.
    Tokio(tokio::runtime::Handle),
}

impl Default for BackgroundExecutor {
    fn default() -> Self {
        Self::thread(DEFAULT_WORKER_THREAD_NAME)
    }
}

impl BackgroundExecutor {
    pub fn thread(name: impl Into<String>) -> Self {
        BackgroundExecutor::Thread { name: name.into() }
    }

    pub fn tokio(handle: tokio::runtime::Handle) -> Self {
        BackgroundExecutor::Tokio(handle)
    }

    /// Starts `task` in the background. `label` names the thread.
    ///
    /// A panic in `task` is caught and logged. Anything the task captured is
    /// dropped during the unwind, so a captured deferred rejects its promise.
    pub fn spawn<F>(&self, label: &str, task: F) -> BridgeResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let label = label.to_string();
        let task = {
            let label = label.clone();
            move || {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
                    log::error!("Background task '{}' panicked: {}", label, panic_message(&*payload));
                }
            }
        };
        match self {
            BackgroundExecutor::Thread { name } => {
                std::thread::Builder::new()
                    .name(format!("{name}-{label}"))
                    .spawn(task)
                    .map_err(|e| BridgeError::Worker(e.to_string()))?;
            }
            BackgroundExecutor::Tokio(handle) => {
                handle.spawn_blocking(task);
            }
        }
        Ok(())
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_thread_executor_names_thread() {
        let (tx, rx) = mpsc::channel();
        BackgroundExecutor::thread("bridge")
            .spawn("load", move || {
                let _ = tx.send(std::thread::current().name().map(str::to_string));
            })
            .unwrap();
        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("bridge-load"));
    }

    #[test]
    fn test_tokio_executor_runs_task() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .build()
            .unwrap();
        let (tx, rx) = mpsc::channel();
        BackgroundExecutor::tokio(runtime.handle().clone())
            .spawn("run", move || {
                let _ = tx.send(42);
            })
            .unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
    }

    #[test]
    fn test_panicking_task_is_contained() {
        let (tx, rx) = mpsc::channel::<()>();
        BackgroundExecutor::thread("bridge")
            .spawn("run", move || {
                let _guard = tx;
                panic!("kernel exploded");
            })
            .unwrap();
        // The sender is dropped by the unwind, which disconnects the channel.
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)),
            Err(mpsc::RecvTimeoutError::Disconnected)
        );
    }

    #[test]
    fn test_shut_down_tokio_handle_drops_task() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .build()
            .unwrap();
        let handle = runtime.handle().clone();
        drop(runtime);

        let (tx, rx) = mpsc::channel::<()>();
        BackgroundExecutor::tokio(handle)
            .spawn("load", move || {
                let _ = tx.send(());
            })
            .unwrap();
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)),
            Err(mpsc::RecvTimeoutError::Disconnected)
        );
    }
}
