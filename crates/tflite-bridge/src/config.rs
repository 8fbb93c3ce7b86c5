//! Bridge configuration.

use crate::error::{BridgeError, BridgeResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default name of the global loader function.
pub const DEFAULT_GLOBAL_NAME: &str = "__loadTensorflowModel";

/// Default timeout for HTTP model downloads.
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 30_000;

/// Default name prefix for background worker threads.
pub const DEFAULT_WORKER_THREAD_NAME: &str = "tflite-bridge-worker";

/// Configuration for the loader and the sessions it creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Global function installed into the runtime.
    pub global_name: String,
    /// Timeout for `http(s)://` fetches, in milliseconds.
    pub fetch_timeout_ms: u64,
    /// Name prefix for worker threads.
    pub worker_thread_name: String,
    /// Reject a `run`/`runSync` while another is in flight (default: true)
    pub reject_overlapping_runs: bool,
    /// Interpreter thread count. `None` leaves the engine default.
    pub num_threads: Option<i32>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            global_name: DEFAULT_GLOBAL_NAME.to_string(),
            fetch_timeout_ms: DEFAULT_FETCH_TIMEOUT_MS,
            worker_thread_name: DEFAULT_WORKER_THREAD_NAME.to_string(),
            reject_overlapping_runs: true,
            num_threads: None,
        }
    }
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON config. Missing fields take their defaults.
    pub fn from_json(json: &str) -> BridgeResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| BridgeError::InvalidArgument(format!("invalid bridge config: {e}")))
    }

    /// Defaults overridden by environment variables.
    ///
    /// Reads:
    /// - `TFLITE_BRIDGE_GLOBAL_NAME`
    /// - `TFLITE_BRIDGE_FETCH_TIMEOUT_MS`
    /// - `TFLITE_BRIDGE_WORKER_THREAD_NAME`
    /// - `TFLITE_BRIDGE_NUM_THREADS`
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(name) = std::env::var("TFLITE_BRIDGE_GLOBAL_NAME") {
            if !name.is_empty() {
                config.global_name = name;
            }
        }
        if let Ok(timeout) = std::env::var("TFLITE_BRIDGE_FETCH_TIMEOUT_MS") {
            match timeout.parse() {
                Ok(ms) => config.fetch_timeout_ms = ms,
                Err(_) => log::warn!(
                    "Ignoring TFLITE_BRIDGE_FETCH_TIMEOUT_MS={:?}: not a number",
                    timeout
                ),
            }
        }
        if let Ok(name) = std::env::var("TFLITE_BRIDGE_WORKER_THREAD_NAME") {
            if !name.is_empty() {
                config.worker_thread_name = name;
            }
        }
        if let Ok(threads) = std::env::var("TFLITE_BRIDGE_NUM_THREADS") {
            match threads.parse::<i32>() {
                Ok(n) if n > 0 => config.num_threads = Some(n),
                _ => log::warn!(
                    "Ignoring TFLITE_BRIDGE_NUM_THREADS={:?}: not a positive number",
                    threads
                ),
            }
        }
        config
    }

    pub fn with_global_name(mut self, name: impl Into<String>) -> Self {
        self.global_name = name.into();
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_worker_thread_name(mut self, name: impl Into<String>) -> Self {
        self.worker_thread_name = name.into();
        self
    }

    pub fn with_overlapping_runs_rejected(mut self, reject: bool) -> Self {
        self.reject_overlapping_runs = reject;
        self
    }

    pub fn with_num_threads(mut self, threads: i32) -> Self {
        self.num_threads = Some(threads);
        self
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}
