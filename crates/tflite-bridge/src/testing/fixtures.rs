//! Test fixtures: model bytes, tracked buffers and fetchers.

use super::mocks::DropLog;
use crate::buffer::ForeignBuffer;
use crate::host::{TypedArray, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Smallest byte string the mock engine accepts as a model: a flatbuffer root
/// offset followed by the `TFL3` file identifier.
pub fn model_bytes() -> Vec<u8> {
    let mut bytes = vec![0x1c, 0x00, 0x00, 0x00];
    bytes.extend_from_slice(super::mocks::MODEL_IDENTIFIER);
    bytes.extend_from_slice(&[0u8; 24]);
    bytes
}

/// Bytes that no engine parses.
pub fn invalid_model_bytes() -> Vec<u8> {
    b"definitely not a flatbuffer".to_vec()
}

/// `[Float32Array(values)]`, the input list for a single float32 tensor.
pub fn float32_inputs(values: &[f32]) -> Value {
    Value::Array(vec![Value::TypedArray(TypedArray::from_slice(values))])
}

/// Counts buffers handed out and released, to prove exactly-once release.
#[derive(Default)]
pub struct BufferTracker {
    allocated: AtomicUsize,
    released: AtomicUsize,
    drop_log: Option<DropLog>,
}

impl BufferTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Also records `"model-bytes"` in `drop_log` on each release.
    pub fn with_drop_log(drop_log: DropLog) -> Arc<Self> {
        Arc::new(Self {
            drop_log: Some(drop_log),
            ..Self::default()
        })
    }

    /// Wraps `bytes` in a host-style buffer whose release is counted.
    pub fn buffer(self: &Arc<Self>, bytes: Vec<u8>) -> ForeignBuffer {
        self.allocated.fetch_add(1, Ordering::SeqCst);
        let size = bytes.len();
        let raw = Box::into_raw(bytes.into_boxed_slice()) as *mut u8;
        let tracker = self.clone();
        let release = Box::new(move |ptr: std::ptr::NonNull<u8>, size: usize| {
            let slice = std::ptr::slice_from_raw_parts_mut(ptr.as_ptr(), size);
            // SAFETY: ptr/size came from Box::<[u8]>::into_raw above
            drop(unsafe { Box::from_raw(slice) });
            tracker.released.fetch_add(1, Ordering::SeqCst);
            if let Some(log) = &tracker.drop_log {
                log.lock().unwrap_or_else(|e| e.into_inner()).push("model-bytes");
            }
        });
        // SAFETY: raw points to `size` bytes we own and only `release` frees
        unsafe { ForeignBuffer::from_raw_parts(raw, size, release) }
    }

    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Buffers handed out and not yet released.
    pub fn live(&self) -> usize {
        self.allocated() - self.released()
    }
}

/// Fetcher that returns a copy of `bytes` for any URL.
pub fn static_fetcher(bytes: Vec<u8>) -> impl Fn(&str) -> Result<ForeignBuffer, String> + Send + Sync + 'static {
    move |_url: &str| Ok(ForeignBuffer::copy_from(&bytes))
}

/// Fetcher whose buffers are counted by `tracker`.
pub fn tracked_fetcher(
    tracker: Arc<BufferTracker>,
    bytes: Vec<u8>,
) -> impl Fn(&str) -> Result<ForeignBuffer, String> + Send + Sync + 'static {
    move |_url: &str| Ok(tracker.buffer(bytes.clone()))
}

/// Fetcher that always fails like an unreachable host.
pub fn unreachable_fetcher() -> impl Fn(&str) -> Result<ForeignBuffer, String> + Send + Sync + 'static {
    |_url: &str| Err("connection refused".to_string())
}

/// Fetcher that receives `bytes` into a tracked buffer, then fails as if the
/// connection dropped before the download completed.
pub fn partial_download_fetcher(
    tracker: Arc<BufferTracker>,
    bytes: Vec<u8>,
) -> impl Fn(&str) -> Result<ForeignBuffer, String> + Send + Sync + 'static {
    move |_url: &str| {
        drop(tracker.buffer(bytes.clone()));
        Err("connection reset after partial download".to_string())
    }
}

/// Polls `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_counts_release() {
        let tracker = BufferTracker::new();
        let buffer = tracker.buffer(model_bytes());
        assert_eq!(tracker.live(), 1);
        drop(buffer);
        assert_eq!(tracker.released(), 1);
        assert_eq!(tracker.live(), 0);
    }

    #[test]
    fn test_tracker_empty_buffer_released_once() {
        let tracker = BufferTracker::new();
        let buffer = tracker.buffer(Vec::new());
        assert!(buffer.is_empty());
        drop(buffer);
        assert_eq!(tracker.allocated(), 1);
        assert_eq!(tracker.released(), 1);
    }
}
