//! Owned raw byte buffers for model data.
//!
//! A [`ForeignBuffer`] holds the bytes of a fetched model. The engine may keep
//! pointers into those bytes for as long as the model lives, so the buffer is
//! moved, never copied: from the fetcher to the loader, then into the session,
//! which releases it after the engine handles are gone.
//!
//! Memory can come from Rust (`Box<[u8]>`) or from the host, in which case the
//! host supplies the function that releases it (typically `free`).

use std::fmt;
use std::ptr::NonNull;

/// Callback that releases host-allocated memory.
pub type ReleaseFn = Box<dyn FnOnce(NonNull<u8>, usize) + Send>;

enum Release {
    /// Memory came from `Box<[u8]>::into_raw`.
    Boxed,
    /// Memory belongs to the host.
    Custom(ReleaseFn),
}

/// Exclusively owned, immovable block of bytes.
///
/// Invariant: `data` is `None` iff `size == 0`. The memory is released exactly
/// once, when the buffer is dropped.
pub struct ForeignBuffer {
    data: Option<NonNull<u8>>,
    size: usize,
    release: Option<Release>,
}

// The buffer is uniquely owned and only ever read through shared references.
unsafe impl Send for ForeignBuffer {}
unsafe impl Sync for ForeignBuffer {}

impl ForeignBuffer {
    /// An empty buffer (null data, zero size).
    pub fn empty() -> Self {
        Self {
            data: None,
            size: 0,
            release: None,
        }
    }

    /// Takes ownership of a `Vec<u8>`.
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        if bytes.is_empty() {
            return Self::empty();
        }
        let size = bytes.len();
        let raw = Box::into_raw(bytes.into_boxed_slice()) as *mut u8;
        Self {
            // Box::into_raw never returns null
            data: NonNull::new(raw),
            size,
            release: Some(Release::Boxed),
        }
    }

    /// Copies `bytes` into a new buffer.
    pub fn copy_from(bytes: &[u8]) -> Self {
        Self::from_vec(bytes.to_vec())
    }

    /// Wraps memory allocated by the host.
    ///
    /// `release` is called exactly once with `(data, size)` when the buffer is
    /// dropped. A null `data` or a zero `size` yields an empty buffer; in that
    /// case `release` is still invoked immediately for a non-null pointer so
    /// the host allocation is not leaked.
    ///
    /// # Safety
    ///
    /// `data` must point to `size` readable bytes that stay valid and
    /// unmodified until `release` runs, and nothing else may free them.
    pub unsafe fn from_raw_parts(data: *mut u8, size: usize, release: ReleaseFn) -> Self {
        match NonNull::new(data) {
            Some(ptr) if size > 0 => Self {
                data: Some(ptr),
                size,
                release: Some(Release::Custom(release)),
            },
            Some(ptr) => {
                release(ptr, 0);
                Self::empty()
            }
            None => Self::empty(),
        }
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Pointer to the first byte, or null for an empty buffer.
    pub fn as_ptr(&self) -> *const u8 {
        self.data
            .map(|ptr| ptr.as_ptr() as *const u8)
            .unwrap_or(std::ptr::null())
    }

    pub fn as_slice(&self) -> &[u8] {
        match self.data {
            // SAFETY: data points to `size` bytes owned by self
            Some(ptr) => unsafe { std::slice::from_raw_parts(ptr.as_ptr(), self.size) },
            None => &[],
        }
    }
}

impl Drop for ForeignBuffer {
    fn drop(&mut self) {
        let (Some(ptr), Some(release)) = (self.data.take(), self.release.take()) else {
            return;
        };
        let size = std::mem::replace(&mut self.size, 0);
        match release {
            Release::Boxed => {
                // SAFETY: ptr/size came from Box::<[u8]>::into_raw in from_vec
                let slice = std::ptr::slice_from_raw_parts_mut(ptr.as_ptr(), size);
                drop(unsafe { Box::from_raw(slice) });
            }
            Release::Custom(release) => release(ptr, size),
        }
    }
}

impl Default for ForeignBuffer {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Vec<u8>> for ForeignBuffer {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from_vec(bytes)
    }
}

impl AsRef<[u8]> for ForeignBuffer {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl fmt::Debug for ForeignBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeignBuffer")
            .field("data", &self.as_ptr())
            .field("size", &self.size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_release(counter: Arc<AtomicUsize>) -> ReleaseFn {
        Box::new(move |ptr, size| {
            counter.fetch_add(1, Ordering::SeqCst);
            let slice = std::ptr::slice_from_raw_parts_mut(ptr.as_ptr(), size);
            drop(unsafe { Box::from_raw(slice) });
        })
    }

    #[test]
    fn test_empty_buffer_invariant() {
        let buffer = ForeignBuffer::empty();
        assert!(buffer.is_empty());
        assert!(buffer.as_ptr().is_null());
        assert_eq!(buffer.as_slice(), &[] as &[u8]);

        let from_empty_vec = ForeignBuffer::from_vec(Vec::new());
        assert!(from_empty_vec.as_ptr().is_null());
    }

    #[test]
    fn test_from_vec_keeps_bytes() {
        let buffer = ForeignBuffer::from_vec(vec![1, 2, 3, 4]);
        assert_eq!(buffer.len(), 4);
        assert!(!buffer.as_ptr().is_null());
        assert_eq!(buffer.as_slice(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_custom_release_runs_once() {
        let released = Arc::new(AtomicUsize::new(0));
        let raw = Box::into_raw(vec![9u8; 16].into_boxed_slice()) as *mut u8;
        let buffer = unsafe { ForeignBuffer::from_raw_parts(raw, 16, counting_release(released.clone())) };
        assert_eq!(buffer.as_slice(), &[9u8; 16]);

        let moved = buffer;
        assert_eq!(released.load(Ordering::SeqCst), 0);
        drop(moved);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_zero_size_host_allocation_is_released() {
        let released = Arc::new(AtomicUsize::new(0));
        let raw = Box::into_raw(Vec::<u8>::new().into_boxed_slice()) as *mut u8;
        let buffer = unsafe { ForeignBuffer::from_raw_parts(raw, 0, counting_release(released.clone())) };
        assert!(buffer.is_empty());
        assert!(buffer.as_ptr().is_null());
        assert_eq!(released.load(Ordering::SeqCst), 1);
        drop(buffer);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_null_pointer_yields_empty() {
        let released = Arc::new(AtomicUsize::new(0));
        let buffer = unsafe {
            ForeignBuffer::from_raw_parts(std::ptr::null_mut(), 8, counting_release(released.clone()))
        };
        assert!(buffer.is_empty());
        drop(buffer);
        assert_eq!(released.load(Ordering::SeqCst), 0);
    }
}
