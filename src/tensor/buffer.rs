use std::alloc::{self, Layout};
use std::ptr::NonNull;

use crate::error::{Error, Result};

/// Alignment for all tensor buffers. Large enough for every element type
/// the engine carries and for vectorized copies.
const BUFFER_ALIGNMENT: usize = 64;

/// Exclusive owner of one contiguous byte region.
///
/// A buffer is created together with its tensor and destroyed with it.
/// There is no sharing and no sub-allocation.
pub struct Buffer {
    ptr: NonNull<u8>,
    layout: Layout,
    size: usize,
}

impl Buffer {
    /// Allocate a zero-initialized buffer of `size` bytes.
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::InvalidShape(
                "buffer size must be non-zero".to_string(),
            ));
        }

        let layout = Layout::from_size_align(size, BUFFER_ALIGNMENT).map_err(|e| {
            Error::InvalidShape(format!(
                "invalid buffer layout: size={}, alignment={}, error={}",
                size, BUFFER_ALIGNMENT, e
            ))
        })?;

        let ptr = unsafe {
            let ptr = alloc::alloc_zeroed(layout);
            if ptr.is_null() {
                return Err(Error::InvalidShape(format!(
                    "failed to allocate buffer of {} bytes",
                    size
                )));
            }
            NonNull::new_unchecked(ptr)
        };

        Ok(Self { ptr, layout, size })
    }

    /// Size of the buffer in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Get a slice over the whole buffer.
    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.size) }
    }

    /// Get a mutable slice over the whole buffer.
    pub fn as_slice_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.size) }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            alloc::dealloc(self.ptr.as_ptr(), self.layout);
        }
    }
}

// The buffer is the sole owner of its region; access is mediated by the
// usual borrow rules on the slices above.
unsafe impl Send for Buffer {}
unsafe impl Sync for Buffer {}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer").field("size", &self.size).finish()
    }
}
