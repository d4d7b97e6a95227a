//! Aligned heap regions backing pool blocks.
//!
//! Bus DMA engines read and write buffers directly, so every block handed to
//! the bus must start on an alignment boundary the generic allocator does not
//! promise. This module keeps the unsafe allocation surface in one place.

use crate::{TransportError, TransportResult};
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::{self, NonNull};

/// Owned, contiguous, aligned allocation.
#[derive(Debug)]
pub struct DmaRegion {
    ptr: NonNull<u8>,
    layout: Layout,
}

// SAFETY: the region exclusively owns its allocation; access goes through `&self`/`&mut self`.
unsafe impl Send for DmaRegion {}
// SAFETY: shared references only hand out `&[u8]`.
unsafe impl Sync for DmaRegion {}

impl DmaRegion {
    /// Allocates `len` zeroed bytes aligned to `alignment`.
    ///
    /// Regions are always zero-filled so the safe slice views never expose
    /// uninitialised memory. `Layout` guarantees the returned address honours `alignment`, so the
    /// retry-on-misalignment dance of C allocators is unnecessary here.
    pub fn new_aligned(len: usize, alignment: usize) -> TransportResult<Self> {
        let failed = TransportError::AllocationFailed {
            size: len,
            alignment,
        };
        if len == 0 || alignment == 0 || !alignment.is_power_of_two() {
            return Err(failed);
        }

        let layout = Layout::from_size_align(len, alignment).map_err(|_| failed.clone())?;
        let ptr = unsafe {
            // SAFETY: `layout` has a non-zero size.
            alloc_zeroed(layout)
        };
        let ptr = NonNull::new(ptr).ok_or(failed)?;
        Ok(Self { ptr, layout })
    }

    /// Total number of bytes managed by this region.
    pub fn len(&self) -> usize {
        self.layout.size()
    }

    /// Returns true when the region holds zero bytes (never for a live region).
    pub fn is_empty(&self) -> bool {
        self.layout.size() == 0
    }

    /// Alignment the region was allocated with.
    pub fn alignment(&self) -> usize {
        self.layout.align()
    }

    /// Address of the first byte, for alignment checks and DMA descriptors.
    pub fn addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    /// Clears the whole region.
    pub fn zero(&mut self) {
        unsafe {
            // SAFETY: the allocation spans `len` writable bytes.
            ptr::write_bytes(self.ptr.as_ptr(), 0, self.len())
        };
    }

    /// Immutable view of the region.
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the allocation spans `len` initialised bytes and lives as long as `self`.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len()) }
    }

    /// Mutable view of the region.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: `&mut self` guarantees exclusive access to the allocation.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len()) }
    }
}

impl Drop for DmaRegion {
    fn drop(&mut self) {
        unsafe {
            // SAFETY: `ptr` came from `alloc_zeroed` with this exact layout.
            dealloc(self.ptr.as_ptr(), self.layout)
        };
    }
}
