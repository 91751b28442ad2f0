//! Host memory standing in for GPU allocations.

use std::ptr::NonNull;

use crate::backend::MappedPtr;

/// A zero-initialized byte allocation shared between resources and recorded
/// commands.
///
/// Like mapped GPU memory it hands out raw pointers: the reference backend
/// executes copies through them at submit time while the CPU may hold a
/// mapping of the same allocation.
pub struct HostMemory {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the allocation is owned by this struct and freed only on drop.
// Concurrent CPU/"GPU" access has the same caller-synchronized contract as
// native mapped memory.
unsafe impl Send for HostMemory {}
unsafe impl Sync for HostMemory {}

impl HostMemory {
    /// Allocate `len` zeroed bytes.
    pub fn zeroed(len: usize) -> Self {
        let boxed: Box<[u8]> = vec![0u8; len].into_boxed_slice();
        let raw = Box::into_raw(boxed) as *mut u8;
        // Box::into_raw never returns null, even for empty slices.
        let ptr = NonNull::new(raw).unwrap_or(NonNull::dangling());
        Self { ptr, len }
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Pointer for mappings.
    pub fn mapped_ptr(&self) -> MappedPtr {
        MappedPtr(self.ptr)
    }

    /// Copy `data` into the allocation at `offset`.
    pub fn write(&self, offset: usize, data: &[u8]) {
        assert!(offset + data.len() <= self.len, "host memory write out of bounds");
        // SAFETY: bounds checked above; the source never aliases our allocation
        // because callers pass CPU-side slices.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.ptr.as_ptr().add(offset), data.len());
        }
    }

    /// Read `len` bytes starting at `offset`.
    pub fn read(&self, offset: usize, len: usize) -> Vec<u8> {
        assert!(offset + len <= self.len, "host memory read out of bounds");
        let mut out = vec![0u8; len];
        // SAFETY: bounds checked above.
        unsafe {
            std::ptr::copy_nonoverlapping(self.ptr.as_ptr().add(offset), out.as_mut_ptr(), len);
        }
        out
    }

    /// Copy `size` bytes from `src` at `src_offset` into `self` at `dst_offset`.
    pub fn copy_from(&self, dst_offset: usize, src: &HostMemory, src_offset: usize, size: usize) {
        assert!(src_offset + size <= src.len, "copy source out of bounds");
        assert!(dst_offset + size <= self.len, "copy destination out of bounds");
        // SAFETY: both ranges are in bounds; `copy` tolerates overlap when
        // `src` and `self` are the same allocation.
        unsafe {
            std::ptr::copy(
                src.ptr.as_ptr().add(src_offset),
                self.ptr.as_ptr().add(dst_offset),
                size,
            );
        }
    }

    /// Repeat `pattern` over `range`.
    pub fn fill(&self, range: std::ops::Range<usize>, pattern: &[u8]) {
        assert!(range.end <= self.len, "host memory fill out of bounds");
        if pattern.is_empty() {
            return;
        }
        // SAFETY: bounds checked above and no other slice to this range is
        // created on this thread while it lives.
        let bytes = unsafe {
            std::slice::from_raw_parts_mut(self.ptr.as_ptr().add(range.start), range.len())
        };
        for chunk in bytes.chunks_mut(pattern.len()) {
            chunk.copy_from_slice(&pattern[..chunk.len()]);
        }
    }
}

impl Drop for HostMemory {
    fn drop(&mut self) {
        // SAFETY: `ptr`/`len` came from `Box::into_raw` of a boxed slice.
        unsafe {
            drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(
                self.ptr.as_ptr(),
                self.len,
            )));
        }
    }
}

impl std::fmt::Debug for HostMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostMemory").field("len", &self.len).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read_roundtrip() {
        let memory = HostMemory::zeroed(16);
        memory.write(4, &[1, 2, 3, 4]);
        assert_eq!(memory.read(0, 8), vec![0, 0, 0, 0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_fill_repeats_pattern() {
        let memory = HostMemory::zeroed(10);
        memory.fill(0..10, &[0xAA, 0xBB, 0xCC, 0xDD]);
        assert_eq!(
            memory.read(0, 10),
            vec![0xAA, 0xBB, 0xCC, 0xDD, 0xAA, 0xBB, 0xCC, 0xDD, 0xAA, 0xBB]
        );
    }

    #[test]
    fn test_copy_between_allocations() {
        let src = HostMemory::zeroed(8);
        src.write(0, &[9; 8]);
        let dst = HostMemory::zeroed(8);
        dst.copy_from(2, &src, 0, 4);
        assert_eq!(dst.read(0, 8), vec![0, 0, 9, 9, 9, 9, 0, 0]);
    }
}
