// Memory management for kacchi: the kernel heap and the per-process stacks
// carved out of it.
pub mod heap;
pub mod stack;

use core::fmt;

pub use heap::{align_up, Heap, MemoryBlock};
pub use stack::{StackAllocator, StackRecord};

/// Memory management errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryError {
    ZeroSize,
    OutOfMemory,
    InvalidFree,
    OutOfBounds,
    StackLimitReached,
    StackNotFound,
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MemoryError::ZeroSize => write!(f, "Zero-size allocation"),
            MemoryError::OutOfMemory => write!(f, "Out of memory"),
            MemoryError::InvalidFree => write!(f, "Free of an unallocated address"),
            MemoryError::OutOfBounds => write!(f, "Access outside an allocated block"),
            MemoryError::StackLimitReached => write!(f, "Maximum stack count reached"),
            MemoryError::StackNotFound => write!(f, "No stack for process"),
        }
    }
}

/// Heap usage snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStats {
    pub total: usize,
    pub used: usize,
    pub free: usize,
    pub free_blocks: usize,
    pub active_stacks: usize,
}

impl fmt::Display for MemoryStats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "=== Memory Statistics ===")?;
        writeln!(f, "Total heap: {} bytes", self.total)?;
        writeln!(f, "Used heap: {} bytes", self.used)?;
        writeln!(f, "Free heap: {} bytes", self.free)?;
        writeln!(f, "Active stacks: {}", self.active_stacks)?;
        write!(f, "Free blocks: {}", self.free_blocks)
    }
}

/// Leak a zeroed, 16-byte aligned region to stand in for the boot arena
#[cfg(test)]
pub(crate) fn leak_arena(size: usize) -> &'static mut [u8] {
    use alloc::alloc::{alloc_zeroed, Layout};

    let layout = Layout::from_size_align(size, 16).unwrap();
    unsafe {
        let ptr = alloc_zeroed(layout);
        assert!(!ptr.is_null());
        core::slice::from_raw_parts_mut(ptr, size)
    }
}
