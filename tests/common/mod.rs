// Shared fixtures for the integration tests
#![allow(dead_code)]

use std::alloc::{alloc_zeroed, Layout};

use kacchi::config::BLOCK_HEADER_SIZE;
use kacchi::{Kernel, KernelConfig};

/// Leak a zeroed, 16-byte aligned region to stand in for the boot arena
pub fn leak_arena(size: usize) -> &'static mut [u8] {
    let layout = Layout::from_size_align(size, 16).unwrap();
    unsafe {
        let ptr = alloc_zeroed(layout);
        assert!(!ptr.is_null());
        std::slice::from_raw_parts_mut(ptr, size)
    }
}

pub fn kernel(arena_size: usize, config: KernelConfig) -> Kernel {
    Kernel::with_arena(leak_arena(arena_size), config)
}

/// Block layout as (start, size, free), in address order
pub fn layout(kernel: &Kernel) -> Vec<(usize, usize, bool)> {
    kernel
        .heap()
        .blocks()
        .map(|b| (b.start, b.size, b.free))
        .collect()
}

/// Every byte of the arena is either a block or a block header
pub fn assert_conserved(kernel: &Kernel) {
    let accounted: usize = kernel
        .heap()
        .blocks()
        .map(|b| b.size + BLOCK_HEADER_SIZE)
        .sum();
    assert_eq!(accounted, kernel.heap().total());
}

pub fn assert_no_adjacent_free(kernel: &Kernel) {
    let blocks = layout(kernel);
    for pair in blocks.windows(2) {
        assert!(!(pair[0].2 && pair[1].2), "adjacent free blocks: {:?}", pair);
    }
}

pub fn worker() {}
