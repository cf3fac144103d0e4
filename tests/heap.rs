mod common;

use common::{assert_conserved, assert_no_adjacent_free, kernel, layout};
use kacchi::{KernelConfig, MemoryError};

#[test]
fn conservation_holds_across_mixed_traffic() {
    let mut k = kernel(64 * 1024, KernelConfig::default());
    let mut live = Vec::new();

    for round in 0..40usize {
        let size = 1 + (round * 37) % 700;
        match k.allocate(size) {
            Ok(addr) => live.push(addr),
            Err(e) => assert_eq!(e, MemoryError::OutOfMemory),
        }
        assert_conserved(&k);

        if round % 3 == 2 {
            let victim = live.remove(round % live.len());
            k.free(victim).unwrap();
            assert_conserved(&k);
            assert_no_adjacent_free(&k);
        }
    }

    for addr in live.drain(..).rev() {
        k.free(addr).unwrap();
        assert_conserved(&k);
        assert_no_adjacent_free(&k);
    }
    assert_eq!(layout(&k).len(), 1);
    assert_eq!(k.memory_stats().used, 0);
}

#[test]
fn allocate_then_free_restores_layout() {
    let mut k = kernel(16 * 1024, KernelConfig::default());
    let a = k.allocate(100).unwrap();
    let _b = k.allocate(200).unwrap();
    k.free(a).unwrap();

    let before = layout(&k);
    let c = k.allocate(48).unwrap();
    assert_ne!(layout(&k), before);
    k.free(c).unwrap();
    assert_eq!(layout(&k), before);
}

#[test]
fn out_of_memory_leaves_blocks_untouched() {
    let mut k = kernel(4096, KernelConfig::default());
    let before = layout(&k);
    assert_eq!(k.allocate(5000), Err(MemoryError::OutOfMemory));
    assert_eq!(layout(&k), before);
}

#[test]
fn request_near_address_space_size_is_out_of_memory() {
    let mut k = kernel(4096, KernelConfig::default());
    let before = layout(&k);
    assert_eq!(k.allocate(usize::MAX), Err(MemoryError::OutOfMemory));
    assert_eq!(k.allocate(usize::MAX - 6), Err(MemoryError::OutOfMemory));
    assert_eq!(layout(&k), before);
    assert_eq!(k.memory_stats().used, 0);
}

#[test]
fn first_fit_reuses_earliest_hole() {
    let mut k = kernel(16 * 1024, KernelConfig::default());
    let a = k.allocate(256).unwrap();
    let _b = k.allocate(64).unwrap();
    let c = k.allocate(256).unwrap();
    let _d = k.allocate(64).unwrap();
    k.free(c).unwrap();
    k.free(a).unwrap();

    assert_eq!(k.allocate(128).unwrap(), a);
}

#[test]
fn sizes_are_rounded_to_alignment() {
    let mut k = kernel(16 * 1024, KernelConfig::default());
    let a = k.allocate(1).unwrap();
    let b = k.allocate(9).unwrap();
    assert_eq!(a % 8, 0);
    assert_eq!(b % 8, 0);
    assert_eq!(k.memory_stats().used, 8 + 16);
}

#[test]
fn bad_frees_are_rejected() {
    let mut k = kernel(16 * 1024, KernelConfig::default());
    let a = k.allocate(64).unwrap();
    assert_eq!(k.free(a + 8), Err(MemoryError::InvalidFree));
    k.free(a).unwrap();
    assert_eq!(k.free(a), Err(MemoryError::InvalidFree));
    assert_eq!(k.allocate(0), Err(MemoryError::ZeroSize));
}
