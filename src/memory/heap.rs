// First-fit heap allocator for kacchi
//
// The arena is described by an address-ordered, doubly linked list of blocks.
// Block descriptors live in a fixed slot table and link to each other by
// index, so splitting and coalescing are O(1) splices with no raw list
// pointers and the heap itself never touches the global allocator.

use core::slice;
use log::{debug, info, warn};

use super::{MemoryError, MemoryStats};
use crate::config::{BLOCK_HEADER_SIZE, HEAP_ALIGN, MAX_HEAP_BLOCKS, MIN_SPLIT_SIZE};

type BlockIndex = usize;

/// One contiguous sub-range of the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryBlock {
    /// Address of the first usable byte (the header sits just below it)
    pub start: usize,
    /// Usable bytes, always a multiple of `HEAP_ALIGN`
    pub size: usize,
    pub free: bool,
    prev: Option<BlockIndex>,
    next: Option<BlockIndex>,
}

impl MemoryBlock {
    const UNUSED: Self = Self {
        start: 0,
        size: 0,
        free: false,
        prev: None,
        next: None,
    };

    /// One past the last usable byte
    pub fn end(&self) -> usize {
        self.start + self.size
    }
}

/// Round `size` up to the heap alignment, `None` if that overflows
pub fn align_up(size: usize) -> Option<usize> {
    size.checked_add(HEAP_ALIGN - 1)
        .map(|s| s & !(HEAP_ALIGN - 1))
}

/// Heap allocator over a single arena
pub struct Heap {
    base: usize,
    total: usize,
    used: usize,
    head: Option<BlockIndex>,
    slots: [MemoryBlock; MAX_HEAP_BLOCKS],
    /// Slots below this mark have been handed out at least once
    high_water: usize,
    /// Released slots, chained through their `next` link
    spare: Option<BlockIndex>,
}

impl Heap {
    /// An empty heap; every allocation fails until `init` is called
    pub const fn new() -> Self {
        Self {
            base: 0,
            total: 0,
            used: 0,
            head: None,
            slots: [MemoryBlock::UNUSED; MAX_HEAP_BLOCKS],
            high_water: 0,
            spare: None,
        }
    }

    /// Build a heap over a leaked, writable region
    pub fn from_static(arena: &'static mut [u8]) -> Self {
        let mut heap = Self::new();
        // SAFETY: the region is exclusively ours for the rest of the program
        unsafe { heap.init(arena.as_mut_ptr() as usize, arena.len()) };
        heap
    }

    /// Establish a single free block covering the whole arena.
    ///
    /// Re-initializing discards every existing block.
    ///
    /// # Safety
    ///
    /// `[base, base + size)` must be valid, writable memory that nothing else
    /// uses for as long as this heap hands out addresses inside it.
    pub unsafe fn init(&mut self, base: usize, size: usize) {
        self.used = 0;
        self.head = None;
        self.high_water = 0;
        self.spare = None;

        let aligned = match align_up(base) {
            Some(aligned) => aligned,
            None => {
                warn!("heap arena at {:#x} cannot be aligned", base);
                self.base = base;
                self.total = 0;
                return;
            }
        };
        let size = size.saturating_sub(aligned - base) & !(HEAP_ALIGN - 1);
        self.base = aligned;
        self.total = size;

        if size <= BLOCK_HEADER_SIZE {
            warn!("heap arena at {:#x} too small ({} bytes)", aligned, size);
            return;
        }

        self.head = self.insert_slot(MemoryBlock {
            start: aligned + BLOCK_HEADER_SIZE,
            size: size - BLOCK_HEADER_SIZE,
            free: true,
            prev: None,
            next: None,
        });

        info!("heap initialized at {:#x} ({} bytes)", aligned, size);
    }

    /// Allocate `size` bytes with a first-fit search, returning the block address
    pub fn allocate(&mut self, size: usize) -> Result<usize, MemoryError> {
        if size == 0 {
            return Err(MemoryError::ZeroSize);
        }
        let size = match align_up(size) {
            Some(size) => size,
            None => {
                warn!("out of memory (requested {} bytes)", size);
                return Err(MemoryError::OutOfMemory);
            }
        };

        let mut cursor = self.head;
        while let Some(idx) = cursor {
            let block = self.slots[idx];
            if block.free && block.size >= size {
                if block.size > size + BLOCK_HEADER_SIZE + MIN_SPLIT_SIZE {
                    self.split(idx, size);
                }
                let block = &mut self.slots[idx];
                block.free = false;
                self.used += block.size;
                return Ok(block.start);
            }
            cursor = block.next;
        }

        warn!("out of memory (requested {} bytes)", size);
        Err(MemoryError::OutOfMemory)
    }

    /// Return a block to the heap and merge it with free neighbours
    pub fn free(&mut self, address: usize) -> Result<(), MemoryError> {
        let idx = match self.find(address) {
            Some(idx) if !self.slots[idx].free => idx,
            _ => {
                warn!("attempt to free invalid address {:#x}", address);
                return Err(MemoryError::InvalidFree);
            }
        };

        self.slots[idx].free = true;
        self.used -= self.slots[idx].size;

        // next first, then previous: a free/freed/free run collapses in two merges
        if let Some(next) = self.slots[idx].next {
            if self.slots[next].free {
                self.merge_into(idx, next);
            }
        }
        if let Some(prev) = self.slots[idx].prev {
            if self.slots[prev].free {
                self.merge_into(prev, idx);
            }
        }

        debug!("freed memory at {:#x}", address);
        Ok(())
    }

    /// Copy `bytes` into the allocated block region starting at `address`
    pub fn write_bytes(&mut self, address: usize, bytes: &[u8]) -> Result<(), MemoryError> {
        self.check_range(address, bytes.len())?;
        // SAFETY: the range lies inside an allocated block of the arena
        unsafe {
            core::ptr::copy_nonoverlapping(bytes.as_ptr(), address as *mut u8, bytes.len());
        }
        Ok(())
    }

    /// Borrow `len` bytes of an allocated block region starting at `address`
    pub fn read_bytes(&self, address: usize, len: usize) -> Result<&[u8], MemoryError> {
        self.check_range(address, len)?;
        // SAFETY: the range lies inside an allocated block of the arena
        Ok(unsafe { slice::from_raw_parts(address as *const u8, len) })
    }

    /// Blocks in address order
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks {
            heap: self,
            cursor: self.head,
        }
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            total: self.total,
            used: self.used,
            free: self.total - self.used,
            free_blocks: self.blocks().filter(|b| b.free).count(),
            active_stacks: 0,
        }
    }

    /// Address the arena was initialized at (after alignment)
    pub fn base(&self) -> usize {
        self.base
    }

    pub fn total(&self) -> usize {
        self.total
    }

    fn find(&self, address: usize) -> Option<BlockIndex> {
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            if self.slots[idx].start == address {
                return Some(idx);
            }
            cursor = self.slots[idx].next;
        }
        None
    }

    fn check_range(&self, address: usize, len: usize) -> Result<(), MemoryError> {
        let end = address.checked_add(len).ok_or(MemoryError::OutOfBounds)?;
        let inside = self
            .blocks()
            .any(|b| !b.free && address >= b.start && end <= b.end());
        if inside {
            Ok(())
        } else {
            Err(MemoryError::OutOfBounds)
        }
    }

    // Carve `size` bytes off the front of block `idx`; the rest becomes a free
    // block linked right after it. With the descriptor table full the block
    // is handed out whole.
    fn split(&mut self, idx: BlockIndex, size: usize) {
        let block = self.slots[idx];
        let remainder = MemoryBlock {
            start: block.start + size + BLOCK_HEADER_SIZE,
            size: block.size - size - BLOCK_HEADER_SIZE,
            free: true,
            prev: Some(idx),
            next: block.next,
        };
        let new_idx = match self.insert_slot(remainder) {
            Some(new_idx) => new_idx,
            None => {
                debug!("block table full, not splitting block at {:#x}", block.start);
                return;
            }
        };
        if let Some(next) = block.next {
            self.slots[next].prev = Some(new_idx);
        }
        self.slots[idx].next = Some(new_idx);
        self.slots[idx].size = size;

        debug!(
            "split block at {:#x}: {} bytes + {} free at {:#x}",
            block.start, size, remainder.size, remainder.start
        );
    }

    // Absorb `victim` (the block right after `keeper`) into `keeper`
    fn merge_into(&mut self, keeper: BlockIndex, victim: BlockIndex) {
        let absorbed = self.slots[victim];
        self.slots[keeper].size += BLOCK_HEADER_SIZE + absorbed.size;
        self.slots[keeper].next = absorbed.next;
        if let Some(next) = absorbed.next {
            self.slots[next].prev = Some(keeper);
        }
        self.slots[victim] = MemoryBlock {
            next: self.spare,
            ..MemoryBlock::UNUSED
        };
        self.spare = Some(victim);
    }

    fn insert_slot(&mut self, block: MemoryBlock) -> Option<BlockIndex> {
        let idx = match self.spare {
            Some(idx) => {
                self.spare = self.slots[idx].next;
                idx
            }
            None if self.high_water < MAX_HEAP_BLOCKS => {
                self.high_water += 1;
                self.high_water - 1
            }
            None => return None,
        };
        self.slots[idx] = block;
        Some(idx)
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

/// Address-ordered iterator over heap blocks
pub struct Blocks<'a> {
    heap: &'a Heap,
    cursor: Option<BlockIndex>,
}

impl<'a> Iterator for Blocks<'a> {
    type Item = &'a MemoryBlock;

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.cursor?;
        let block = &self.heap.slots[idx];
        self.cursor = block.next;
        Some(block)
    }
}
