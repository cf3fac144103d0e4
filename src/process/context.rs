// Initial execution context for kacchi processes
//
// No register state is ever loaded from here; the frame only records what a
// hardware switch would pop on first entry. See `Scheduler::context_switch`
// for the bookkeeping side.
use core::mem::size_of;

use crate::memory::{Heap, MemoryError, StackRecord};

/// RFLAGS with the interrupt flag set
pub const INITIAL_RFLAGS: u64 = 0x202;

/// Kernel code segment selector
pub const KERNEL_CS: u64 = 0x08;

/// Saved registers as laid out on a fresh stack, lowest address first
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InitialFrame {
    pub rdi: u64,
    pub rsi: u64,
    pub rbp: u64,
    pub rsp: u64,
    pub rbx: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rax: u64,
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
}

pub const FRAME_SIZE: usize = size_of::<InitialFrame>();
const WORDS: usize = FRAME_SIZE / size_of::<u64>();

impl InitialFrame {
    /// Frame that starts execution at `entry` with `frame_addr` as its base
    pub fn new(entry: u64, frame_addr: usize) -> Self {
        Self {
            rsp: (frame_addr + 3 * size_of::<u64>()) as u64,
            rip: entry,
            cs: KERNEL_CS,
            rflags: INITIAL_RFLAGS,
            ..Self::default()
        }
    }

    fn words(&self) -> [u64; WORDS] {
        [
            self.rdi, self.rsi, self.rbp, self.rsp, self.rbx, self.rdx, self.rcx, self.rax,
            self.rip, self.cs, self.rflags,
        ]
    }

    fn from_words(w: [u64; WORDS]) -> Self {
        Self {
            rdi: w[0],
            rsi: w[1],
            rbp: w[2],
            rsp: w[3],
            rbx: w[4],
            rdx: w[5],
            rcx: w[6],
            rax: w[7],
            rip: w[8],
            cs: w[9],
            rflags: w[10],
        }
    }

    pub fn to_bytes(&self) -> [u8; FRAME_SIZE] {
        let mut bytes = [0u8; FRAME_SIZE];
        for (chunk, word) in bytes.chunks_exact_mut(size_of::<u64>()).zip(self.words()) {
            chunk.copy_from_slice(&word.to_ne_bytes());
        }
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < FRAME_SIZE {
            return None;
        }
        let mut words = [0u64; WORDS];
        for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(size_of::<u64>())) {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(chunk);
            *word = u64::from_ne_bytes(raw);
        }
        Some(Self::from_words(words))
    }
}

/// Push the initial frame onto `stack`, returning the resulting stack pointer
pub fn prepare_stack(heap: &mut Heap, stack: &StackRecord, entry: u64) -> Result<usize, MemoryError> {
    if stack.size < FRAME_SIZE {
        return Err(MemoryError::OutOfBounds);
    }
    let sp = stack.top() - FRAME_SIZE;
    let frame = InitialFrame::new(entry, sp);
    heap.write_bytes(sp, &frame.to_bytes())?;
    Ok(sp)
}

/// Read back the frame a process would resume from
pub fn read_frame(heap: &Heap, stack_pointer: usize) -> Result<InitialFrame, MemoryError> {
    let bytes = heap.read_bytes(stack_pointer, FRAME_SIZE)?;
    InitialFrame::from_bytes(bytes).ok_or(MemoryError::OutOfBounds)
}
