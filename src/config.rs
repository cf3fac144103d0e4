// Kernel configuration for kacchi
//
// Compile-time limits live here as constants; the knobs a driver may want to
// change at boot are collected in `KernelConfig`.

use log::LevelFilter;

use crate::process::pcb::{Priority, ProcessId};
use crate::process::scheduler::SchedulingAlgorithm;

/// Size of the kernel heap arena handed out by the boot-time provider (1 MiB)
pub const HEAP_SIZE: usize = 0x0010_0000;

/// Stack carved out of the heap for every process (8 KiB)
pub const STACK_SIZE: usize = 0x2000;

/// Capacity of the process table, idle process included
pub const MAX_PROCESSES: usize = 32;

/// Capacity of the stack record table
pub const MAX_STACKS: usize = 256;

/// Bytes reserved for a process name, terminator included
pub const NAME_CAPACITY: usize = 32;

/// Every heap block size is a multiple of this
pub const HEAP_ALIGN: usize = 8;

/// Per-block bookkeeping overhead accounted in the arena
pub const BLOCK_HEADER_SIZE: usize = 32;

/// Smallest remainder worth turning into a free block of its own
pub const MIN_SPLIT_SIZE: usize = 8;

/// Capacity of the heap's block descriptor table
pub const MAX_HEAP_BLOCKS: usize = 512;

/// Reserved pid of the idle/null process
pub const IDLE_PID: ProcessId = 0;

/// First pid handed out to a created process
pub const FIRST_USER_PID: ProcessId = 1;

pub const IDLE_PRIORITY: Priority = 0;
pub const DEFAULT_PRIORITY: Priority = 1;
pub const MAX_PRIORITY: Priority = 10;

/// Round-robin time slice in timer ticks
pub const DEFAULT_QUANTUM: u64 = 100;

/// Runtime configuration consumed by `Kernel::new`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    pub algorithm: SchedulingAlgorithm,
    pub quantum: u64,
    pub aging: bool,
    pub max_priority: Priority,
    pub stack_size: usize,
    pub log_level: LevelFilter,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            algorithm: SchedulingAlgorithm::RoundRobin,
            quantum: DEFAULT_QUANTUM,
            aging: false,
            max_priority: MAX_PRIORITY,
            stack_size: STACK_SIZE,
            log_level: LevelFilter::Info,
        }
    }
}

impl KernelConfig {
    pub fn with_algorithm(mut self, algorithm: SchedulingAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_quantum(mut self, quantum: u64) -> Self {
        self.quantum = quantum;
        self
    }

    pub fn with_aging(mut self, aging: bool) -> Self {
        self.aging = aging;
        self
    }

    pub fn with_max_priority(mut self, max_priority: Priority) -> Self {
        self.max_priority = max_priority;
        self
    }

    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = stack_size;
        self
    }

    pub fn with_log_level(mut self, log_level: LevelFilter) -> Self {
        self.log_level = log_level;
        self
    }
}
