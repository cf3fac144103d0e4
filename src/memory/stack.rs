// Per-process stack allocation on top of the kernel heap
use alloc::vec::Vec;
use log::{info, warn};

use super::heap::Heap;
use super::MemoryError;
use crate::config::MAX_STACKS;
use crate::process::pcb::ProcessId;

/// A stack carved out of the heap for one process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackRecord {
    pub base: usize,
    pub size: usize,
    pub pid: ProcessId,
}

impl StackRecord {
    /// Initial stack pointer; stacks grow down from here
    pub fn top(&self) -> usize {
        self.base + self.size
    }
}

/// Bounded table of live stacks, kept in insertion order
pub struct StackAllocator {
    stack_size: usize,
    records: Vec<StackRecord>,
}

impl StackAllocator {
    pub fn new(stack_size: usize) -> Self {
        Self {
            stack_size,
            records: Vec::new(),
        }
    }

    /// Allocate a stack for `pid` from the heap
    pub fn allocate(&mut self, heap: &mut Heap, pid: ProcessId) -> Result<StackRecord, MemoryError> {
        if self.records.len() >= MAX_STACKS {
            warn!("maximum stack count reached");
            return Err(MemoryError::StackLimitReached);
        }

        let base = heap.allocate(self.stack_size).map_err(|e| {
            warn!("failed to allocate stack for PID {}", pid);
            e
        })?;

        let record = StackRecord {
            base,
            size: self.stack_size,
            pid,
        };
        self.records.push(record);

        info!("stack allocated for PID {} at {:#x}", pid, base);
        Ok(record)
    }

    /// Release the stack owned by `pid`, compacting the table
    pub fn free(&mut self, heap: &mut Heap, pid: ProcessId) -> Result<(), MemoryError> {
        let index = match self.records.iter().position(|r| r.pid == pid) {
            Some(index) => index,
            None => {
                warn!("no stack found for PID {}", pid);
                return Err(MemoryError::StackNotFound);
            }
        };

        heap.free(self.records[index].base)?;
        self.records.remove(index);

        info!("stack freed for PID {}", pid);
        Ok(())
    }

    pub fn find(&self, pid: ProcessId) -> Option<&StackRecord> {
        self.records.iter().find(|r| r.pid == pid)
    }

    pub fn records(&self) -> &[StackRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn stack_size(&self) -> usize {
        self.stack_size
    }
}
