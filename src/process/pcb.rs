// Process Control Block (PCB) and process table for kacchi
use alloc::vec::Vec;
use core::fmt;
use log::{debug, info, warn};
use x86_64::VirtAddr;

use crate::config::{
    DEFAULT_PRIORITY, FIRST_USER_PID, IDLE_PID, IDLE_PRIORITY, MAX_PROCESSES, NAME_CAPACITY,
};
use crate::ipc::{MessageQueue, ReceivedMessage};
use crate::memory::{Heap, StackAllocator};
use crate::process::context;

/// Process ID type
pub type ProcessId = u64;

/// Scheduling priority; numerically smaller runs first
pub type Priority = u32;

/// Code a process starts executing at
pub type EntryPoint = fn();

/// Process state enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Terminated, // Slot is free
    Ready,      // Waiting in the ready queue
    Current,    // Owns the CPU
    Blocked,    // Reserved, nothing enters it yet
    Suspended,  // Reserved, nothing enters it yet
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ProcessState::Terminated => "TERMINATED",
            ProcessState::Ready => "READY",
            ProcessState::Current => "CURRENT",
            ProcessState::Blocked => "BLOCKED",
            ProcessState::Suspended => "SUSPENDED",
        };
        f.pad(name)
    }
}

/// Fixed-capacity, NUL-terminated process name
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ProcessName {
    bytes: [u8; NAME_CAPACITY],
    len: usize,
}

impl ProcessName {
    pub const fn empty() -> Self {
        Self {
            bytes: [0; NAME_CAPACITY],
            len: 0,
        }
    }

    /// Copy at most `NAME_CAPACITY - 1` bytes of `name`, never splitting a character
    pub fn new(name: &str) -> Self {
        let mut len = name.len().min(NAME_CAPACITY - 1);
        while !name.is_char_boundary(len) {
            len -= 1;
        }
        let mut bytes = [0; NAME_CAPACITY];
        bytes[..len].copy_from_slice(&name.as_bytes()[..len]);
        Self { bytes, len }
    }

    pub fn as_str(&self) -> &str {
        // only ever filled from a &str cut on a char boundary
        core::str::from_utf8(&self.bytes[..self.len]).unwrap_or("")
    }
}

impl fmt::Debug for ProcessName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl fmt::Display for ProcessName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Process Control Block (PCB)
#[derive(Debug, Clone, Copy)]
pub struct ProcessControlBlock {
    pub pid: Option<ProcessId>,
    pub name: ProcessName,
    pub state: ProcessState,
    pub program_counter: VirtAddr,
    pub stack_pointer: VirtAddr,
    pub stack_base: VirtAddr,
    pub priority: Priority,
    pub cpu_time: u64,
    /// Slot of the next PCB in the ready queue
    pub(crate) queue_link: Option<usize>,
}

impl ProcessControlBlock {
    fn vacant() -> Self {
        Self {
            pid: None,
            name: ProcessName::empty(),
            state: ProcessState::Terminated,
            program_counter: VirtAddr::zero(),
            stack_pointer: VirtAddr::zero(),
            stack_base: VirtAddr::zero(),
            priority: DEFAULT_PRIORITY,
            cpu_time: 0,
            queue_link: None,
        }
    }

    fn idle() -> Self {
        Self {
            pid: Some(IDLE_PID),
            name: ProcessName::new("null_process"),
            state: ProcessState::Current,
            priority: IDLE_PRIORITY,
            ..Self::vacant()
        }
    }

    /// A slot is reusable once its process is gone
    pub fn is_vacant(&self) -> bool {
        self.state == ProcessState::Terminated || self.pid.is_none()
    }

    fn info(&self) -> Option<ProcessInfo> {
        if self.is_vacant() {
            return None;
        }
        Some(ProcessInfo {
            pid: self.pid?,
            name: self.name,
            state: self.state,
            program_counter: self.program_counter.as_u64(),
            stack_pointer: self.stack_pointer.as_u64(),
            priority: self.priority,
            cpu_time: self.cpu_time,
        })
    }
}

/// Diagnostic snapshot of one live process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: ProcessId,
    pub name: ProcessName,
    pub state: ProcessState,
    pub program_counter: u64,
    pub stack_pointer: u64,
    pub priority: Priority,
    pub cpu_time: u64,
}

/// Process listing as printed by the diagnostics loop
pub struct ProcessListing<'a>(pub &'a [ProcessInfo]);

impl fmt::Display for ProcessListing<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "=== Process List ({} active) ===", self.0.len())?;
        write!(f, "{:<5} {:<16} {:<10} {:<12} {:<12} CPU Time", "PID", "Name", "State", "PC", "SP")?;
        for p in self.0 {
            write!(
                f,
                "\n{:<5} {:<16} {:<10} {:<#12x} {:<#12x} {}",
                p.pid, p.name, p.state, p.program_counter, p.stack_pointer, p.cpu_time
            )?;
        }
        Ok(())
    }
}

/// Process management errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessError {
    ProcessLimitReached,
    NoFreeSlot,
    StackAllocFailure,
    ProcessNotFound,
    CannotTerminateNull,
    DestinationNotFound,
    OutOfMemory,
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ProcessError::ProcessLimitReached => write!(f, "Maximum process limit reached"),
            ProcessError::NoFreeSlot => write!(f, "No free PCB slots"),
            ProcessError::StackAllocFailure => write!(f, "Failed to allocate stack"),
            ProcessError::ProcessNotFound => write!(f, "Process not found"),
            ProcessError::CannotTerminateNull => write!(f, "Cannot terminate null process"),
            ProcessError::DestinationNotFound => write!(f, "Destination process not found"),
            ProcessError::OutOfMemory => write!(f, "Out of memory"),
        }
    }
}

fn virt_addr(addr: u64) -> Result<VirtAddr, ProcessError> {
    VirtAddr::try_new(addr).map_err(|_| {
        warn!("non-canonical address {:#x}", addr);
        ProcessError::StackAllocFailure
    })
}

/// Fixed-size table of PCBs plus the stacks and messages they own
pub struct ProcessTable {
    slots: [ProcessControlBlock; MAX_PROCESSES],
    next_pid: ProcessId,
    current: Option<usize>,
    live: usize,
    stacks: StackAllocator,
    messages: MessageQueue,
}

impl ProcessTable {
    /// A fresh table holding only the idle process, which is running
    pub fn new(stack_size: usize) -> Self {
        let mut slots = [ProcessControlBlock::vacant(); MAX_PROCESSES];
        slots[0] = ProcessControlBlock::idle();

        info!("process manager initialized");
        Self {
            slots,
            next_pid: FIRST_USER_PID,
            current: Some(0),
            live: 1,
            stacks: StackAllocator::new(stack_size),
            messages: MessageQueue::new(),
        }
    }

    /// Create a process in the Ready state, returning its pid
    pub fn create(
        &mut self,
        heap: &mut Heap,
        entry: EntryPoint,
        name: &str,
    ) -> Result<ProcessId, ProcessError> {
        if self.live >= MAX_PROCESSES {
            warn!("maximum process limit reached");
            return Err(ProcessError::ProcessLimitReached);
        }

        let slot = match self.slots.iter().position(|p| p.is_vacant()) {
            Some(slot) => slot,
            None => {
                warn!("no free PCB slots");
                return Err(ProcessError::NoFreeSlot);
            }
        };

        let pid = self.next_pid;
        let stack = self
            .stacks
            .allocate(heap, pid)
            .map_err(|_| ProcessError::StackAllocFailure)?;

        let entry_addr = entry as usize as u64;
        let addresses = context::prepare_stack(heap, &stack, entry_addr)
            .map_err(|e| {
                warn!("could not build initial frame for PID {}: {}", pid, e);
                ProcessError::StackAllocFailure
            })
            .and_then(|sp| {
                Ok((
                    virt_addr(entry_addr)?,
                    virt_addr(sp as u64)?,
                    virt_addr(stack.base as u64)?,
                ))
            });
        let (program_counter, stack_pointer, stack_base) = match addresses {
            Ok(addresses) => addresses,
            Err(e) => {
                let _ = self.stacks.free(heap, pid);
                return Err(e);
            }
        };

        self.slots[slot] = ProcessControlBlock {
            pid: Some(pid),
            name: ProcessName::new(name),
            state: ProcessState::Ready,
            program_counter,
            stack_pointer,
            stack_base,
            priority: DEFAULT_PRIORITY,
            cpu_time: 0,
            queue_link: None,
        };
        self.live += 1;
        self.next_pid += 1;

        info!("created process PID {}: {}", pid, name);
        Ok(pid)
    }

    /// Tear a process down: stack, pending messages, then the slot itself.
    ///
    /// The caller unlinks it from the ready queue first; `Kernel::terminate_process`
    /// is the public way in.
    pub(crate) fn terminate(&mut self, heap: &mut Heap, pid: ProcessId) -> Result<(), ProcessError> {
        if pid == IDLE_PID {
            warn!("cannot terminate null process");
            return Err(ProcessError::CannotTerminateNull);
        }

        let slot = match self.slot_of(pid) {
            Some(slot) => slot,
            None => {
                warn!("process PID {} not found", pid);
                return Err(ProcessError::ProcessNotFound);
            }
        };

        // a missing stack is already reported by the allocator
        let _ = self.stacks.free(heap, pid);
        let dropped = self.messages.purge(heap, pid);
        if dropped > 0 {
            debug!("discarded {} pending messages of PID {}", dropped, pid);
        }

        self.slots[slot] = ProcessControlBlock::vacant();
        self.live -= 1;
        if self.current == Some(slot) {
            self.current = None;
        }

        info!("terminated process PID {}", pid);
        Ok(())
    }

    /// Change a process state; unknown pids are ignored.
    ///
    /// Terminated is refused, a slot only becomes vacant through termination.
    pub fn set_state(&mut self, pid: ProcessId, state: ProcessState) {
        if state == ProcessState::Terminated {
            warn!("refusing to mark PID {} terminated without tearing it down", pid);
            return;
        }
        if let Some(slot) = self.slot_of(pid) {
            self.set_slot_state(slot, state);
        }
    }

    pub fn get(&self, pid: ProcessId) -> Option<&ProcessControlBlock> {
        self.slot_of(pid).map(|slot| &self.slots[slot])
    }

    pub fn get_mut(&mut self, pid: ProcessId) -> Option<&mut ProcessControlBlock> {
        let slot = self.slot_of(pid)?;
        Some(&mut self.slots[slot])
    }

    /// State of `pid`, Terminated if there is no such process
    pub fn state_of(&self, pid: ProcessId) -> ProcessState {
        self.get(pid).map_or(ProcessState::Terminated, |p| p.state)
    }

    pub fn current_pid(&self) -> Option<ProcessId> {
        self.current.and_then(|slot| self.slots[slot].pid)
    }

    pub fn current_process(&self) -> Option<&ProcessControlBlock> {
        self.current.map(|slot| &self.slots[slot])
    }

    /// Every live process, in slot order
    pub fn list(&self) -> Vec<ProcessInfo> {
        self.slots.iter().filter_map(|p| p.info()).collect()
    }

    /// Pid the next successful `create` will hand out
    pub fn next_pid(&self) -> ProcessId {
        self.next_pid
    }

    pub fn live_count(&self) -> usize {
        self.live
    }

    pub fn stacks(&self) -> &StackAllocator {
        &self.stacks
    }

    pub fn messages(&self) -> &MessageQueue {
        &self.messages
    }

    /// Queue a copy of `payload` for `to`, tagged with the running process as sender
    pub fn send_message(
        &mut self,
        heap: &mut Heap,
        to: ProcessId,
        payload: &[u8],
    ) -> Result<(), ProcessError> {
        if payload.is_empty() {
            return Ok(());
        }

        if self.state_of(to) == ProcessState::Terminated {
            warn!("destination process {} not found", to);
            return Err(ProcessError::DestinationNotFound);
        }

        let from = self.current_pid().unwrap_or(IDLE_PID);
        self.messages
            .send(heap, from, to, payload)
            .map_err(|_| ProcessError::OutOfMemory)
    }

    /// Take the oldest message addressed to the running process
    pub fn receive_message(&mut self, heap: &mut Heap) -> Option<ReceivedMessage> {
        let me = self.current_pid()?;
        self.messages.receive(heap, me)
    }

    pub(crate) fn slot_of(&self, pid: ProcessId) -> Option<usize> {
        self.slots.iter().position(|p| p.pid == Some(pid))
    }

    pub(crate) fn slot(&self, slot: usize) -> &ProcessControlBlock {
        &self.slots[slot]
    }

    pub(crate) fn slot_mut(&mut self, slot: usize) -> &mut ProcessControlBlock {
        &mut self.slots[slot]
    }

    pub(crate) fn current_slot(&self) -> Option<usize> {
        self.current
    }

    pub(crate) fn set_slot_state(&mut self, slot: usize, state: ProcessState) {
        let pcb = &mut self.slots[slot];
        debug!("PID {:?}: {:?} -> {:?}", pcb.pid, pcb.state, state);
        pcb.state = state;
        if state == ProcessState::Current {
            self.current = Some(slot);
        }
    }
}
