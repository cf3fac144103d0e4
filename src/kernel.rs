// Kernel facade for kacchi
//
// Owns the heap, the process table and the scheduler, and exposes the
// operations the drive loop calls. Every subsystem is an explicit field; there
// is no hidden global state besides the diagnostic console.
use alloc::vec::Vec;
use log::info;

use crate::config::{KernelConfig, IDLE_PID};
use crate::ipc::ReceivedMessage;
use crate::memory::{Heap, MemoryError, MemoryStats};
use crate::process::{
    EntryPoint, Priority, ProcessControlBlock, ProcessError, ProcessId, ProcessInfo,
    ProcessListing, ProcessState, ProcessTable, Scheduler, SchedulerStats, SchedulingAlgorithm,
};

pub struct Kernel {
    heap: Heap,
    processes: ProcessTable,
    scheduler: Scheduler,
}

impl Kernel {
    /// Bring the core up over the arena `[arena_base, arena_base + arena_size)`.
    ///
    /// # Safety
    ///
    /// The arena must be valid, writable memory owned by the kernel for as
    /// long as the returned value lives.
    pub unsafe fn new(arena_base: usize, arena_size: usize, config: KernelConfig) -> Self {
        let mut heap = Heap::new();
        heap.init(arena_base, arena_size);
        Self::with_heap(heap, config)
    }

    /// Bring the core up over a leaked arena
    pub fn with_arena(arena: &'static mut [u8], config: KernelConfig) -> Self {
        Self::with_heap(Heap::from_static(arena), config)
    }

    fn with_heap(heap: Heap, config: KernelConfig) -> Self {
        let processes = ProcessTable::new(config.stack_size);
        let mut scheduler = Scheduler::new(config.algorithm, config.quantum, &processes);
        scheduler.set_max_priority(config.max_priority);
        if config.aging {
            scheduler.set_aging(true);
        }

        info!("kernel core ready");
        Self {
            heap,
            processes,
            scheduler,
        }
    }

    pub fn create_process(&mut self, entry: EntryPoint, name: &str) -> Result<ProcessId, ProcessError> {
        self.processes.create(&mut self.heap, entry, name)
    }

    /// Create a process and put it straight into the ready queue
    pub fn spawn(&mut self, entry: EntryPoint, name: &str) -> Result<ProcessId, ProcessError> {
        let pid = self.create_process(entry, name)?;
        self.scheduler.enqueue(&mut self.processes, pid);
        Ok(pid)
    }

    /// Terminate a process, unlinking it from the ready queue and releasing
    /// its stack and messages
    pub fn terminate_process(&mut self, pid: ProcessId) -> Result<(), ProcessError> {
        if pid != IDLE_PID && self.processes.get(pid).is_some() {
            self.scheduler.dequeue(&mut self.processes, pid);
        }
        self.processes.terminate(&mut self.heap, pid)
    }

    /// Terminate the running process
    pub fn exit_current(&mut self) -> Result<(), ProcessError> {
        let pid = self.processes.current_pid().ok_or(ProcessError::ProcessNotFound)?;
        self.terminate_process(pid)
    }

    /// Change a process state; Terminated goes through `terminate_process`
    pub fn set_process_state(&mut self, pid: ProcessId, state: ProcessState) {
        if state == ProcessState::Terminated {
            let _ = self.terminate_process(pid);
        } else {
            self.processes.set_state(pid, state);
        }
    }

    pub fn set_priority(&mut self, pid: ProcessId, priority: Priority) -> Result<(), ProcessError> {
        let pcb = self.processes.get_mut(pid).ok_or(ProcessError::ProcessNotFound)?;
        pcb.priority = priority;
        Ok(())
    }

    pub fn process(&self, pid: ProcessId) -> Option<&ProcessControlBlock> {
        self.processes.get(pid)
    }

    pub fn process_state(&self, pid: ProcessId) -> ProcessState {
        self.processes.state_of(pid)
    }

    pub fn current_pid(&self) -> Option<ProcessId> {
        self.processes.current_pid()
    }

    pub fn list_processes(&self) -> Vec<ProcessInfo> {
        self.processes.list()
    }

    pub fn enqueue(&mut self, pid: ProcessId) {
        self.scheduler.enqueue(&mut self.processes, pid);
    }

    pub fn dequeue(&mut self, pid: ProcessId) {
        self.scheduler.dequeue(&mut self.processes, pid);
    }

    pub fn ready_queue(&self) -> Vec<ProcessId> {
        self.scheduler.ready_queue(&self.processes)
    }

    pub fn send_message(&mut self, to: ProcessId, payload: &[u8]) -> Result<(), ProcessError> {
        self.processes.send_message(&mut self.heap, to, payload)
    }

    pub fn receive_message(&mut self) -> Option<ReceivedMessage> {
        self.processes.receive_message(&mut self.heap)
    }

    pub fn timer_tick(&mut self) {
        self.scheduler.timer_tick(&mut self.processes);
    }

    pub fn schedule(&mut self) {
        self.scheduler.schedule(&mut self.processes);
    }

    pub fn pick_next(&mut self) -> Option<ProcessId> {
        self.scheduler.pick_next(&mut self.processes)
    }

    pub fn context_switch(&mut self, next: ProcessId) -> Result<(), ProcessError> {
        self.scheduler.context_switch(&mut self.processes, next)
    }

    pub fn set_policy(&mut self, algorithm: SchedulingAlgorithm) {
        self.scheduler.set_algorithm(algorithm);
    }

    pub fn set_quantum(&mut self, quantum: u64) {
        self.scheduler.set_quantum(quantum);
    }

    pub fn set_aging(&mut self, enabled: bool) {
        self.scheduler.set_aging(enabled);
    }

    pub fn allocate(&mut self, size: usize) -> Result<usize, MemoryError> {
        self.heap.allocate(size)
    }

    pub fn free(&mut self, address: usize) -> Result<(), MemoryError> {
        self.heap.free(address)
    }

    pub fn memory_stats(&self) -> MemoryStats {
        MemoryStats {
            active_stacks: self.processes.stacks().len(),
            ..self.heap.stats()
        }
    }

    pub fn scheduler_stats(&self) -> SchedulerStats {
        self.scheduler.stats(&self.processes)
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn processes(&self) -> &ProcessTable {
        &self.processes
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Print memory, process and scheduler status to the console
    pub fn print_status(&self) {
        let processes = self.list_processes();
        kprintln!("{}", self.memory_stats());
        kprintln!();
        kprintln!("{}", ProcessListing(&processes));
        kprintln!();
        kprintln!("{}", self.scheduler_stats());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::leak_arena;

    fn worker() {}

    fn kernel(config: KernelConfig) -> Kernel {
        Kernel::with_arena(leak_arena(128 * 1024), config)
    }

    #[test]
    fn terminating_queued_process_leaves_queue_consistent() {
        let mut k = kernel(KernelConfig::default());
        let a = k.spawn(worker, "a").unwrap();
        let b = k.spawn(worker, "b").unwrap();
        let c = k.spawn(worker, "c").unwrap();

        k.terminate_process(b).unwrap();
        assert_eq!(k.ready_queue(), [a, c]);
        assert_eq!(k.memory_stats().active_stacks, 2);
    }

    #[test]
    fn terminating_running_process_hands_cpu_on() {
        let mut k = kernel(KernelConfig::default());
        let a = k.spawn(worker, "a").unwrap();
        let b = k.spawn(worker, "b").unwrap();
        k.schedule();
        assert_eq!(k.current_pid(), Some(a));

        k.exit_current().unwrap();
        assert_eq!(k.current_pid(), None);
        k.schedule();
        assert_eq!(k.current_pid(), Some(b));
        assert_eq!(k.ready_queue(), [IDLE_PID]);
    }

    #[test]
    fn every_termination_path_keeps_queue_linked() {
        let mut k = kernel(KernelConfig::default());
        let a = k.spawn(worker, "a").unwrap();
        let b = k.spawn(worker, "b").unwrap();
        let c = k.spawn(worker, "c").unwrap();
        let d = k.spawn(worker, "d").unwrap();
        let e = k.spawn(worker, "e").unwrap();

        k.terminate_process(b).unwrap();
        k.set_process_state(d, ProcessState::Terminated);
        assert_eq!(k.process_state(d), ProcessState::Terminated);
        assert_eq!(k.ready_queue(), [a, c, e]);

        // running process, with idle and the rest queued behind it
        k.schedule();
        assert_eq!(k.current_pid(), Some(a));
        k.exit_current().unwrap();
        assert_eq!(k.ready_queue(), [c, e, IDLE_PID]);

        // a freed slot is reused without disturbing the queue
        let f = k.spawn(worker, "f").unwrap();
        assert_eq!(k.ready_queue(), [c, e, IDLE_PID, f]);
    }

    #[test]
    fn idle_cannot_be_terminated() {
        let mut k = kernel(KernelConfig::default());
        assert_eq!(
            k.terminate_process(IDLE_PID),
            Err(ProcessError::CannotTerminateNull)
        );
        assert_eq!(k.current_pid(), Some(IDLE_PID));

        let a = k.spawn(worker, "a").unwrap();
        k.schedule();
        assert_eq!(k.current_pid(), Some(a));
        assert!(k.terminate_process(IDLE_PID).is_err());
        assert_eq!(k.ready_queue(), [IDLE_PID]);
    }

    #[test]
    fn memory_stats_include_stacks() {
        let mut k = kernel(KernelConfig::default().with_stack_size(1024));
        k.create_process(worker, "a").unwrap();
        let stats = k.memory_stats();
        assert_eq!(stats.active_stacks, 1);
        assert_eq!(stats.used, 1024);
        assert_eq!(stats.free, stats.total - 1024);
    }

    #[test]
    fn set_priority_requires_live_process() {
        let mut k = kernel(KernelConfig::default());
        let a = k.create_process(worker, "a").unwrap();
        k.set_priority(a, 4).unwrap();
        assert_eq!(k.process(a).unwrap().priority, 4);
        assert_eq!(k.set_priority(99, 1), Err(ProcessError::ProcessNotFound));
    }

    #[test]
    fn aging_flag_comes_from_config() {
        let k = kernel(KernelConfig::default().with_aging(true));
        assert!(k.scheduler_stats().aging);
    }
}
