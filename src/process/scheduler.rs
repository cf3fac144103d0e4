// Process Scheduler for kacchi
//
// The ready queue is intrusive: it is threaded through the `queue_link` field
// of the PCBs in the process table, so the scheduler owns no process storage.
use alloc::vec::Vec;
use core::fmt;
use log::{debug, info, trace, warn};

use crate::config::{IDLE_PID, MAX_PRIORITY};
use crate::process::pcb::{Priority, ProcessError, ProcessId, ProcessState, ProcessTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingAlgorithm {
    RoundRobin,
    Priority,
    FirstComeFirstServed,
}

impl fmt::Display for SchedulingAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SchedulingAlgorithm::RoundRobin => write!(f, "Round Robin"),
            SchedulingAlgorithm::Priority => write!(f, "Priority"),
            SchedulingAlgorithm::FirstComeFirstServed => write!(f, "FCFS"),
        }
    }
}

/// Scheduler with selectable policy, optional aging and a tick-driven quantum
pub struct Scheduler {
    algorithm: SchedulingAlgorithm,
    quantum: u64,
    aging: bool,
    max_priority: Priority,
    ready_head: Option<usize>,
    idle: usize,
    total_ticks: u64,
    slice_ticks: u64,
    context_switches: u64,
}

impl Scheduler {
    /// Reset all counters and bind to the idle process of `table`
    pub fn new(algorithm: SchedulingAlgorithm, quantum: u64, table: &ProcessTable) -> Self {
        let idle = table.slot_of(IDLE_PID).unwrap_or(0);
        match algorithm {
            SchedulingAlgorithm::RoundRobin => {
                info!("scheduler initialized with {} (quantum: {})", algorithm, quantum)
            }
            _ => info!("scheduler initialized with {}", algorithm),
        }
        Self {
            algorithm,
            quantum: quantum.max(1),
            aging: false,
            max_priority: MAX_PRIORITY,
            ready_head: None,
            idle,
            total_ticks: 0,
            slice_ticks: 0,
            context_switches: 0,
        }
    }

    /// Put a process in the ready queue and mark it Ready.
    ///
    /// Terminated and unknown processes are ignored. The idle process queues
    /// like any other once it has been switched out.
    pub fn enqueue(&mut self, table: &mut ProcessTable, pid: ProcessId) {
        let slot = match table.slot_of(pid) {
            Some(slot) if !table.slot(slot).is_vacant() => slot,
            _ => return,
        };
        if self.contains(table, slot) {
            table.set_slot_state(slot, ProcessState::Ready);
            return;
        }

        table.slot_mut(slot).queue_link = None;
        match self.algorithm {
            SchedulingAlgorithm::RoundRobin | SchedulingAlgorithm::FirstComeFirstServed => {
                self.append(table, slot)
            }
            SchedulingAlgorithm::Priority => self.insert_by_priority(table, slot),
        }
        table.set_slot_state(slot, ProcessState::Ready);
    }

    /// Unlink a process from the ready queue; a no-op if it is not queued
    pub fn dequeue(&mut self, table: &mut ProcessTable, pid: ProcessId) {
        if let Some(slot) = table.slot_of(pid) {
            self.unlink(table, slot);
        }
    }

    /// Choose the next process to run, applying aging if enabled
    pub fn pick_next(&mut self, table: &mut ProcessTable) -> Option<ProcessId> {
        self.pick_slot(table).and_then(|slot| table.slot(slot).pid)
    }

    /// Switch to the picked process, or to idle if nothing is ready
    pub fn schedule(&mut self, table: &mut ProcessTable) {
        let current = table.current_slot();
        let next = self.pick_slot(table).unwrap_or(self.idle);
        if current != Some(next) {
            self.switch_to(table, next);
        }
    }

    /// Logical context switch to `next`: state, queue membership and CPU time
    pub fn context_switch(
        &mut self,
        table: &mut ProcessTable,
        next: ProcessId,
    ) -> Result<(), ProcessError> {
        match table.slot_of(next) {
            Some(slot) if !table.slot(slot).is_vacant() => {
                self.switch_to(table, slot);
                Ok(())
            }
            _ => {
                warn!("context switch to unknown PID {}", next);
                Err(ProcessError::ProcessNotFound)
            }
        }
    }

    /// Advance the clock by one tick, preempting on quantum expiry
    pub fn timer_tick(&mut self, table: &mut ProcessTable) {
        self.total_ticks += 1;
        self.slice_ticks += 1;
        trace!("tick {} (slice {})", self.total_ticks, self.slice_ticks);

        let current = match table.current_process().and_then(|p| p.pid) {
            Some(pid) if pid != IDLE_PID => pid,
            _ => return,
        };
        if self.algorithm == SchedulingAlgorithm::RoundRobin && self.slice_ticks >= self.quantum {
            debug!("time quantum expired for PID {}", current);
            self.schedule(table);
        }
    }

    pub fn set_algorithm(&mut self, algorithm: SchedulingAlgorithm) {
        self.algorithm = algorithm;
        info!("scheduling policy changed to {}", algorithm);
    }

    pub fn set_quantum(&mut self, quantum: u64) {
        self.quantum = quantum.max(1);
        info!("time quantum set to {}", self.quantum);
    }

    pub fn set_aging(&mut self, enabled: bool) {
        self.aging = enabled;
        info!("aging {}", if enabled { "enabled" } else { "disabled" });
    }

    pub fn set_max_priority(&mut self, max_priority: Priority) {
        self.max_priority = max_priority;
    }

    pub fn algorithm(&self) -> SchedulingAlgorithm {
        self.algorithm
    }

    pub fn quantum(&self) -> u64 {
        self.quantum
    }

    pub fn aging(&self) -> bool {
        self.aging
    }

    /// Ticks the running process has used since it was switched in
    pub fn slice_ticks(&self) -> u64 {
        self.slice_ticks
    }

    /// Queued pids, head first
    pub fn ready_queue(&self, table: &ProcessTable) -> Vec<ProcessId> {
        self.slots(table).filter_map(|slot| table.slot(slot).pid).collect()
    }

    pub fn stats(&self, table: &ProcessTable) -> SchedulerStats {
        SchedulerStats {
            total_ticks: self.total_ticks,
            context_switches: self.context_switches,
            ready_queue_len: self.slots(table).count(),
            quantum: self.quantum,
            aging: self.aging,
            algorithm: self.algorithm,
        }
    }

    fn pick_slot(&mut self, table: &mut ProcessTable) -> Option<usize> {
        let head = self.ready_head?;

        let selected = match self.algorithm {
            SchedulingAlgorithm::RoundRobin | SchedulingAlgorithm::FirstComeFirstServed => head,
            // strict less-than keeps the first of equal priorities
            SchedulingAlgorithm::Priority => self.slots(table).fold(head, |best, slot| {
                if table.slot(slot).priority < table.slot(best).priority {
                    slot
                } else {
                    best
                }
            }),
        };

        if self.aging {
            let waiting: Vec<usize> = self.slots(table).filter(|&s| s != selected).collect();
            for slot in waiting {
                let pcb = table.slot_mut(slot);
                if pcb.priority < self.max_priority {
                    pcb.priority += 1;
                }
            }
            let pcb = table.slot_mut(selected);
            if pcb.priority > 1 {
                pcb.priority -= 1;
            }
        }

        Some(selected)
    }

    fn switch_to(&mut self, table: &mut ProcessTable, next: usize) {
        let current = table.current_slot();
        if current == Some(next) {
            return;
        }

        info!(
            "context switch: PID {:?} -> PID {:?}",
            current.and_then(|slot| table.slot(slot).pid),
            table.slot(next).pid
        );

        if let Some(slot) = current {
            if table.slot(slot).state == ProcessState::Current {
                table.set_slot_state(slot, ProcessState::Ready);
                if let Some(pid) = table.slot(slot).pid {
                    self.enqueue(table, pid);
                }
            }
            table.slot_mut(slot).cpu_time += self.slice_ticks;
        }

        self.unlink(table, next);
        table.set_slot_state(next, ProcessState::Current);

        self.slice_ticks = 0;
        self.context_switches += 1;
    }

    fn append(&mut self, table: &mut ProcessTable, slot: usize) {
        let tail = self.slots(table).last();
        match tail {
            Some(tail) => table.slot_mut(tail).queue_link = Some(slot),
            None => self.ready_head = Some(slot),
        }
    }

    // Insert ahead of the first queued process with a numerically smaller priority
    fn insert_by_priority(&mut self, table: &mut ProcessTable, slot: usize) {
        let priority = table.slot(slot).priority;
        let mut prev = None;
        let mut cursor = self.ready_head;
        while let Some(cur) = cursor {
            if table.slot(cur).priority < priority {
                break;
            }
            prev = Some(cur);
            cursor = table.slot(cur).queue_link;
        }

        table.slot_mut(slot).queue_link = cursor;
        match prev {
            Some(prev) => table.slot_mut(prev).queue_link = Some(slot),
            None => self.ready_head = Some(slot),
        }
    }

    fn unlink(&mut self, table: &mut ProcessTable, slot: usize) {
        let mut prev = None;
        let mut cursor = self.ready_head;
        while let Some(cur) = cursor {
            if cur == slot {
                let next = table.slot(cur).queue_link;
                match prev {
                    Some(prev) => table.slot_mut(prev).queue_link = next,
                    None => self.ready_head = next,
                }
                table.slot_mut(cur).queue_link = None;
                return;
            }
            prev = Some(cur);
            cursor = table.slot(cur).queue_link;
        }
    }

    fn contains(&self, table: &ProcessTable, slot: usize) -> bool {
        self.slots(table).any(|s| s == slot)
    }

    fn slots<'a>(&self, table: &'a ProcessTable) -> QueueSlots<'a> {
        QueueSlots {
            table,
            cursor: self.ready_head,
        }
    }
}

struct QueueSlots<'a> {
    table: &'a ProcessTable,
    cursor: Option<usize>,
}

impl Iterator for QueueSlots<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let slot = self.cursor?;
        self.cursor = self.table.slot(slot).queue_link;
        Some(slot)
    }
}

/// Scheduler statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStats {
    pub total_ticks: u64,
    pub context_switches: u64,
    pub ready_queue_len: usize,
    pub quantum: u64,
    pub aging: bool,
    pub algorithm: SchedulingAlgorithm,
}

impl fmt::Display for SchedulerStats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "=== Scheduler Statistics ===")?;
        writeln!(f, "Policy: {}", self.algorithm)?;
        writeln!(f, "Total timer ticks: {}", self.total_ticks)?;
        writeln!(f, "Context switches: {}", self.context_switches)?;
        writeln!(f, "Processes in ready queue: {}", self.ready_queue_len)?;
        writeln!(f, "Current time quantum: {}", self.quantum)?;
        write!(f, "Aging: {}", if self.aging { "ON" } else { "OFF" })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::STACK_SIZE;
    use crate::memory::{leak_arena, Heap};

    fn worker() {}

    fn setup(algorithm: SchedulingAlgorithm, quantum: u64) -> (Heap, ProcessTable, Scheduler) {
        let heap = Heap::from_static(leak_arena(128 * 1024));
        let table = ProcessTable::new(STACK_SIZE);
        let scheduler = Scheduler::new(algorithm, quantum, &table);
        (heap, table, scheduler)
    }

    fn spawn(heap: &mut Heap, table: &mut ProcessTable, sched: &mut Scheduler, name: &str) -> ProcessId {
        let pid = table.create(heap, worker, name).unwrap();
        sched.enqueue(table, pid);
        pid
    }

    #[test]
    fn fcfs_picks_in_arrival_order() {
        let (mut heap, mut table, mut sched) = setup(SchedulingAlgorithm::FirstComeFirstServed, 100);
        let a = spawn(&mut heap, &mut table, &mut sched, "a");
        let b = spawn(&mut heap, &mut table, &mut sched, "b");
        let c = spawn(&mut heap, &mut table, &mut sched, "c");

        let mut order = Vec::new();
        for _ in 0..3 {
            let next = sched.pick_next(&mut table).unwrap();
            order.push(next);
            sched.dequeue(&mut table, next);
        }
        assert_eq!(order, [a, b, c]);
    }

    #[test]
    fn priority_picks_smallest_value() {
        let (mut heap, mut table, mut sched) = setup(SchedulingAlgorithm::Priority, 100);
        let mut pids = Vec::new();
        for (name, prio) in [("five", 5), ("two", 2), ("eight", 8)] {
            let pid = table.create(&mut heap, worker, name).unwrap();
            table.get_mut(pid).unwrap().priority = prio;
            pids.push(pid);
        }
        // enqueue in every rotation; the pick must not depend on insertion order
        for rotation in 0..3 {
            for i in 0..3 {
                sched.enqueue(&mut table, pids[(rotation + i) % 3]);
            }
            assert_eq!(sched.pick_next(&mut table), Some(pids[1]));
            for &pid in &pids {
                sched.dequeue(&mut table, pid);
            }
        }
    }

    #[test]
    fn priority_ties_go_to_first_in_queue() {
        let (mut heap, mut table, mut sched) = setup(SchedulingAlgorithm::Priority, 100);
        let a = spawn(&mut heap, &mut table, &mut sched, "a");
        let _b = spawn(&mut heap, &mut table, &mut sched, "b");
        assert_eq!(sched.pick_next(&mut table), Some(a));
    }

    #[test]
    fn priority_insertion_orders_queue() {
        let (mut heap, mut table, mut sched) = setup(SchedulingAlgorithm::Priority, 100);
        let mut pids = Vec::new();
        for prio in [3, 7, 5] {
            let pid = table.create(&mut heap, worker, "p").unwrap();
            table.get_mut(pid).unwrap().priority = prio;
            sched.enqueue(&mut table, pid);
            pids.push(pid);
        }
        assert_eq!(sched.ready_queue(&table), [pids[1], pids[2], pids[0]]);
    }

    #[test]
    fn aging_moves_priorities_as_observed() {
        let (mut heap, mut table, mut sched) = setup(SchedulingAlgorithm::Priority, 100);
        sched.set_aging(true);
        let low = table.create(&mut heap, worker, "low").unwrap();
        let high = table.create(&mut heap, worker, "high").unwrap();
        let capped = table.create(&mut heap, worker, "capped").unwrap();
        table.get_mut(low).unwrap().priority = 4;
        table.get_mut(high).unwrap().priority = 2;
        table.get_mut(capped).unwrap().priority = MAX_PRIORITY;
        for pid in [low, high, capped] {
            sched.enqueue(&mut table, pid);
        }

        assert_eq!(sched.pick_next(&mut table), Some(high));
        assert_eq!(table.get(high).unwrap().priority, 1);
        assert_eq!(table.get(low).unwrap().priority, 5);
        assert_eq!(table.get(capped).unwrap().priority, MAX_PRIORITY);

        // the selected process is floored at one
        assert_eq!(sched.pick_next(&mut table), Some(high));
        assert_eq!(table.get(high).unwrap().priority, 1);
    }

    #[test]
    fn round_robin_switches_exactly_at_quantum() {
        let (mut heap, mut table, mut sched) = setup(SchedulingAlgorithm::RoundRobin, 5);
        let a = spawn(&mut heap, &mut table, &mut sched, "a");
        let b = spawn(&mut heap, &mut table, &mut sched, "b");

        sched.schedule(&mut table);
        assert_eq!(table.current_pid(), Some(a));

        for _ in 0..4 {
            sched.timer_tick(&mut table);
            assert_eq!(table.current_pid(), Some(a));
        }
        sched.timer_tick(&mut table);
        assert_eq!(table.current_pid(), Some(b));
        assert_eq!(table.get(a).unwrap().cpu_time, 5);
        assert_eq!(table.state_of(a), ProcessState::Ready);
        assert_eq!(sched.ready_queue(&table), [IDLE_PID, a]);
    }

    #[test]
    fn quantum_only_applies_to_round_robin() {
        let (mut heap, mut table, mut sched) = setup(SchedulingAlgorithm::FirstComeFirstServed, 2);
        let a = spawn(&mut heap, &mut table, &mut sched, "a");
        let _b = spawn(&mut heap, &mut table, &mut sched, "b");
        sched.schedule(&mut table);
        for _ in 0..10 {
            sched.timer_tick(&mut table);
        }
        assert_eq!(table.current_pid(), Some(a));
    }

    #[test]
    fn empty_queue_falls_back_to_idle() {
        let (mut heap, mut table, mut sched) = setup(SchedulingAlgorithm::RoundRobin, 100);
        let a = spawn(&mut heap, &mut table, &mut sched, "a");
        sched.schedule(&mut table);
        assert_eq!(table.current_pid(), Some(a));

        table.set_state(a, ProcessState::Blocked);
        sched.schedule(&mut table);
        assert_eq!(table.current_pid(), Some(IDLE_PID));
        assert!(sched.ready_queue(&table).is_empty());

        // nothing queued at all: idle keeps the CPU without a switch
        let switches = sched.stats(&table).context_switches;
        sched.schedule(&mut table);
        assert_eq!(table.current_pid(), Some(IDLE_PID));
        assert_eq!(sched.stats(&table).context_switches, switches);
    }

    #[test]
    fn idle_is_requeued_when_switched_out() {
        let (mut heap, mut table, mut sched) = setup(SchedulingAlgorithm::RoundRobin, 100);
        let _a = spawn(&mut heap, &mut table, &mut sched, "a");
        let b = spawn(&mut heap, &mut table, &mut sched, "b");

        sched.schedule(&mut table);
        assert_eq!(table.state_of(IDLE_PID), ProcessState::Ready);
        assert_eq!(sched.ready_queue(&table), [b, IDLE_PID]);

        sched.schedule(&mut table);
        sched.schedule(&mut table);
        assert_eq!(table.current_pid(), Some(IDLE_PID));
    }

    #[test]
    fn enqueue_is_idempotent() {
        let (mut heap, mut table, mut sched) = setup(SchedulingAlgorithm::RoundRobin, 100);
        let a = spawn(&mut heap, &mut table, &mut sched, "a");
        let b = spawn(&mut heap, &mut table, &mut sched, "b");
        sched.enqueue(&mut table, a);
        assert_eq!(sched.ready_queue(&table), [a, b]);
    }

    #[test]
    fn dequeue_unknown_is_noop() {
        let (mut heap, mut table, mut sched) = setup(SchedulingAlgorithm::RoundRobin, 100);
        let a = spawn(&mut heap, &mut table, &mut sched, "a");
        sched.dequeue(&mut table, 77);
        assert_eq!(sched.ready_queue(&table), [a]);
    }

    #[test]
    fn context_switch_to_current_is_noop() {
        let (_heap, mut table, mut sched) = setup(SchedulingAlgorithm::RoundRobin, 100);
        sched.context_switch(&mut table, IDLE_PID).unwrap();
        assert_eq!(sched.stats(&table).context_switches, 0);
        assert_eq!(
            sched.context_switch(&mut table, 12),
            Err(ProcessError::ProcessNotFound)
        );
    }

    #[test]
    fn stats_reflect_activity() {
        let (mut heap, mut table, mut sched) = setup(SchedulingAlgorithm::RoundRobin, 3);
        spawn(&mut heap, &mut table, &mut sched, "a");
        spawn(&mut heap, &mut table, &mut sched, "b");
        sched.schedule(&mut table);
        for _ in 0..3 {
            sched.timer_tick(&mut table);
        }
        let stats = sched.stats(&table);
        assert_eq!(stats.total_ticks, 3);
        assert_eq!(stats.context_switches, 2);
        assert_eq!(stats.ready_queue_len, 2);
        assert_eq!(stats.quantum, 3);
        assert!(!stats.aging);
    }

    #[test]
    fn zero_quantum_is_clamped() {
        let (_heap, _table, mut sched) = setup(SchedulingAlgorithm::RoundRobin, 0);
        assert_eq!(sched.quantum(), 1);
        sched.set_quantum(0);
        assert_eq!(sched.quantum(), 1);
    }
}
