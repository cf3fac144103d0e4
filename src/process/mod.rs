// Process management for kacchi
pub mod context;
pub mod pcb;
pub mod scheduler;

pub use context::{InitialFrame, FRAME_SIZE};
pub use pcb::{
    EntryPoint, Priority, ProcessControlBlock, ProcessError, ProcessId, ProcessInfo,
    ProcessListing, ProcessName, ProcessState, ProcessTable,
};
pub use scheduler::{Scheduler, SchedulerStats, SchedulingAlgorithm};
