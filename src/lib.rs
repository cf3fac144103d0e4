//! kacchi: resource core of a small single-CPU kernel.
//!
//! A first-fit heap over a raw arena, a fixed process table with a FIFO
//! message queue, and a tick-driven scheduler. The library is `no_std` and
//! only needs `alloc`; the hosted binary in `main.rs` drives it for a demo.
#![cfg_attr(not(test), no_std)]

extern crate alloc;

#[macro_use]
pub mod console;
pub mod config;
pub mod ipc;
pub mod kernel;
pub mod memory;
pub mod process;

pub use config::KernelConfig;
pub use console::{init_logger, install_sink, OutputSink};
pub use ipc::ReceivedMessage;
pub use kernel::Kernel;
pub use memory::{MemoryError, MemoryStats};
pub use process::{
    ProcessError, ProcessId, ProcessInfo, ProcessState, SchedulerStats, SchedulingAlgorithm,
};
