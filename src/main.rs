// Hosted demo for kacchi
//
// Stands in for the boot path and the timer interrupt: stdout is the console,
// a leaked buffer is the heap arena, and a plain loop delivers the ticks.
use std::io::Write;

use kacchi::config::HEAP_SIZE;
use kacchi::{kprintln, Kernel, KernelConfig, OutputSink, SchedulingAlgorithm};
use log::{error, info};

const MAX_TICKS: u64 = 500;
const REPORT_EVERY: u64 = 100;

struct Stdout;

impl OutputSink for Stdout {
    fn put_char(&mut self, byte: u8) {
        let _ = std::io::stdout().write_all(&[byte]);
    }

    fn put_str(&mut self, s: &str) {
        let _ = std::io::stdout().write_all(s.as_bytes());
    }
}

fn process1() {}
fn process2() {}
fn process3() {}

fn banner(title: &str) {
    kprintln!("========================================");
    kprintln!("{}", title);
    kprintln!("========================================");
}

fn main() {
    let config = KernelConfig::default()
        .with_algorithm(SchedulingAlgorithm::RoundRobin)
        .with_quantum(100);

    kacchi::install_sink(Box::new(Stdout));
    if kacchi::init_logger(config.log_level).is_err() {
        kprintln!("logger already installed");
    }

    banner("    kacchi - kernel core demo");
    kprintln!();

    let arena: &'static mut [u8] = Box::leak(vec![0u8; HEAP_SIZE].into_boxed_slice());
    let mut kernel = Kernel::with_arena(arena, config);

    let programs: [(fn(), &str); 3] = [
        (process1, "TestProc1"),
        (process2, "TestProc2"),
        (process3, "TestProc3"),
    ];
    for (entry, name) in programs {
        match kernel.spawn(entry, name) {
            Ok(pid) => info!("spawned {} as PID {}", name, pid),
            Err(e) => error!("could not spawn {}: {}", name, e),
        }
    }

    kprintln!();
    info!("starting scheduler");

    for tick in 0..MAX_TICKS {
        kernel.timer_tick();
        kernel.schedule();

        if tick > 0 && tick % REPORT_EVERY == 0 {
            kprintln!();
            banner(&format!("=== System Status (Tick {}) ===", tick));
            kernel.print_status();
            kprintln!("========================================");
            kprintln!();
        }
    }

    kprintln!();
    banner("=== Final System Statistics ===");
    kernel.print_status();
    kprintln!("========================================");
    kprintln!();
    kprintln!("Demonstration completed.");
}
