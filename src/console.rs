// Diagnostic console for kacchi
//
// The core never talks to hardware. Whoever boots it installs an `OutputSink`
// (a UART, a VGA buffer, stdout in the hosted demo) and every `kprintln!` and
// `log` record ends up there.

use alloc::boxed::Box;
use core::fmt;
use lazy_static::lazy_static;
use log::{LevelFilter, Metadata, Record, SetLoggerError};
use spin::Mutex;

/// Byte-oriented output device
pub trait OutputSink: Send {
    /// Emit a single byte
    fn put_char(&mut self, byte: u8);

    /// Emit a string, byte by byte unless the device can do better
    fn put_str(&mut self, s: &str) {
        for byte in s.bytes() {
            self.put_char(byte);
        }
    }
}

/// Console front end that forwards formatted text to the installed sink
pub struct Console {
    sink: Option<Box<dyn OutputSink>>,
}

impl Console {
    pub const fn new() -> Self {
        Self { sink: None }
    }

    pub fn is_attached(&self) -> bool {
        self.sink.is_some()
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Write for Console {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if let Some(sink) = self.sink.as_mut() {
            sink.put_str(s);
        }
        Ok(())
    }
}

lazy_static! {
    pub static ref CONSOLE: Mutex<Console> = Mutex::new(Console::new());
}

/// Bind the console to an output device, returning the previous one
pub fn install_sink(sink: Box<dyn OutputSink>) -> Option<Box<dyn OutputSink>> {
    CONSOLE.lock().sink.replace(sink)
}

/// Detach the current output device; output is discarded afterwards
pub fn remove_sink() -> Option<Box<dyn OutputSink>> {
    CONSOLE.lock().sink.take()
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use fmt::Write;
    // Console::write_str never fails
    let _ = CONSOLE.lock().write_fmt(args);
}

/// Print to the kernel console
#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => {
        $crate::console::_print(format_args!($($arg)*))
    };
}

/// Print to the kernel console, with a newline
#[macro_export]
macro_rules! kprintln {
    () => ($crate::kprint!("\n"));
    ($($arg:tt)*) => ($crate::kprint!("{}\n", format_args!($($arg)*)));
}

/// `log` backend writing records to the kernel console
pub struct KernelLogger;

impl log::Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            crate::kprintln!("[{:5}] {}: {}", record.level(), record.target(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: KernelLogger = KernelLogger;

/// Install `KernelLogger` as the global logger
pub fn init_logger(level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);
    Ok(())
}
