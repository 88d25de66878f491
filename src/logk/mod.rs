//! Kernel backend for the `log` facade. Records go out over the console
//! UART; debug-and-below records carry the source location.

use log::{Log, Metadata, Record};

/// Install the UART logger. Called once during bring-up, before any
/// subsystem that logs.
pub(crate) fn init() {
    match log::set_logger(&UART_LOGGER) {
        Ok(_) => log::set_max_level(log::LevelFilter::Trace),
        Err(_) => println_k!("logger already installed"),
    }
}

struct UartLogger;

impl Log for UartLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::Level::Trace
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            if record.level() < log::Level::Info {
                println_k!(
                    "[{}][{}:{}]: {}",
                    record.level(),
                    record.file().unwrap_or("<unknown>"),
                    record.line().unwrap_or_default(),
                    record.args()
                );
            } else {
                println_k!("[{}]: {}", record.level(), record.args());
            }
        }
    }

    fn flush(&self) {}
}

static UART_LOGGER: UartLogger = UartLogger;
