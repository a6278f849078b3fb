//! Drains the `log` facade to the early serial console established by
//! [`crate::out::uart`], alongside the `print!`/`println!` macros but
//! filterable by level.

use core::fmt::Write;

use log::{Level, Log, Metadata, Record};

use crate::out::uart::UART_COM1;

struct UartLogger;

static LOGGER: UartLogger = UartLogger;

impl Log for UartLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Info
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let mut uart = UART_COM1.0.lock();
        let _ = writeln!(uart, "[{}] {}", record.level(), record.args());
    }

    fn flush(&self) {}
}

/// Installs the UART-backed logger. Must run once, before the first
/// `log::info!`/`log::error!` call that should actually be visible.
pub fn init() {
    log::set_logger(&LOGGER)
        .map(|()| log::set_max_level(log::LevelFilter::Info))
        .unwrap_or(());
}
