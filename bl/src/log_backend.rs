//! Drains the `log` facade to COM1, the same way the kernel side does
//! once it's running — except bootstrap only ever gets one UART, so
//! there's no per-port indirection to thread through.

use core::fmt::Write;

use log::{Level, Log, Metadata, Record};

use crate::uart::UART_COM1;

struct BootUartLogger;
static LOGGER: BootUartLogger = BootUartLogger;

impl Log for BootUartLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Info
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        if let Some(uart) = UART_COM1.lock().as_mut() {
            let _ = writeln!(uart, "[{}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

pub fn init() {
    log::set_logger(&LOGGER)
        .map(|()| log::set_max_level(log::LevelFilter::Info))
        .unwrap_or(());
}
