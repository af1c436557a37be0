//! Kernel logging subsystem.
//!
//! Implements [`log::Log`] over the 16550A serial console so the rest of
//! the kernel can use the ordinary `log::{info,warn,error,debug,trace}!`
//! macros. Installed once at boot from [`crate::boot::entry`].
//!
//! The panic path (`crate::panic`) does not go through this logger: if
//! the panic was caused by a deadlock on the logger's own lock, routing
//! panic output through `log` would hang forever. Panic output writes
//! to the serial port directly.

use core::fmt::Write;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::arch::x86_64::serial;
use crate::sync::spinlock::SpinLock;

static INSTALLED: AtomicBool = AtomicBool::new(false);
static MIN_LEVEL: SpinLock<::log::LevelFilter> = SpinLock::new(::log::LevelFilter::Info);

struct SerialLogger;

impl ::log::Log for SerialLogger {
    fn enabled(&self, metadata: &::log::Metadata) -> bool {
        metadata.level() <= *MIN_LEVEL.lock()
    }

    fn log(&self, record: &::log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut out = serial::writer();
        let _ = writeln!(
            out,
            "[{level:<5}] {target}: {args}",
            level = record.level(),
            target = record.target(),
            args = record.args()
        );
    }

    fn flush(&self) {}
}

static LOGGER: SerialLogger = SerialLogger;

/// Install the serial-backed logger as the global `log` sink. Idempotent:
/// a second call is a no-op, matching `log::set_logger`'s own one-shot
/// contract.
pub fn init(level: ::log::LevelFilter) {
    if INSTALLED.swap(true, Ordering::SeqCst) {
        return;
    }
    *MIN_LEVEL.lock() = level;
    ::log::set_logger(&LOGGER)
        .map(|()| ::log::set_max_level(level))
        .ok();
}

/// Raise or lower the active log level at runtime (e.g. from a debug
/// console command).
pub fn set_level(level: ::log::LevelFilter) {
    *MIN_LEVEL.lock() = level;
    ::log::set_max_level(level);
}
