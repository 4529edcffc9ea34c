//! Kernel logging (ambient stack, SPEC_FULL.md §B).
//!
//! Rather than the teacher's bespoke in-memory ring buffer + framebuffer
//! writer (`log.rs`, meaningful only with a physical display to draw to),
//! a hosted kernel logs through the `log` facade crate like
//! `panda-kernel` and `N10h0ggr-Gladix` do, so an embedder can route
//! kernel diagnostics into whatever sink their host process already
//! uses.

use std::sync::atomic::{AtomicU8, Ordering};

/// Verbosity levels the `kernel_set_log_mode` syscall can select between,
/// mapped onto the `log` crate's `LevelFilter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogMode {
    Quiet = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogMode {
    fn from_u8(v: u8) -> LogMode {
        match v {
            0 => LogMode::Quiet,
            1 => LogMode::Error,
            2 => LogMode::Warn,
            3 => LogMode::Info,
            4 => LogMode::Debug,
            _ => LogMode::Trace,
        }
    }

    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogMode::Quiet => log::LevelFilter::Off,
            LogMode::Error => log::LevelFilter::Error,
            LogMode::Warn => log::LevelFilter::Warn,
            LogMode::Info => log::LevelFilter::Info,
            LogMode::Debug => log::LevelFilter::Debug,
            LogMode::Trace => log::LevelFilter::Trace,
        }
    }

    /// Parses a boot-argument `log_level` string (spec §6), defaulting to
    /// `Info` on anything unrecognized.
    pub fn parse(s: &str) -> LogMode {
        match s.to_ascii_lowercase().as_str() {
            "quiet" | "off" => LogMode::Quiet,
            "error" => LogMode::Error,
            "warn" | "warning" => LogMode::Warn,
            "debug" => LogMode::Debug,
            "trace" => LogMode::Trace,
            _ => LogMode::Info,
        }
    }
}

static CURRENT_MODE: AtomicU8 = AtomicU8::new(LogMode::Info as u8);

/// `kernel_set_log_mode` (spec §6): adjusts the process-wide verbosity.
/// Does not install a logger backend itself — that's the embedder's job
/// via the `log` crate, same as any other library.
pub fn set_log_mode(mode: LogMode) {
    CURRENT_MODE.store(mode as u8, Ordering::Relaxed);
    log::set_max_level(mode.to_level_filter());
}

pub fn log_mode() -> LogMode {
    LogMode::from_u8(CURRENT_MODE.load(Ordering::Relaxed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_levels() {
        assert_eq!(LogMode::parse("debug"), LogMode::Debug);
        assert_eq!(LogMode::parse("bogus"), LogMode::Info);
    }

    #[test]
    fn set_and_read_mode() {
        set_log_mode(LogMode::Trace);
        assert_eq!(log_mode(), LogMode::Trace);
        set_log_mode(LogMode::Info);
    }
}
