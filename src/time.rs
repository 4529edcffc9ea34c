//! Monotonic clock and the scheduling constants derived from spec §4.1/§4.3.

use std::time::{Duration, Instant};

/// `__pc` delivers pending signals and checks the clock every
/// `CHECK_INTERVAL` calls, rather than on every single call.
pub const CHECK_INTERVAL: u32 = 256;

/// A task that holds the CPU longer than `QUANTUM` since its last yield
/// is cooperatively yielded at the next checkpoint.
pub const QUANTUM: Duration = Duration::from_millis(50);

/// A single host-runtime resumption exceeding this wall time accrues a
/// watchdog strike (spec §4.3).
pub const WATCHDOG_SLICE_LIMIT: Duration = Duration::from_secs(2);

/// Strikes accrued before the scheduler forcibly terminates a process.
pub const WATCHDOG_STRIKE_LIMIT: u32 = 3;

/// Wraps [`Instant`] so the rest of the crate never spells out
/// `std::time` directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Monotonic(Instant);

impl Monotonic {
    pub fn now() -> Self {
        Monotonic(Instant::now())
    }

    pub fn elapsed_since(self, earlier: Monotonic) -> Duration {
        self.0.saturating_duration_since(earlier.0)
    }
}

impl std::ops::Add<Duration> for Monotonic {
    type Output = Monotonic;

    fn add(self, rhs: Duration) -> Monotonic {
        Monotonic(self.0 + rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_since_is_monotonic() {
        let a = Monotonic::now();
        std::thread::sleep(Duration::from_millis(1));
        let b = Monotonic::now();
        assert!(b.elapsed_since(a) >= Duration::from_millis(1));
    }
}
