//! Host-enforced runtime watchdog (spec §4.3): protects against tight
//! native loops that never reach an injected `__pc` checkpoint.

use std::time::Duration;

use crate::process::SchedulerStats;
use crate::time::{WATCHDOG_SLICE_LIMIT, WATCHDOG_STRIKE_LIMIT};

/// Records one resumption's wall time against a process's stats.
/// Returns `true` once the process has accrued enough strikes to be
/// forcibly terminated.
pub fn record_slice(stats: &mut SchedulerStats, slice: Duration) -> bool {
    stats.last_slice = slice;
    stats.max_slice = stats.max_slice.max(slice);
    stats.cpu_time += slice;

    if slice > WATCHDOG_SLICE_LIMIT {
        stats.watchdog_strikes += 1;
    }
    stats.watchdog_strikes >= WATCHDOG_STRIKE_LIMIT
}

/// Strikes decay on a clean resumption (spec §9 open question): called by
/// the scheduler whenever a tick's slice stayed under
/// `WATCHDOG_SLICE_LIMIT`, so only a consecutive run of over-limit
/// resumptions accumulates toward termination, not strikes scattered
/// arbitrarily far apart in a long-lived process's history.
pub fn decay_on_clean_exit(stats: &mut SchedulerStats) {
    stats.watchdog_strikes = 0;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_strikes_trip_the_watchdog() {
        let mut stats = SchedulerStats::default();
        assert!(!record_slice(&mut stats, Duration::from_secs(3)));
        assert!(!record_slice(&mut stats, Duration::from_secs(3)));
        assert!(record_slice(&mut stats, Duration::from_secs(3)));
    }

    #[test]
    fn short_slices_never_strike() {
        let mut stats = SchedulerStats::default();
        for _ in 0..10 {
            assert!(!record_slice(&mut stats, Duration::from_millis(10)));
        }
        assert_eq!(stats.watchdog_strikes, 0);
    }
}
