//! Token generation helpers.
//!
//! Handle tokens and synapse tokens (spec §4.2/§4.3) are built from
//! "mixed-entropy hex segments sourced from wall-clock time, a PRNG, and
//! a monotonic counter". A dependency on an external RNG crate would be
//! overkill for an in-process unguessable-string generator, so this is a
//! small xorshift64 seeded from wall-clock time plus a process-wide
//! monotonic counter, mixed together per call.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static COUNTER: AtomicU64 = AtomicU64::new(0);
static PRNG_STATE: AtomicU64 = AtomicU64::new(0x9E3779B97F4A7C15);

fn xorshift64(mut x: u64) -> u64 {
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    x
}

fn next_u64() -> u64 {
    let prev = PRNG_STATE.load(Ordering::Relaxed);
    let next = xorshift64(prev.wrapping_add(0x9E3779B97F4A7C15));
    PRNG_STATE.store(next, Ordering::Relaxed);
    next
}

fn wall_clock_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Produces an opaque token `{prefix}-{wall:016x}-{prng:016x}-{ctr:016x}`,
/// unguessable within the process's lifetime (spec §4.2).
pub fn opaque_token(prefix: &str) -> String {
    let wall = wall_clock_nanos();
    let prng = next_u64();
    let ctr = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{wall:016x}-{prng:016x}-{ctr:016x}")
}
