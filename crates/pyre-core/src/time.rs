//! Compact monotonic time utilities.
//!
//! Deadlines are stored as plain u64 milliseconds against a process-local
//! monotonic clock, which keeps entries one word instead of the two an
//! `Option<Instant>` would take.

use std::sync::OnceLock;
use std::time::Instant;

/// Returns current monotonic time in milliseconds since process start.
#[inline]
pub fn now_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    let start = START.get_or_init(Instant::now);
    start.elapsed().as_millis() as u64
}

/// Sentinel deadline meaning "never".
pub const NO_DEADLINE: u64 = 0;

/// Returns true if the given deadline has passed.
#[inline]
pub fn is_past(deadline_ms: u64) -> bool {
    deadline_ms != NO_DEADLINE && now_ms() >= deadline_ms
}
