//! Retry timing.
//!
//! These two functions are the whole retry contract. They are fixed, not
//! configurable, so delivery timing is reproducible.

/// Attempt number after which a failure is terminal.
pub const MAX_ATTEMPTS: u32 = 5;

const BASE_DELAY_SECS: u64 = 60;
const MAX_DELAY_SECS: u64 = 3_600;

/// Seconds to wait after failed attempt `attempt` before the next one.
///
/// `min(2^attempt * 60, 3600)`: 120s after attempt 1, 240s after attempt 2,
/// doubling until capped at one hour.
pub fn next_delay(attempt: u32) -> u64 {
    let pow = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
    pow.saturating_mul(BASE_DELAY_SECS).min(MAX_DELAY_SECS)
}

/// Whether a failure of attempt `attempt` ends the webhook's lifecycle.
pub fn is_terminal(attempt: u32) -> bool {
    attempt >= MAX_ATTEMPTS
}
