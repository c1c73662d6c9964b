//! Retry scheduling for records that still have failed recipients.

use chrono::{DateTime, TimeDelta, Utc};

/// Attempts beyond this no longer lengthen the delay.
pub const MAX_BACKOFF_EXPONENT: u32 = 10;

/// Minutes to wait before the next attempt, given the attempts made so far.
///
/// Doubles with every attempt, capped at `2^10` minutes (a little over 17 hours).
#[must_use]
pub const fn retry_delay_minutes(attempts: u32) -> i64 {
    let exponent = if attempts > MAX_BACKOFF_EXPONENT {
        MAX_BACKOFF_EXPONENT
    } else {
        attempts
    };

    1 << exponent
}

#[must_use]
pub fn retry_delay(attempts: u32) -> TimeDelta {
    TimeDelta::minutes(retry_delay_minutes(attempts))
}

/// When a record that has been tried `attempts` times should next be picked up.
#[must_use]
pub fn next_attempt_at(now: DateTime<Utc>, attempts: u32) -> DateTime<Utc> {
    now + retry_delay(attempts)
}
