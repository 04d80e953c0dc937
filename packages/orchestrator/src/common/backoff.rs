//! Exponential backoff for requeued work items.

use chrono::Duration;

/// Base delay for the first retry.
const BASE_SECONDS: i64 = 60;
/// Delays never exceed this cap.
const CAP_SECONDS: i64 = 30 * 60;

/// Delay before the `retry_count`-th attempt: `base * 2^(n-1)`, capped.
///
/// `retry_count` is the value *after* incrementing, so the first requeue
/// (retry_count = 1) waits the base delay.
pub fn retry_delay(retry_count: i32) -> Duration {
    let exponent = retry_count.saturating_sub(1).clamp(0, 30) as u32;
    let seconds = BASE_SECONDS
        .saturating_mul(2i64.saturating_pow(exponent))
        .min(CAP_SECONDS);
    Duration::seconds(seconds)
}
