//! Exponential retry backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// ±20% jitter to prevent thundering herd on re-enqueued URLs.
const JITTER_PERCENT: f64 = 0.2;

/// Calculate the delay before the `retry_count`-th retry.
///
/// Formula: `min(base * 2^retry_count, cap) * (1 ± jitter)`.
#[must_use]
pub fn backoff_delay(retry_count: u32, base: Duration, cap: Duration) -> Duration {
    let exp = base
        .as_millis()
        .saturating_mul(1u128 << retry_count.min(16)) as u64;
    let capped = exp.min(cap.as_millis() as u64);

    let jitter = rand::rng().random_range(-JITTER_PERCENT..=JITTER_PERCENT);
    let jittered = (capped as f64 * (1.0 + jitter)) as u64;

    Duration::from_millis(jittered.min(cap.as_millis() as u64))
}
