//! Retry backoff: exponential from a 250 ms base, doubled per retry,
//! capped at 30 s, jittered by up to ±20% so a batch of failures does
//! not re-enqueue in lockstep.

use std::time::Duration;

use rand::Rng;

const BASE_MS: u64 = 250;
const CAP_MS: u64 = 30_000;
const JITTER: f64 = 0.2;

/// Delay before retry number `retry` (1 = first retry).
pub fn retry_delay(retry: u32) -> Duration {
    let exp = retry.saturating_sub(1).min(10);
    let raw = BASE_MS.saturating_mul(1u64 << exp).min(CAP_MS);

    let mut rng = rand::rng();
    let factor: f64 = rng.random_range(1.0 - JITTER..=1.0 + JITTER);
    Duration::from_millis((raw as f64 * factor) as u64)
}
