use rand::Rng;
use std::time::Duration;

/// Delay before retry number `retry` (0-based): `initial * factor^retry`,
/// never more than `max`.
pub fn backoff_delay(initial: Duration, factor: f64, max: Duration, retry: u32) -> Duration {
    // Past 2^32 the cap always wins
    let exponent = retry.min(32) as i32;
    let factor = if factor.is_finite() && factor >= 1.0 {
        factor
    } else {
        1.0
    };
    let millis = initial.as_millis() as f64 * factor.powi(exponent);
    let capped = millis.min(max.as_millis() as f64);
    Duration::from_millis(capped.round() as u64)
}

/// Spread a delay by ±30% so periodic callers don't line up.
pub fn with_jitter(delay: Duration) -> Duration {
    let jitter_factor = rand::thread_rng().gen_range(0.7..1.3);
    Duration::from_millis((delay.as_millis() as f64 * jitter_factor).round() as u64)
}
