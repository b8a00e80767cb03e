//! Requeue backoff with jitter.
//!
//! A selection that finds no capacity is retried after an exponential delay
//! that never runs past the request deadline.

use std::time::Duration;

use rand::Rng;

use crate::config::RequeueConfig;
use crate::context::RequestContext;

/// Calculate exponential backoff delay with jitter.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let exponential_base = 2u64.saturating_pow(attempt - 1);
    let capped_delay = base_ms.saturating_mul(exponential_base).min(max_ms);

    // Jitter of up to 10% spreads requeued requests apart.
    let jitter_range = capped_delay / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_delay + jitter)
}

/// Delay before selection attempt `attempt + 1`, or `None` when the attempt
/// budget is spent or the deadline leaves no time to wait.
pub fn requeue_delay(attempt: u32, config: &RequeueConfig, ctx: &RequestContext) -> Option<Duration> {
    if attempt >= config.max_attempts {
        return None;
    }

    let delay = calculate_backoff(attempt, config.base_delay_ms, config.max_delay_ms);
    match ctx.remaining() {
        Some(left) if left <= delay => None,
        _ => Some(delay),
    }
}
