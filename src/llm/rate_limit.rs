//! Request spacing and retry backoff.
//!
//! Every outbound request passes a shared floor: at least `min_interval`
//! between requests, enforced through a mutex-protected timestamp so
//! concurrent callers still serialize on the floor. Rate-limited requests
//! back off exponentially with jitter.

use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::Mutex;
use tracing::info;

/// Shared rate-limit floor for outbound LLM requests.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: Mutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until the floor allows another request, then claim the slot.
    ///
    /// The mutex is held across the sleep so concurrent callers queue up
    /// rather than stampede when the floor opens.
    pub async fn acquire(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                info!(
                    "⏱️ Rate limit protection: waiting {:.2}s between requests",
                    wait.as_secs_f64()
                );
                tokio::time::sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// Exponential backoff with jitter for retry `attempt` (1-based):
    /// `min(cap, base * 2^(attempt-1))` scaled by a uniform factor in
    /// [0.5, 1.5).
    pub fn backoff_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let raw = base.as_secs_f64() * f64::from(1u32 << exponent);
        let capped = raw.min(cap.as_secs_f64());
        let jitter: f64 = rand::rng().random_range(0.5..1.5);
        Duration::from_secs_f64(capped * jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let base = Duration::from_secs(2);
        let cap = Duration::from_secs(60);
        for attempt in 1..=10 {
            let delay = RateLimiter::backoff_delay(attempt, base, cap);
            let raw = (2.0 * f64::from(1u32 << (attempt - 1).min(16))).min(60.0);
            assert!(delay.as_secs_f64() >= raw * 0.5 - f64::EPSILON);
            assert!(delay.as_secs_f64() <= raw * 1.5 + f64::EPSILON);
        }
    }

    #[test]
    fn second_retry_waits_at_least_two_seconds() {
        let delay =
            RateLimiter::backoff_delay(2, Duration::from_secs(2), Duration::from_secs(60));
        assert!(delay.as_secs_f64() >= 2.0);
    }

    #[tokio::test]
    async fn floor_spaces_consecutive_requests() {
        let limiter = RateLimiter::new(Duration::from_millis(50));
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;
        // Two gaps at 50ms each
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn first_request_is_not_delayed() {
        let limiter = RateLimiter::new(Duration::from_secs(10));
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
