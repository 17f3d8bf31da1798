//! Per-caller limit on job triggers.
//!
//! Sits above admission control: a rejected attempt never reaches the
//! state machine. Counts attempts, not successes, so a caller hammering a
//! conflicting category is throttled too.
//!
//! Backed by a keyed GCRA limiter: each caller may burst `max_attempts`
//! triggers, and one attempt is replenished every `window / max_attempts`.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};

use crate::error::AppError;

type KeyedLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

pub struct TriggerRateLimiter {
    limiter: KeyedLimiter,
}

impl TriggerRateLimiter {
    pub fn new(max_attempts: usize, window: Duration) -> Self {
        let burst = u32::try_from(max_attempts)
            .ok()
            .and_then(NonZeroU32::new)
            .unwrap_or(NonZeroU32::MIN);
        let quota = Quota::with_period(window / burst.get())
            .unwrap_or_else(|| Quota::per_second(burst))
            .allow_burst(burst);
        Self {
            limiter: RateLimiter::keyed(quota),
        }
    }

    /// Record an attempt by `caller`, or reject it with the time until the
    /// next attempt is allowed.
    pub fn check(&self, caller: &str) -> Result<(), AppError> {
        let key = caller.to_lowercase();
        self.limiter.check_key(&key).map_err(|not_until| {
            let wait = not_until.wait_time_from(DefaultClock::default().now());
            tracing::warn!(caller, retry_after_ms = wait.as_millis() as u64, "Trigger rate limit exceeded");
            AppError::RateLimited {
                retry_after_secs: wait.as_secs().max(1),
            }
        })
    }

    /// Forget callers whose budget has fully replenished. Returns how many
    /// callers are still tracked.
    pub fn prune(&self) -> usize {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
        self.limiter.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn allows_up_to_limit_then_rejects() {
        let limiter = TriggerRateLimiter::new(2, Duration::from_secs(60));
        assert!(limiter.check("ops").is_ok());
        assert!(limiter.check("OPS").is_ok());
        assert_matches!(
            limiter.check("ops"),
            Err(AppError::RateLimited { retry_after_secs }) if (1..=30).contains(&retry_after_secs)
        );
        // Other callers have their own budget.
        assert!(limiter.check("someone-else").is_ok());
    }

    #[test]
    fn budget_replenishes() {
        let limiter = TriggerRateLimiter::new(1, Duration::from_millis(50));
        assert!(limiter.check("ops").is_ok());
        assert!(limiter.check("ops").is_err());
        std::thread::sleep(Duration::from_millis(80));
        assert!(limiter.check("ops").is_ok());
    }

    #[test]
    fn idle_callers_are_forgotten() {
        let limiter = TriggerRateLimiter::new(1, Duration::from_millis(500));
        for i in 0..1_000 {
            assert!(limiter.check(&format!("caller-{i}")).is_ok());
        }
        assert_eq!(limiter.prune(), 1_000);

        std::thread::sleep(Duration::from_millis(700));
        assert_eq!(limiter.prune(), 0);
    }
}
