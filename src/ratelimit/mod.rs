//! Purchase-attempt rate limiting, keyed by user id. The checkout service
//! only sees the [`RateLimiter`] trait; the in-process fixed-window
//! implementation below is enough for a single node, and a distributed
//! backend can slot in behind the same trait.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

/// The decision returned by a rate limit check.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Allow {
        /// Attempts remaining in the current window.
        remaining: u32,
    },
    Deny {
        /// How long the caller should wait before retrying.
        retry_after: Duration,
    },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow { .. })
    }
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Records one attempt for the key and decides whether it may proceed.
    async fn check(&self, key: Uuid) -> Decision;
}

struct Window {
    started_at: Instant,
    count: u32,
}

/// Fixed-window counter: at most `max_attempts` per `window` per key.
pub struct FixedWindowLimiter {
    window: Duration,
    max_attempts: u32,
    state: Mutex<HashMap<Uuid, Window>>,
}

impl FixedWindowLimiter {
    pub fn new(window: Duration, max_attempts: u32) -> Self {
        Self {
            window,
            max_attempts,
            state: Mutex::new(HashMap::new()),
        }
    }

    fn sweep_expired(&self, state: &mut HashMap<Uuid, Window>, now: Instant) {
        state.retain(|_, w| now.duration_since(w.started_at) < self.window);
    }
}

#[async_trait]
impl RateLimiter for FixedWindowLimiter {
    async fn check(&self, key: Uuid) -> Decision {
        let now = Instant::now();
        let mut state = self.state.lock().await;

        // Keep the map from accumulating dead windows under many keys.
        if state.len() > 10_000 {
            self.sweep_expired(&mut state, now);
        }

        let window = state.entry(key).or_insert(Window {
            started_at: now,
            count: 0,
        });

        if now.duration_since(window.started_at) >= self.window {
            window.started_at = now;
            window.count = 0;
        }

        if window.count < self.max_attempts {
            window.count += 1;
            Decision::Allow {
                remaining: self.max_attempts - window.count,
            }
        } else {
            let elapsed = now.duration_since(window.started_at);
            Decision::Deny {
                retry_after: self.window.saturating_sub(elapsed),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_up_to_max_attempts_then_denies() {
        let limiter = FixedWindowLimiter::new(Duration::from_secs(60), 5);
        let user = Uuid::new_v4();

        for i in 0..5 {
            let decision = limiter.check(user).await;
            assert!(decision.is_allowed(), "attempt {} should be allowed", i + 1);
        }

        let denied = limiter.check(user).await;
        assert!(!denied.is_allowed());
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let limiter = FixedWindowLimiter::new(Duration::from_secs(60), 1);
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        assert!(limiter.check(first).await.is_allowed());
        assert!(!limiter.check(first).await.is_allowed());
        assert!(limiter.check(second).await.is_allowed());
    }

    #[tokio::test]
    async fn window_resets_after_elapsing() {
        let limiter = FixedWindowLimiter::new(Duration::from_millis(20), 1);
        let user = Uuid::new_v4();

        assert!(limiter.check(user).await.is_allowed());
        assert!(!limiter.check(user).await.is_allowed());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(limiter.check(user).await.is_allowed());
    }
}
