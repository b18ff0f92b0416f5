//! Token-bucket rate limiting keyed by API key id.

use std::collections::HashMap;
use std::time::Instant;

use tokio::sync::Mutex;

use docrelay_core::types::EntityId;
use docrelay_store::models::api_key::RateLimitTier;

/// A single token bucket. Capacity equals one minute of sustained traffic.
#[derive(Debug)]
struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_check: Instant,
}

impl TokenBucket {
    fn new(requests_per_minute: u32) -> Self {
        let capacity = f64::from(requests_per_minute.max(1));
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec: capacity / 60.0,
            last_check: Instant::now(),
        }
    }

    fn try_acquire(&mut self, now: Instant) -> bool {
        let elapsed = now.duration_since(self.last_check).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
            self.last_check = now;
        }
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Per-key buckets, created lazily on first use.
#[derive(Debug, Default)]
pub struct RateLimiter {
    buckets: Mutex<HashMap<(EntityId, RateLimitTier), TokenBucket>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take one token for `key_id`. Unlimited tiers always pass.
    pub async fn try_acquire(&self, key_id: EntityId, tier: RateLimitTier) -> bool {
        let Some(rpm) = tier.requests_per_minute() else {
            return true;
        };
        let mut buckets = self.buckets.lock().await;
        buckets
            .entry((key_id, tier))
            .or_insert_with(|| TokenBucket::new(rpm))
            .try_acquire(Instant::now())
    }

    /// Drop the bucket of a revoked key.
    pub async fn forget(&self, key_id: EntityId) {
        self.buckets.lock().await.retain(|(id, _), _| *id != key_id);
    }
}
