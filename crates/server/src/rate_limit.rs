//! Per-phone rate limiting
//!
//! Token bucket per sender, backed by a concurrent map. A bucket refills
//! continuously at the configured per-minute rate and holds at most
//! `capacity` tokens, so short bursts pass and sustained floods do not.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use sales_agent_config::RateLimitConfig;

/// Once the map grows past this many entries, buckets idle long enough
/// to be full again are dropped before inserting a new one.
const PRUNE_THRESHOLD: usize = 10_000;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    refilled_at: Instant,
}

/// Token-bucket limiter keyed by phone number
pub struct RateLimiter {
    buckets: DashMap<String, Bucket>,
    capacity: f64,
    refill_per_second: f64,
    enabled: bool,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let per_minute = f64::from(config.messages_per_minute);
        let capacity = (per_minute * f64::from(config.burst_multiplier)).max(1.0);
        Self {
            buckets: DashMap::new(),
            capacity,
            refill_per_second: per_minute / 60.0,
            enabled: config.enabled,
        }
    }

    /// Take one token for `phone`. False means the sender is over the
    /// limit and the message should be rejected.
    pub fn check(&self, phone: &str) -> bool {
        self.check_at(phone, Instant::now())
    }

    fn check_at(&self, phone: &str, now: Instant) -> bool {
        if !self.enabled {
            return true;
        }
        // Prune before taking the entry; retain while holding a shard
        // reference would deadlock.
        if self.buckets.len() > PRUNE_THRESHOLD {
            self.prune(now);
        }

        let mut bucket = self
            .buckets
            .entry(phone.to_string())
            .or_insert_with(|| Bucket {
                tokens: self.capacity,
                refilled_at: now,
            });

        let elapsed = now.saturating_duration_since(bucket.refilled_at).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_second).min(self.capacity);
        bucket.refilled_at = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Drop buckets that have sat idle long enough to refill completely.
    fn prune(&self, now: Instant) {
        let refill_all = Duration::from_secs_f64(
            self.capacity / self.refill_per_second.max(f64::MIN_POSITIVE),
        );
        self.buckets
            .retain(|_, bucket| now.saturating_duration_since(bucket.refilled_at) < refill_all);
    }
}
