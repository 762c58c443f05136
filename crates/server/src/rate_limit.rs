//! Token-bucket rate limiting, generalized from the teacher's per-IP
//! limiter to per-token (spec §9's resolved Open Question: buckets are
//! keyed by the presented client token, not by client or source IP, since
//! the same client can hold several tokens and each is independently
//! throttled).

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
    pub burst_capacity: u32,
}

impl RateLimitConfig {
    pub fn from_env() -> Self {
        let requests_per_minute = std::env::var("RATE_LIMIT_REQUESTS_PER_MINUTE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60);

        let burst_capacity = std::env::var("RATE_LIMIT_BURST")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);

        Self { requests_per_minute, burst_capacity }
    }
}

#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(requests_per_minute: u32, burst_capacity: u32) -> Self {
        let refill_rate = requests_per_minute as f64 / 60.0;
        let capacity = burst_capacity as f64;

        Self {
            tokens: capacity,
            capacity,
            refill_rate,
            last_refill: Instant::now(),
        }
    }

    fn try_consume(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();

        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn time_until_next_token(&self) -> Duration {
        if self.tokens >= 1.0 {
            Duration::from_secs(0)
        } else {
            let tokens_needed = 1.0 - self.tokens;
            let seconds = tokens_needed / self.refill_rate;
            Duration::from_secs_f64(seconds.max(1.0))
        }
    }
}

/// Keyed by the *hash* of the presented token rather than the plaintext, so
/// a bucket leak (e.g. a panic dump) never reveals a live secret.
#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<String, TokenBucket>>>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            config,
        }
    }

    pub async fn check(&self, token_key: &str) -> Result<(), Duration> {
        let mut buckets = self.buckets.lock().await;

        let bucket = buckets
            .entry(token_key.to_string())
            .or_insert_with(|| TokenBucket::new(self.config.requests_per_minute, self.config.burst_capacity));

        if bucket.try_consume() {
            Ok(())
        } else {
            Err(bucket.time_until_next_token())
        }
    }

    pub async fn cleanup(&self) {
        let mut buckets = self.buckets.lock().await;
        buckets.retain(|_, bucket| bucket.last_refill.elapsed() < Duration::from_secs(600));
        tracing::debug!("rate limiter cleanup: {} active buckets", buckets.len());
    }
}

pub fn spawn_cleanup_task(rate_limiter: RateLimiter) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            rate_limiter.cleanup().await;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn burst_capacity_then_throttles() {
        let limiter = RateLimiter::new(RateLimitConfig {
            requests_per_minute: 60,
            burst_capacity: 10,
        });

        for _ in 0..10 {
            assert!(limiter.check("token-a").await.is_ok());
        }
        assert!(limiter.check("token-a").await.is_err());
    }

    #[tokio::test]
    async fn distinct_tokens_have_independent_buckets() {
        let limiter = RateLimiter::new(RateLimitConfig {
            requests_per_minute: 60,
            burst_capacity: 1,
        });

        assert!(limiter.check("token-a").await.is_ok());
        assert!(limiter.check("token-a").await.is_err());
        assert!(limiter.check("token-b").await.is_ok());
    }
}
