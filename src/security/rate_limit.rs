//! Rate limiting middleware keyed by request mapper tokens.

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::clock::{Clock, SystemClock};
use crate::config::RateLimitConfig;
use crate::observability::metrics;
use crate::security::mapper::RequestMapper;

/// A simple token bucket rate limiter.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_update: now,
        }
    }

    fn try_acquire(&mut self, amount: f64, capacity: f64, refill_rate: f64, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();

        // Refill tokens
        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_update = now;

        if self.tokens >= amount {
            self.tokens -= amount;
            true
        } else {
            false
        }
    }
}

/// Per-token request quotas.
#[derive(Debug)]
pub struct RateLimiter {
    mapper: Box<dyn RequestMapper>,
    buckets: DashMap<String, TokenBucket>,
    clock: Arc<dyn Clock>,
    rps: f64,
    burst: f64,
}

impl RateLimiter {
    pub fn new(mapper: Box<dyn RequestMapper>, config: &RateLimitConfig) -> Self {
        Self::with_clock(mapper, config, Arc::new(SystemClock))
    }

    pub fn with_clock(mapper: Box<dyn RequestMapper>, config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            mapper,
            buckets: DashMap::new(),
            clock,
            rps: config.requests_per_second as f64,
            burst: config.burst_size as f64,
        }
    }

    /// Charge `amount` against `key`. Returns false when the quota is spent.
    pub fn check(&self, key: &str, amount: u64) -> bool {
        let now = self.clock.now();
        let mut bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(self.burst, now));
        bucket.try_acquire(amount as f64, self.burst, self.rps, now)
    }

    pub fn mapper(&self) -> &dyn RequestMapper {
        self.mapper.as_ref()
    }

    /// Number of distinct tokens seen.
    pub fn tracked(&self) -> usize {
        self.buckets.len()
    }
}

/// Middleware function for token-keyed rate limiting.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let token = match limiter.mapper().map(&request) {
        Ok(token) => token,
        Err(e) => {
            tracing::warn!(mapper = limiter.mapper().name(), error = %e, "Rejecting unclassifiable request");
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    if limiter.check(&token.key, token.amount) {
        next.run(request).await
    } else {
        tracing::warn!(token = %token.key, mapper = limiter.mapper().name(), "Rate limit exceeded");
        metrics::record_rate_limited(limiter.mapper().name());
        (StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded").into_response()
    }
}
