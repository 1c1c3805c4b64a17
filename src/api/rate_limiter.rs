//! Rate limiting middleware for the HTTP API
//!
//! Token buckets, one per traffic class:
//! - General: reads and edits
//! - Submission: `POST /jobs`, which starts model work
//! - Ingestion: `POST /market-data`, which drives alert evaluation

use crate::config::RateLimitConfig;
use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Method, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitType {
    General,
    Submission,
    Ingestion,
}

impl RateLimitType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitType::General => "general",
            RateLimitType::Submission => "submission",
            RateLimitType::Ingestion => "ingestion",
        }
    }
}

/// Token bucket refilled continuously at `refill_rate` tokens per second
#[derive(Debug)]
pub struct TokenBucket {
    capacity: u32,
    tokens: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(rate_per_second: u32) -> Self {
        let rate = rate_per_second.max(1);
        Self {
            capacity: rate,
            tokens: rate as f64,
            refill_rate: rate as f64,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.refill_rate).min(self.capacity as f64);
        self.last_refill = now;
    }

    /// Try to consume a token, returns true if allowed
    pub fn try_acquire(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    pub fn time_until_available(&self) -> Duration {
        if self.tokens >= 1.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((1.0 - self.tokens) / self.refill_rate)
        }
    }
}

#[derive(Debug)]
pub struct RateLimiterState {
    limiters: Mutex<HashMap<RateLimitType, TokenBucket>>,
}

impl RateLimiterState {
    pub fn new(config: &RateLimitConfig) -> Self {
        let mut limiters = HashMap::new();
        limiters.insert(RateLimitType::General, TokenBucket::new(config.general));
        limiters.insert(RateLimitType::Submission, TokenBucket::new(config.submission));
        limiters.insert(RateLimitType::Ingestion, TokenBucket::new(config.ingestion));

        Self {
            limiters: Mutex::new(limiters),
        }
    }

    /// Consume a token, or report how long until one is available
    pub fn acquire(&self, rate_type: RateLimitType) -> Result<(), Duration> {
        let mut limiters = self.limiters.lock();
        match limiters.get_mut(&rate_type) {
            Some(limiter) => {
                if !limiter.try_acquire() {
                    Err(limiter.time_until_available())
                } else {
                    Ok(())
                }
            }
            _ => Ok(()),
        }
    }
}

pub fn get_rate_limit_type(method: &Method, path: &str) -> RateLimitType {
    if *method == Method::POST {
        match path.trim_end_matches('/') {
            "/jobs" => return RateLimitType::Submission,
            "/market-data" => return RateLimitType::Ingestion,
            _ => {}
        }
    }
    RateLimitType::General
}

pub async fn rate_limit_middleware(
    State(state): State<Arc<RateLimiterState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let rate_type = get_rate_limit_type(request.method(), request.uri().path());

    if let Err(wait_time) = state.acquire(rate_type) {
        tracing::warn!(
            "Rate limit exceeded for {}, path: {}, retry after {}ms",
            rate_type.as_str(),
            request.uri().path(),
            wait_time.as_millis()
        );
        return rate_limit_response(wait_time, rate_type);
    }

    next.run(request).await
}

fn rate_limit_response(retry_after: Duration, rate_type: RateLimitType) -> Response {
    let retry_seconds = (retry_after.as_secs_f64().ceil() as u64).max(1);

    let body = Json(json!({
        "status": "error",
        "code": "RATE_LIMITED",
        "message": format!(
            "Rate limit exceeded for {} requests. Retry after {} second(s).",
            rate_type.as_str(),
            retry_seconds
        ),
        "retryAfterMs": retry_after.as_millis() as u64,
    }));

    let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
    let headers = response.headers_mut();
    headers.insert("Retry-After", HeaderValue::from(retry_seconds));
    headers.insert("X-RateLimit-Type", HeaderValue::from_static(rate_type.as_str()));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_bucket_basic() {
        let mut bucket = TokenBucket::new(10);
        for _ in 0..10 {
            assert!(bucket.try_acquire());
        }
        assert!(!bucket.try_acquire());
        assert!(bucket.time_until_available() > Duration::ZERO);
    }

    #[test]
    fn test_token_bucket_refill() {
        let mut bucket = TokenBucket::new(100);
        for _ in 0..100 {
            bucket.try_acquire();
        }
        assert!(!bucket.try_acquire());

        bucket.last_refill = Instant::now() - Duration::from_millis(100);
        for _ in 0..10 {
            assert!(bucket.try_acquire());
        }
    }

    #[test]
    fn test_rate_limit_type_detection() {
        assert_eq!(get_rate_limit_type(&Method::POST, "/jobs"), RateLimitType::Submission);
        assert_eq!(get_rate_limit_type(&Method::GET, "/jobs"), RateLimitType::General);
        assert_eq!(get_rate_limit_type(&Method::POST, "/market-data/"), RateLimitType::Ingestion);
        assert_eq!(get_rate_limit_type(&Method::POST, "/alerts"), RateLimitType::General);
    }

    #[test]
    fn test_buckets_are_independent() {
        let state = RateLimiterState::new(&RateLimitConfig {
            general: 100,
            submission: 1,
            ingestion: 100,
        });
        assert!(state.acquire(RateLimitType::Submission).is_ok());
        assert!(state.acquire(RateLimitType::Submission).is_err());
        assert!(state.acquire(RateLimitType::General).is_ok());
        assert!(state.acquire(RateLimitType::Ingestion).is_ok());
    }
}
