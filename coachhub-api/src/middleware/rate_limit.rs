/// Rate limiting for unauthenticated auth endpoints
///
/// Token bucket per client, kept in process memory. Two limiters exist:
///
/// - **auth**: login, refresh and the password reset endpoints share one
///   bucket per client, refilled per minute
/// - **registration**: its own bucket per client, refilled per hour
///
/// # Algorithm
///
/// - Tokens refill at a constant rate up to the bucket capacity
/// - Each request consumes 1 token
/// - Requests are rejected with 429 and `Retry-After` while the bucket is empty
///
/// # Client identity
///
/// The peer address from `ConnectInfo`, else the first `X-Forwarded-For`
/// entry, else a shared `anonymous` bucket. Every client that reaches the
/// router without `ConnectInfo` or a forwarded address therefore shares one
/// limit; serve with `into_make_service_with_connect_info` to avoid that.
///
/// Buckets live in a `std::sync::Mutex<HashMap>`; the lock is never held
/// across an await.
///
/// # Headers
///
/// - `X-RateLimit-Limit`: bucket capacity
/// - `X-RateLimit-Remaining`: whole tokens left after this request
/// - `Retry-After`: seconds to wait (429 responses only)

use crate::app::AppState;
use crate::error::ApiError;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Buckets above this count trigger a sweep of idle, full buckets
const SWEEP_THRESHOLD: usize = 10_000;

/// Rate limit configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimit {
    /// Maximum tokens in bucket (burst capacity)
    pub bucket_capacity: u32,

    /// Tokens per second
    pub refill_rate: f64,
}

impl RateLimit {
    pub fn per_minute(requests: u32) -> Self {
        Self::over(requests, Duration::from_secs(60))
    }

    pub fn per_hour(requests: u32) -> Self {
        Self::over(requests, Duration::from_secs(3600))
    }

    fn over(requests: u32, window: Duration) -> Self {
        let requests = requests.max(1);
        RateLimit {
            bucket_capacity: requests,
            refill_rate: f64::from(requests) / window.as_secs_f64(),
        }
    }
}

#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: u32, now: Instant) -> Self {
        TokenBucket {
            tokens: f64::from(capacity),
            last_refill: now,
        }
    }

    fn refill(&mut self, rate: f64, capacity: u32, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(f64::from(capacity));
        self.last_refill = now;
    }

    fn try_consume(&mut self, count: f64) -> bool {
        if self.tokens >= count {
            self.tokens -= count;
            true
        } else {
            false
        }
    }

    fn seconds_until_available(&self, count: f64, rate: f64) -> u64 {
        let deficit = count - self.tokens;
        if deficit <= 0.0 {
            0
        } else {
            (deficit / rate).ceil() as u64
        }
    }
}

/// Outcome of one check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed { remaining: u32 },
    Limited { retry_after: u64 },
}

/// Named set of per-client buckets
#[derive(Debug)]
pub struct RateLimiter {
    name: &'static str,
    limit: RateLimit,
    buckets: Mutex<HashMap<String, TokenBucket>>,
}

impl RateLimiter {
    pub fn new(name: &'static str, limit: RateLimit) -> Self {
        Self {
            name,
            limit,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn limit(&self) -> RateLimit {
        self.limit
    }

    /// Takes one token from `key`'s bucket.
    pub fn check(&self, key: &str) -> Decision {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> Decision {
        let RateLimit {
            bucket_capacity,
            refill_rate,
        } = self.limit;

        // A poisoned map only loses counters; keep serving with it.
        let mut buckets = self
            .buckets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if buckets.len() > SWEEP_THRESHOLD {
            buckets.retain(|_, bucket| {
                bucket.refill(refill_rate, bucket_capacity, now);
                bucket.tokens < f64::from(bucket_capacity)
            });
        }

        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(bucket_capacity, now));
        bucket.refill(refill_rate, bucket_capacity, now);

        if bucket.try_consume(1.0) {
            Decision::Allowed {
                remaining: bucket.tokens.floor() as u32,
            }
        } else {
            Decision::Limited {
                retry_after: bucket.seconds_until_available(1.0, refill_rate).max(1),
            }
        }
    }
}

/// Identifies the caller for bucketing
fn client_key(request: &Request) -> String {
    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }

    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "anonymous".to_string())
}

async fn enforce(
    limiter: &RateLimiter,
    request: Request,
    next: Next,
    message: &str,
) -> Result<Response, ApiError> {
    let key = client_key(&request);

    match limiter.check(&key) {
        Decision::Allowed { remaining } => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert(
                "X-RateLimit-Limit",
                HeaderValue::from(limiter.limit.bucket_capacity),
            );
            headers.insert("X-RateLimit-Remaining", HeaderValue::from(remaining));
            Ok(response)
        }
        Decision::Limited { retry_after } => {
            tracing::warn!(limiter = limiter.name, client = %key, retry_after, "Rate limit exceeded");
            Err(ApiError::RateLimitExceeded {
                retry_after,
                message: format!("{}. Try again in {} seconds", message, retry_after),
            })
        }
    }
}

/// Login, refresh and password reset
pub async fn auth_rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    enforce(
        &state.auth_limiter,
        request,
        next,
        "Too many authentication attempts",
    )
    .await
}

/// Self-registration
pub async fn registration_rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    enforce(
        &state.registration_limiter,
        request,
        next,
        "Too many registration attempts",
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn test_rate_limit_windows() {
        let limit = RateLimit::per_minute(10);
        assert_eq!(limit.bucket_capacity, 10);
        assert!((limit.refill_rate - 10.0 / 60.0).abs() < 1e-9);

        let limit = RateLimit::per_hour(5);
        assert_eq!(limit.bucket_capacity, 5);
        assert!((limit.refill_rate - 5.0 / 3600.0).abs() < 1e-9);
    }

    #[test]
    fn test_token_bucket_consume() {
        let mut bucket = TokenBucket::new(10, Instant::now());
        assert!(bucket.try_consume(1.0));
        assert_eq!(bucket.tokens, 9.0);
        assert!(bucket.try_consume(5.0));
        assert_eq!(bucket.tokens, 4.0);
        assert!(!bucket.try_consume(10.0));
        assert_eq!(bucket.tokens, 4.0);
    }

    #[test]
    fn test_token_bucket_refill_capped() {
        let start = Instant::now();
        let mut bucket = TokenBucket {
            tokens: 5.0,
            last_refill: start,
        };

        bucket.refill(1.0, 100, start + Duration::from_secs(10));
        assert!((bucket.tokens - 15.0).abs() < 0.01);

        bucket.refill(1.0, 100, start + Duration::from_secs(1_000));
        assert_eq!(bucket.tokens, 100.0);
    }

    #[test]
    fn test_seconds_until_available() {
        let bucket = TokenBucket {
            tokens: 2.0,
            last_refill: Instant::now(),
        };
        assert_eq!(bucket.seconds_until_available(5.0, 1.0), 3);
        assert_eq!(bucket.seconds_until_available(1.0, 1.0), 0);
    }

    #[test]
    fn test_limiter_blocks_after_capacity_and_recovers() {
        let limiter = RateLimiter::new("auth", RateLimit::per_minute(3));
        let start = Instant::now();

        for expected in [2, 1, 0] {
            assert_eq!(
                limiter.check_at("10.0.0.1", start),
                Decision::Allowed {
                    remaining: expected
                }
            );
        }
        assert_eq!(
            limiter.check_at("10.0.0.1", start),
            Decision::Limited { retry_after: 20 }
        );

        // Other clients are unaffected
        assert!(matches!(
            limiter.check_at("10.0.0.2", start),
            Decision::Allowed { .. }
        ));

        // One token back after 20 seconds
        assert!(matches!(
            limiter.check_at("10.0.0.1", start + Duration::from_secs(20)),
            Decision::Allowed { .. }
        ));
    }

    #[test]
    fn test_client_key_sources() {
        let request = Request::builder()
            .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_key(&request), "203.0.113.9");

        let mut request = Request::builder().body(Body::empty()).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 1], 4000))));
        assert_eq!(client_key(&request), "192.0.2.1");

        let request = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(client_key(&request), "anonymous");
    }
}
