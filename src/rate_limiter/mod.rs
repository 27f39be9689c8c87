/*!
 * # Rate Limiting Module
 *
 * Per-client token buckets guarding the expensive endpoints (checkout opens
 * an invoice with the payment gateway on every call).
 *
 * Buckets live in a sharded `DashMap` keyed by client IP. The map is bounded:
 * when a new client arrives at capacity, idle buckets are purged first and
 * then the least recently seen bucket is evicted. A background sweeper drops
 * idle buckets periodically.
 *
 * ## Usage
 *
 * ```ignore
 * let limiter = RateLimiter::new(RateLimitConfig::from(&config.checkout_rate_limit));
 * tokio::spawn(start_cleanup_task(limiter.clone(), Duration::from_secs(60)));
 *
 * let routes = Router::new()
 *     .route("/orders/checkout", post(checkout))
 *     .layer(axum::middleware::from_fn_with_state(limiter, rate_limit_middleware));
 * ```
 */
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use metrics::counter;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::CheckoutRateLimitConfig;
use crate::errors::ServiceError;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Tokens restored per second
    pub refill_per_second: f64,
    /// Bucket capacity, i.e. the largest burst allowed
    pub burst: u32,
    pub max_tracked_clients: usize,
    pub idle_ttl: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig::from(&CheckoutRateLimitConfig::default())
    }
}

impl From<&CheckoutRateLimitConfig> for RateLimitConfig {
    fn from(cfg: &CheckoutRateLimitConfig) -> Self {
        Self {
            refill_per_second: f64::from(cfg.refill_per_second.max(1)),
            burst: cfg.burst.max(1),
            max_tracked_clients: cfg.max_tracked_clients.max(1),
            idle_ttl: Duration::from_secs(cfg.idle_ttl_secs),
        }
    }
}

#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
    last_seen: Instant,
}

impl TokenBucket {
    fn full(capacity: u32, now: Instant) -> Self {
        Self {
            tokens: f64::from(capacity),
            last_refill: now,
            last_seen: now,
        }
    }

    fn refill(&mut self, config: &RateLimitConfig, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * config.refill_per_second).min(f64::from(config.burst));
        self.last_refill = now;
    }

    fn is_idle(&self, idle_ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.last_seen) >= idle_ttl
    }
}

/// Outcome of one rate-limit check
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    /// Time until the next token is available; zero when allowed
    pub retry_after: Duration,
}

#[derive(Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: Arc<DashMap<String, TokenBucket>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: Arc::new(DashMap::new()),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Number of client buckets currently held
    pub fn tracked_clients(&self) -> usize {
        self.buckets.len()
    }

    /// Takes one token from `key`'s bucket if one is available.
    pub fn check(&self, key: &str) -> RateLimitDecision {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> RateLimitDecision {
        if !self.buckets.contains_key(key) && self.buckets.len() >= self.config.max_tracked_clients
        {
            self.make_room(now, key);
        }

        let decision = {
            let mut bucket = self
                .buckets
                .entry(key.to_string())
                .or_insert_with(|| TokenBucket::full(self.config.burst, now));
            bucket.refill(&self.config, now);
            bucket.last_seen = now;

            if bucket.tokens >= 1.0 {
                bucket.tokens -= 1.0;
                RateLimitDecision {
                    allowed: true,
                    remaining: bucket.tokens.floor() as u32,
                    retry_after: Duration::ZERO,
                }
            } else {
                let missing = 1.0 - bucket.tokens;
                RateLimitDecision {
                    allowed: false,
                    remaining: 0,
                    retry_after: Duration::from_secs_f64(missing / self.config.refill_per_second),
                }
            }
        };

        // Concurrent first requests can overshoot the cap by a few entries
        while self.buckets.len() > self.config.max_tracked_clients {
            if !self.evict_least_recent(key) {
                break;
            }
        }

        decision
    }

    fn make_room(&self, now: Instant, incoming: &str) {
        let purged = self.purge_idle_at(now);
        if purged > 0 {
            debug!(purged, "purged idle rate limit buckets");
        }
        while self.buckets.len() >= self.config.max_tracked_clients {
            if !self.evict_least_recent(incoming) {
                break;
            }
        }
    }

    fn evict_least_recent(&self, keep: &str) -> bool {
        let victim = self
            .buckets
            .iter()
            .filter(|entry| entry.key() != keep)
            .min_by_key(|entry| entry.value().last_seen)
            .map(|entry| entry.key().clone());

        match victim {
            Some(victim) => {
                self.buckets.remove(&victim);
                counter!("duitku_shop.rate_limit.evicted", 1);
                true
            }
            None => false,
        }
    }

    /// Drops buckets that have not been used for `idle_ttl`.
    pub fn cleanup_expired(&self) -> usize {
        self.purge_idle_at(Instant::now())
    }

    fn purge_idle_at(&self, now: Instant) -> usize {
        let before = self.buckets.len();
        let idle_ttl = self.config.idle_ttl;
        self.buckets.retain(|_, bucket| !bucket.is_idle(idle_ttl, now));
        before.saturating_sub(self.buckets.len())
    }
}

/// Client address used as the bucket key.
///
/// First hop of `X-Forwarded-For`, then `X-Real-IP`, then the socket peer.
pub fn client_ip(request: &Request) -> String {
    let forwarded = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real_ip = request
        .headers()
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = real_ip {
        return ip.to_string();
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Rejects the request with 429 once the client's bucket is empty.
pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    request: Request,
    next: Next,
) -> Response {
    let key = client_ip(&request);
    let decision = limiter.check(&key);

    if !decision.allowed {
        counter!("duitku_shop.rate_limit.rejected", 1);
        warn!(client = %key, path = %request.uri().path(), "rate limit exceeded");

        let mut response = ServiceError::RateLimitExceeded.into_response();
        let retry_secs = decision.retry_after.as_secs_f64().ceil().max(1.0) as u64;
        if let Ok(value) = HeaderValue::from_str(&retry_secs.to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        return response;
    }

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&decision.remaining.to_string()) {
        response.headers_mut().insert("x-ratelimit-remaining", value);
    }
    response
}

/// Background sweeper for idle buckets
pub async fn start_cleanup_task(rate_limiter: RateLimiter, interval: Duration) {
    let mut interval_timer = tokio::time::interval(interval);

    loop {
        interval_timer.tick().await;
        let purged = rate_limiter.cleanup_expired();
        debug!(
            purged,
            tracked = rate_limiter.tracked_clients(),
            "rate limiter cleanup completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::StatusCode, routing::post, Router};
    use tower::ServiceExt;

    fn config(burst: u32, max_tracked_clients: usize) -> RateLimitConfig {
        RateLimitConfig {
            refill_per_second: 1.0,
            burst,
            max_tracked_clients,
            idle_ttl: Duration::from_secs(300),
        }
    }

    #[test]
    fn burst_then_refill() {
        let limiter = RateLimiter::new(config(3, 10));
        let start = Instant::now();

        for _ in 0..3 {
            assert!(limiter.check_at("10.0.0.1", start).allowed);
        }
        let denied = limiter.check_at("10.0.0.1", start);
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after, Duration::from_secs(1));

        assert!(limiter
            .check_at("10.0.0.1", start + Duration::from_secs(1))
            .allowed);
    }

    #[test]
    fn clients_have_separate_buckets() {
        let limiter = RateLimiter::new(config(1, 10));
        let now = Instant::now();
        assert!(limiter.check_at("10.0.0.1", now).allowed);
        assert!(!limiter.check_at("10.0.0.1", now).allowed);
        assert!(limiter.check_at("10.0.0.2", now).allowed);
    }

    #[test]
    fn map_never_exceeds_capacity() {
        let limiter = RateLimiter::new(config(5, 3));
        let start = Instant::now();

        for i in 0..20u64 {
            limiter.check_at(&format!("10.0.0.{}", i), start + Duration::from_millis(i));
            assert!(limiter.tracked_clients() <= 3);
        }
        // The most recent clients survive
        assert!(limiter.buckets.contains_key("10.0.0.19"));
        assert!(!limiter.buckets.contains_key("10.0.0.0"));
    }

    #[test]
    fn idle_buckets_are_purged() {
        let limiter = RateLimiter::new(config(5, 100));
        let start = Instant::now();
        limiter.check_at("old", start);
        limiter.check_at("fresh", start + Duration::from_secs(299));

        let purged = limiter.purge_idle_at(start + Duration::from_secs(301));
        assert_eq!(purged, 1);
        assert!(limiter.buckets.contains_key("fresh"));
    }

    #[test]
    fn forwarded_for_wins_over_real_ip() {
        let request = Request::builder()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .header("x-real-ip", "198.51.100.2")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&request), "203.0.113.7");

        let request = Request::builder()
            .header("x-real-ip", "198.51.100.2")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&request), "198.51.100.2");

        let request = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(client_ip(&request), "unknown");
    }

    #[tokio::test]
    async fn middleware_answers_429_with_retry_after() {
        let limiter = RateLimiter::new(config(1, 10));
        let app = Router::new()
            .route("/checkout", post(|| async { "ok" }))
            .layer(axum::middleware::from_fn_with_state(
                limiter,
                rate_limit_middleware,
            ));

        let request = || {
            Request::builder()
                .method("POST")
                .uri("/checkout")
                .header("x-forwarded-for", "192.0.2.10")
                .body(Body::empty())
                .unwrap()
        };

        let first = app.clone().oneshot(request()).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app.oneshot(request()).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            second.headers().get(header::RETRY_AFTER).unwrap(),
            &HeaderValue::from_static("1")
        );
    }
}
