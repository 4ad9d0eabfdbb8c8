//! # Per-Client Rate Limiting
//!
//! Fixed-window limiter keyed by the first address in `X-Forwarded-For`
//! (the service runs behind a reverse proxy). Requests without the header
//! share the `"anonymous"` bucket. Buckets whose window has elapsed are
//! evicted on the next request. In-memory only; each replica limits
//! independently.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::Request;
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use parking_lot::Mutex;

use crate::error::{ErrorBody, ErrorDetail};

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests per window.
    pub max_requests: u64,
    /// Window duration in seconds.
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 1000,
            window_secs: 60,
        }
    }
}

#[derive(Debug, Clone)]
struct BucketState {
    count: u64,
    window_start: Instant,
}

/// Shared rate limiter state.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: Arc<Mutex<HashMap<String, BucketState>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Count a request against `key`. Returns `false` once the window's
    /// allowance is spent.
    fn check(&self, key: &str) -> bool {
        let mut buckets = self.buckets.lock();
        let now = Instant::now();
        let window = self.config.window_secs;
        buckets.retain(|k, b| k == key || now.duration_since(b.window_start).as_secs() < window);

        let bucket = buckets.entry(key.to_string()).or_insert(BucketState {
            count: 0,
            window_start: now,
        });

        if now.duration_since(bucket.window_start).as_secs() >= window {
            bucket.count = 0;
            bucket.window_start = now;
        }

        if bucket.count >= self.config.max_requests {
            false
        } else {
            bucket.count += 1;
            true
        }
    }
}

fn client_key(request: &Request) -> String {
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or("anonymous")
        .to_string()
}

/// Reject requests over the limit with 429 and a `Retry-After` hint.
pub async fn rate_limit_middleware(request: Request, next: Next) -> Response {
    let limiter = request.extensions().get::<RateLimiter>().cloned();

    if let Some(limiter) = limiter {
        let key = client_key(&request);
        if !limiter.check(&key) {
            tracing::warn!(client = %key, "rate limit exceeded");
            metrics::counter!("umeed_rate_limited_total").increment(1);
            let body = ErrorBody {
                error: ErrorDetail {
                    code: "RATE_LIMITED".to_string(),
                    message: "rate limit exceeded".to_string(),
                    details: None,
                },
            };
            let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
            if let Ok(v) = HeaderValue::from_str(&limiter.config.window_secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, v);
            }
            return response;
        }
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::middleware::from_fn;
    use axum::routing::get;
    use axum::{Extension, Router};
    use tower::ServiceExt;

    fn app(max_requests: u64) -> Router {
        Router::new()
            .route("/ping", get(|| async { "pong" }))
            .layer(from_fn(rate_limit_middleware))
            .layer(Extension(RateLimiter::new(RateLimitConfig {
                max_requests,
                window_secs: 3600,
            })))
    }

    fn request_from(ip: Option<&str>) -> axum::http::Request<Body> {
        let mut b = axum::http::Request::builder().uri("/ping");
        if let Some(ip) = ip {
            b = b.header("x-forwarded-for", ip);
        }
        b.body(Body::empty()).unwrap()
    }

    #[test]
    fn check_counts_per_key() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_requests: 2,
            window_secs: 3600,
        });
        assert!(limiter.check("a"));
        assert!(limiter.check("a"));
        assert!(!limiter.check("a"));
        assert!(limiter.check("b"));
    }

    #[test]
    fn elapsed_buckets_are_evicted() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_requests: 5,
            window_secs: 0,
        });
        for ip in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
            assert!(limiter.check(ip));
        }
        assert_eq!(limiter.buckets.lock().len(), 1);
        assert!(limiter.buckets.lock().contains_key("10.0.0.3"));
    }

    #[tokio::test]
    async fn over_limit_returns_429_with_retry_after() {
        let app = app(1);
        let ok = app.clone().oneshot(request_from(Some("10.0.0.1"))).await.unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
        let limited = app.oneshot(request_from(Some("10.0.0.1"))).await.unwrap();
        assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(limited.headers()[header::RETRY_AFTER], "3600");
    }

    #[tokio::test]
    async fn forwarded_for_uses_first_hop() {
        let app = app(1);
        let first = app
            .clone()
            .oneshot(request_from(Some("10.0.0.7, 172.16.0.1")))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        let same_client = app
            .clone()
            .oneshot(request_from(Some("10.0.0.7, 172.16.0.2")))
            .await
            .unwrap();
        assert_eq!(same_client.status(), StatusCode::TOO_MANY_REQUESTS);
        let other = app.oneshot(request_from(None)).await.unwrap();
        assert_eq!(other.status(), StatusCode::OK);
    }
}
