//! # umeed-api — Nayi Umeed HTTP Service
//!
//! The service layer for the medical device pipeline, built on
//! Axum/Tower/Tokio. Assembles the per-area routers into one application
//! with shared middleware for session auth, tracing, metrics, and rate
//! limiting.
//!
//! ## Routers
//!
//! - `/v1/accounts/*` — registration, OTP login, sessions, role dashboards
//! - `/v1/devices/*` — donation intake and the ordered device status flow
//! - `/v1/repairs/*` — repair partner assignments and certification
//! - `/v1/logistics/*` — pickup and delivery tasks
//! - `/v1/marketplace/*` — listings (public) and orders
//! - `/v1/admin/*` — admin panel, review, users, orders, audit trail
//! - `/v1/analytics/*` — impact analytics and bottleneck snapshots
//! - `/health/*`, `/metrics`, `/openapi.json` — unauthenticated
//!
//! ## Middleware Stack (Tower)
//!
//! BodyLimit → Trace → Metrics → RateLimit → Auth (authenticated routes only)
//!
//! ## Crate Policy
//!
//! - Status rules live in `umeed-state`; handlers never set a status field.
//! - Cross-machine triggers live in [`orchestration`], not in handlers.
//! - All errors map to structured HTTP responses via `AppError`.

pub mod auth;
pub mod credentials;
pub mod db;
pub mod error;
pub mod extractors;
pub mod middleware;
pub mod model;
pub mod openapi;
pub mod orchestration;
pub mod reports;
pub mod routes;
pub mod state;

pub use error::AppError;
pub use state::AppState;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::get;
use axum::{Extension, Router};

use crate::middleware::rate_limit::RateLimiter;

/// Request bodies are small JSON documents; image uploads go elsewhere.
pub const MAX_BODY_BYTES: usize = 256 * 1024;

/// Assemble the full application router with all routes and middleware.
///
/// Health probes, metrics, the OpenAPI document, registration/login, and
/// marketplace browsing are reachable without a session.
pub fn app(state: AppState) -> Router {
    let limiter = RateLimiter::new(state.config.rate_limit.clone());

    let authenticated = Router::new()
        .merge(routes::accounts::router())
        .merge(routes::devices::router())
        .merge(routes::repairs::router())
        .merge(routes::logistics::router())
        .merge(routes::marketplace::router())
        .merge(routes::admin::router())
        .merge(routes::analytics::router())
        .layer(from_fn_with_state(state.clone(), auth::auth_middleware));

    let public = Router::new()
        .merge(routes::accounts::public_router())
        .merge(routes::marketplace::public_router())
        .merge(openapi::router());

    let api = Router::new()
        .merge(public)
        .merge(authenticated)
        .layer(from_fn(middleware::rate_limit::rate_limit_middleware))
        .layer(from_fn(middleware::metrics::metrics_middleware))
        .layer(middleware::tracing_layer::layer())
        .layer(Extension(limiter))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state.clone());

    let probes = Router::new()
        .route("/health/liveness", get(liveness))
        .route("/health/readiness", get(readiness))
        .route("/metrics", get(middleware::metrics::render))
        .with_state(state);

    Router::new().merge(probes).merge(api)
}

/// Liveness probe — always returns 200 if the process is running.
async fn liveness() -> &'static str {
    "ok"
}

/// Readiness probe — 503 while a configured database is unreachable.
async fn readiness(State(state): State<AppState>) -> (StatusCode, &'static str) {
    let Some(pool) = &state.db_pool else {
        return (StatusCode::OK, "ready");
    };
    match sqlx::query("SELECT 1").execute(pool).await {
        Ok(_) => (StatusCode::OK, "ready"),
        Err(e) => {
            tracing::warn!(error = %e, "readiness check failed: database unreachable");
            (StatusCode::SERVICE_UNAVAILABLE, "database unavailable")
        }
    }
}
