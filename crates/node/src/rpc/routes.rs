//! Route configuration for the gateway API.

use super::handlers::*;
use super::ratelimit::rate_limit_middleware;
use axum::{middleware, routing::get, Router};

/// Create the full router with all gateway routes.
///
/// Health, readiness, and metrics stay outside the rate limiter so probes
/// and scrapers are never throttled; everything under `/api/v1` is limited
/// per client IP.
pub fn create_router(state: GatewayState) -> Router {
    Router::new()
        // Health & readiness probes (no prefix)
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        // Metrics (no prefix, for Prometheus scraping)
        .route("/metrics", get(metrics_handler))
        // API v1 routes, rate limited
        .nest("/api/v1", api_v1_routes(state.clone()))
        .with_state(state)
}

fn api_v1_routes(state: GatewayState) -> Router<GatewayState> {
    Router::new()
        .route("/status", get(status_handler))
        .route("/blocks/latest", get(latest_block_handler))
        .route("/blocks/{height}", get(block_handler))
        .layer(middleware::from_fn_with_state(state, rate_limit_middleware))
}
