//! Per-IP request rate limiting for the HTTP gateway.
//!
//! Token bucket per client identity: `rate` tokens refilled every `window`,
//! initialized full on first sight. A background sweep every `2·window`
//! evicts entries unseen for at least `2·window`, bounding memory under
//! churning client populations.

use super::handlers::GatewayState;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

struct Visitor {
    tokens: u32,
    last_seen: Instant,
    last_reset: Instant,
}

/// Token-bucket rate limiter keyed by client IP.
pub struct RateLimiter {
    rate: u32,
    window: Duration,
    visitors: Mutex<HashMap<String, Visitor>>,
}

impl RateLimiter {
    /// Allow `rate` requests per `window` per IP.
    pub fn new(rate: u32, window: Duration) -> Self {
        RateLimiter {
            rate,
            window,
            visitors: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a request from `ip` is within the limit. Consumes a token
    /// when it is.
    pub fn allow(&self, ip: &str) -> bool {
        let now = Instant::now();
        let mut visitors = self.visitors.lock().unwrap_or_else(|e| e.into_inner());

        let Some(visitor) = visitors.get_mut(ip) else {
            visitors.insert(
                ip.to_string(),
                Visitor {
                    tokens: self.rate.saturating_sub(1),
                    last_seen: now,
                    last_reset: now,
                },
            );
            return true;
        };

        visitor.last_seen = now;

        // Refill once the window has elapsed.
        if now.duration_since(visitor.last_reset) >= self.window {
            visitor.tokens = self.rate;
            visitor.last_reset = now;
        }

        if visitor.tokens == 0 {
            return false;
        }
        visitor.tokens -= 1;
        true
    }

    /// Evict entries unseen for at least `2·window`.
    pub fn sweep(&self) {
        let cutoff = self.window * 2;
        let now = Instant::now();
        let mut visitors = self.visitors.lock().unwrap_or_else(|e| e.into_inner());
        let before = visitors.len();
        visitors.retain(|_, v| now.duration_since(v.last_seen) < cutoff);
        let evicted = before - visitors.len();
        if evicted > 0 {
            debug!(evicted, remaining = visitors.len(), "rate limiter sweep");
        }
    }

    /// Number of tracked client IPs.
    pub fn tracked(&self) -> usize {
        self.visitors.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Spawn the periodic sweeper; exits on cancellation.
    pub fn spawn_sweeper(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let period = self.window * 2;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately; skip it.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = ticker.tick() => self.sweep(),
                }
            }
        })
    }
}

/// Extract the client IP: the first comma-separated entry of
/// `X-Forwarded-For` when present, else the transport peer address with the
/// port stripped.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(forwarded) = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let trimmed = first.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
    }
    match peer {
        Some(addr) => addr.ip().to_string(),
        None => "unknown".to_string(),
    }
}

/// Axum middleware enforcing the per-IP limit on the wrapped routes.
pub async fn rate_limit_middleware(
    State(state): State<GatewayState>,
    request: Request,
    next: Next,
) -> Response {
    // The peer address is present only when served with connect info; in
    // router tests it is absent and X-Forwarded-For identifies the client.
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip = client_ip(request.headers(), peer);
    if !state.limiter.allow(&ip) {
        warn!(%ip, "rate limit exceeded");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({"error": "rate limit exceeded"})),
        )
            .into_response();
    }
    next.run(request).await
}
