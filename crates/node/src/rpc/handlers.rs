//! Request handlers for the gateway API.

use super::ratelimit::RateLimiter;
use crate::{BlockStore, NodeMetrics, NodeStatus};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bedrock_types::Block;
use serde::Serialize;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::error;

/// Shared state behind the gateway handlers.
#[derive(Clone)]
pub struct GatewayState {
    /// Readiness flag for orchestration probes.
    pub ready: Arc<AtomicBool>,
    /// Latest consensus status published by the runner.
    pub status: Arc<RwLock<NodeStatus>>,
    /// Read access to committed blocks.
    pub block_store: Arc<dyn BlockStore>,
    /// Prometheus registry for `/metrics`.
    pub metrics: Arc<NodeMetrics>,
    /// Per-IP limiter applied to `/api/v1`.
    pub limiter: Arc<RateLimiter>,
    /// Process start, for uptime reporting.
    pub start_time: Instant,
}

#[derive(Debug, Serialize)]
pub(super) struct StatusResponse {
    height: u64,
    round: u64,
    committed_height: u64,
    committed_hash: String,
    evidence_records: usize,
    uptime_secs: u64,
}

#[derive(Debug, Serialize)]
pub(super) struct BlockResponse {
    height: u64,
    round: u64,
    hash: String,
    parent_hash: String,
    block_time: i64,
    transactions: usize,
}

impl BlockResponse {
    fn from_block(block: &Block) -> Self {
        BlockResponse {
            height: block.header.height,
            round: block.header.round,
            hash: block.hash().to_hex(),
            parent_hash: block.header.parent_hash.to_hex(),
            block_time: block.header.block_time,
            transactions: block.transactions.len(),
        }
    }
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({"error": "not found"}))).into_response()
}

fn storage_failure(err: impl std::fmt::Display) -> Response {
    error!(%err, "block store read failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "storage unavailable"})),
    )
        .into_response()
}

pub(super) async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status": "ok"})))
}

pub(super) async fn ready_handler(State(state): State<GatewayState>) -> StatusCode {
    if state.ready.load(Ordering::SeqCst) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

pub(super) async fn metrics_handler(State(state): State<GatewayState>) -> String {
    state.metrics.render()
}

pub(super) async fn status_handler(State(state): State<GatewayState>) -> Json<StatusResponse> {
    let status = state.status.read().await;
    Json(StatusResponse {
        height: status.height,
        round: status.round,
        committed_height: status.committed_height,
        committed_hash: status.committed_hash.to_hex(),
        evidence_records: status.evidence_records,
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

pub(super) async fn latest_block_handler(State(state): State<GatewayState>) -> Response {
    let latest = match state.block_store.latest() {
        Ok(latest) => latest,
        Err(err) => return storage_failure(err),
    };
    let Some((height, _)) = latest else {
        return not_found();
    };
    block_at_height(&state, height)
}

pub(super) async fn block_handler(
    State(state): State<GatewayState>,
    Path(height): Path<u64>,
) -> Response {
    block_at_height(&state, height)
}

fn block_at_height(state: &GatewayState, height: u64) -> Response {
    match state.block_store.block_by_height(height) {
        Ok(Some(block)) => Json(BlockResponse::from_block(&block)).into_response(),
        Ok(None) => not_found(),
        Err(err) => storage_failure(err),
    }
}
