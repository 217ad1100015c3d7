//! Read-only diagnostics HTTP API.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::Arc;

use crate::pool::OfferPool;
use crate::summary::{HostStatus, HostSummary, OfferScope};

/// Shared application state.
pub struct AppState {
    pub pool: Arc<OfferPool>,
    pub prometheus: PrometheusHandle,
}

/// Creates the API router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/hosts", get(list_hosts))
        .route("/hosts/{hostname}", get(get_host))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse { status: "healthy" })
}

/// List all host summaries.
async fn list_hosts(State(state): State<Arc<AppState>>) -> Json<Vec<HostResponse>> {
    let summaries = state.pool.get_host_summaries(&[]);
    let mut hosts: Vec<HostResponse> = summaries.values().map(|s| HostResponse::from_summary(s)).collect();
    hosts.sort_by(|a, b| a.hostname.cmp(&b.hostname));
    Json(hosts)
}

/// Get one host summary.
async fn get_host(
    State(state): State<Arc<AppState>>,
    Path(hostname): Path<String>,
) -> Result<Json<HostResponse>, StatusCode> {
    state
        .pool
        .get_host_summary(&hostname)
        .map(|s| Json(HostResponse::from_summary(&s)))
        .map_err(|_| StatusCode::NOT_FOUND)
}

/// Prometheus metrics endpoint.
async fn metrics(State(state): State<Arc<AppState>>) -> String {
    state.pool.refresh_gauge_maps();
    state.prometheus.render()
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// A host summary rendered for diagnostics.
#[derive(Serialize)]
pub struct HostResponse {
    pub hostname: String,
    pub status: &'static str,
    pub unreserved_offers: usize,
    pub reserved_offers: usize,
    pub cpu: f64,
    pub mem: f64,
    pub disk: f64,
    pub gpu: f64,
    pub held_tasks: Vec<String>,
    pub ready_count: u64,
}

impl HostResponse {
    fn from_summary(summary: &HostSummary) -> Self {
        let (amount, status) = summary.unreserved_amount();
        Self {
            hostname: summary.hostname().to_owned(),
            status: match status {
                HostStatus::Ready => "ready",
                HostStatus::Placing => "placing",
            },
            unreserved_offers: summary.get_offers(OfferScope::Unreserved).len(),
            reserved_offers: summary.get_offers(OfferScope::Reserved).len(),
            cpu: amount.cpu,
            mem: amount.mem,
            disk: amount.disk,
            gpu: amount.gpu,
            held_tasks: summary.held_tasks().into_iter().map(|t| t.0).collect(),
            ready_count: summary.ready_count(),
        }
    }
}
