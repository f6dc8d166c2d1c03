// src/metrics.rs
//! Prometheus metrics

use anyhow::Result;
use axum::{
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use tokio::net::TcpListener;
use tracing::{info, warn};

const TEXT_FORMAT: &str = "text/plain; version=0.0.4";

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref SYNC_CYCLES: IntCounter =
        IntCounter::new("contract_sync_cycles_total", "Completed refresh cycles").unwrap();
    pub static ref SYNC_CYCLES_SKIPPED: IntCounter = IntCounter::new(
        "contract_sync_cycles_skipped_total",
        "Timer ticks skipped because a cycle was in flight"
    )
    .unwrap();
    pub static ref CONTRACTS_ACTIVE: IntGauge =
        IntGauge::new("contracts_active", "Contracts in the current working set").unwrap();
    pub static ref FETCH_FAILURES: IntCounter =
        IntCounter::new("contract_fetch_failures_total", "Contract ids that failed to resolve").unwrap();
    pub static ref ESCROW_CONFIRMATIONS: IntCounter = IntCounter::new(
        "escrow_confirmations_total",
        "Escrow confirmation signals sent to the service"
    )
    .unwrap();
    pub static ref ACTIONS_COMPLETED: IntCounter =
        IntCounter::new("contract_actions_completed_total", "Pay/cancel actions accepted").unwrap();
    pub static ref ACTIONS_FAILED: IntCounter =
        IntCounter::new("contract_actions_failed_total", "Pay/cancel actions rejected").unwrap();
}

/// Registers all collectors; safe to call more than once
pub fn register() -> Result<()> {
    let counters = [
        &*SYNC_CYCLES,
        &*SYNC_CYCLES_SKIPPED,
        &*FETCH_FAILURES,
        &*ESCROW_CONFIRMATIONS,
        &*ACTIONS_COMPLETED,
        &*ACTIONS_FAILED,
    ];

    for counter in counters {
        register_collector(Box::new(counter.clone()))?;
    }
    register_collector(Box::new(CONTRACTS_ACTIVE.clone()))?;

    Ok(())
}

fn register_collector(collector: Box<dyn prometheus::core::Collector>) -> Result<()> {
    match REGISTRY.register(collector) {
        Ok(()) | Err(prometheus::Error::AlreadyReg) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Text exposition of everything registered
pub fn render() -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// `GET /metrics` in the Prometheus text format
pub fn router() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}

async fn metrics_handler() -> impl IntoResponse {
    match render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, TEXT_FORMAT)],
            body,
        ),
        Err(e) => {
            warn!("Failed to render metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain")],
                e.to_string(),
            )
        }
    }
}

pub async fn start_server(port: u16) -> Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!("Metrics available on port {}", port);
    serve(listener).await
}

async fn serve(listener: TcpListener) -> Result<()> {
    register()?;
    axum::serve(listener, router()).await?;
    Ok(())
}
