//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Endpoint liveness and reconnects
//! - Call failures by class
//! - Submissions, attempts, gas bumps and fees
//! - Confirmation latency and timeouts

use crate::error::{ErrorKind, PilotError, PilotResult};
use crate::tx::AttemptOutcome;

use axum::{http::StatusCode, routing::get, Router};
use ethers::types::U256;
use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_gauge_vec,
    register_histogram_vec, Counter, CounterVec, Encoder, Gauge, GaugeVec, HistogramVec,
    TextEncoder,
};
use std::net::SocketAddr;
use tracing::{info, warn};

lazy_static! {
    // Endpoint metrics
    pub static ref ENDPOINT_LIVE: Gauge = register_gauge!(
        "txpilot_endpoint_live",
        "Endpoint liveness as of the last probe (1=live, 0=unreachable)"
    ).unwrap();

    pub static ref RECONNECTS: Counter = register_counter!(
        "txpilot_reconnects_total",
        "Total connection re-initializations"
    ).unwrap();

    pub static ref CALL_FAILURES: CounterVec = register_counter_vec!(
        "txpilot_call_failures_total",
        "Endpoint call failures by call and class",
        &["call", "kind"]
    ).unwrap();

    // Submission metrics
    pub static ref SUBMISSIONS: CounterVec = register_counter_vec!(
        "txpilot_submissions_total",
        "Total logical submissions started",
        &["operation"]
    ).unwrap();

    pub static ref ATTEMPTS: CounterVec = register_counter_vec!(
        "txpilot_attempts_total",
        "Build/sign/broadcast attempts by outcome",
        &["operation", "outcome"]
    ).unwrap();

    pub static ref GAS_BUMPS: CounterVec = register_counter_vec!(
        "txpilot_gas_bumps_total",
        "Gas price escalations after underpriced rejections",
        &["operation"]
    ).unwrap();

    pub static ref FEES_PAID: GaugeVec = register_gauge_vec!(
        "txpilot_last_fee_native",
        "Fee paid by the last confirmed transaction, in native units",
        &["operation"]
    ).unwrap();

    // Confirmation metrics
    pub static ref CONFIRMATIONS: CounterVec = register_counter_vec!(
        "txpilot_confirmations_total",
        "Receipts observed by execution status",
        &["status"]
    ).unwrap();

    pub static ref CONFIRMATION_LATENCY: HistogramVec = register_histogram_vec!(
        "txpilot_confirmation_latency_seconds",
        "Time from first poll to receipt",
        &["status"],
        vec![1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0]
    ).unwrap();

    pub static ref CONFIRMATION_TIMEOUTS: Counter = register_counter!(
        "txpilot_confirmation_timeouts_total",
        "Waits that exhausted every round"
    ).unwrap();

    // Wallet metrics
    pub static ref WALLET_BALANCE: GaugeVec = register_gauge_vec!(
        "txpilot_wallet_balance",
        "Wallet balance by asset",
        &["asset"]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> PilotResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| PilotError::Config(format!("Cannot bind metrics port {}: {}", self.port, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| PilotError::Fatal(format!("Metrics server stopped: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    render().map_err(|e| {
        warn!("Failed to encode metrics: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

/// Text exposition of every registered metric
pub fn render() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

// Helper functions to record metrics

pub fn record_endpoint_live(live: bool) {
    ENDPOINT_LIVE.set(if live { 1.0 } else { 0.0 });
}

pub fn record_reconnect() {
    RECONNECTS.inc();
}

pub fn record_call_failure(call: &str, kind: ErrorKind) {
    CALL_FAILURES.with_label_values(&[call, kind.label()]).inc();
}

pub fn record_submission(operation: &str) {
    SUBMISSIONS.with_label_values(&[operation]).inc();
}

pub fn record_attempt(operation: &str, outcome: AttemptOutcome) {
    ATTEMPTS
        .with_label_values(&[operation, outcome.label()])
        .inc();
}

pub fn record_gas_bump(operation: &str) {
    GAS_BUMPS.with_label_values(&[operation]).inc();
}

pub fn record_fee(operation: &str, fee_wei: U256) {
    FEES_PAID
        .with_label_values(&[operation])
        .set(crate::ops::from_wei(fee_wei));
}

pub fn record_confirmation(success: bool, latency_secs: f64) {
    let status = if success { "success" } else { "reverted" };
    CONFIRMATIONS.with_label_values(&[status]).inc();
    CONFIRMATION_LATENCY
        .with_label_values(&[status])
        .observe(latency_secs);
}

pub fn record_confirmation_timeout() {
    CONFIRMATION_TIMEOUTS.inc();
}

pub fn record_wallet_balance(asset: &str, balance: f64) {
    WALLET_BALANCE.with_label_values(&[asset]).set(balance);
}
