//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Ledger connection status and height
//! - Relay request outcomes
//! - Submission, resend and confirmation counts
//! - Pending store depth and the current minimum gas price

use crate::error::{RelayerError, RelayerResult};

use axum::{http::StatusCode, routing::get, Router};
use ethers::types::U256;
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram, CounterVec,
    Encoder, Gauge, GaugeVec, Histogram, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Ledger metrics
    pub static ref CHAIN_CONNECTED: GaugeVec = register_gauge_vec!(
        "sponsor_relayer_chain_connected",
        "Ledger connection status (1=connected, 0=disconnected)",
        &["chain_id"]
    ).unwrap();

    pub static ref CHAIN_BLOCK_HEIGHT: GaugeVec = register_gauge_vec!(
        "sponsor_relayer_chain_block_height",
        "Latest block height seen on the ledger",
        &["chain_id"]
    ).unwrap();

    // Request metrics
    pub static ref RELAY_REQUESTS: CounterVec = register_counter_vec!(
        "sponsor_relayer_requests_total",
        "Relay requests by outcome",
        &["outcome"]
    ).unwrap();

    // Transaction metrics
    pub static ref TX_SUBMITTED: CounterVec = register_counter_vec!(
        "sponsor_relayer_transactions_submitted_total",
        "Relay transactions accepted by the ledger",
        &[]
    ).unwrap();

    pub static ref TX_RESENT: CounterVec = register_counter_vec!(
        "sponsor_relayer_transactions_resent_total",
        "Stale transactions resent at a bumped gas price",
        &[]
    ).unwrap();

    pub static ref TX_CONFIRMED: CounterVec = register_counter_vec!(
        "sponsor_relayer_transactions_confirmed_total",
        "Transactions that reached confirmation depth",
        &[]
    ).unwrap();

    pub static ref TX_CONFIRMATION_LATENCY: Histogram = register_histogram!(
        "sponsor_relayer_confirmation_latency_seconds",
        "Time from last submission to confirmation depth",
        vec![15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1200.0, 3600.0]
    ).unwrap();

    pub static ref PENDING_TRANSACTIONS: Gauge = register_gauge!(
        "sponsor_relayer_pending_transactions",
        "Transactions submitted and not yet confirmed"
    ).unwrap();

    pub static ref MIN_GAS_PRICE: Gauge = register_gauge!(
        "sponsor_relayer_min_gas_price_wei",
        "Minimum gas price the relay accepts, markup included"
    ).unwrap();

    // Health metrics
    pub static ref HEALTH_CHECK_SUCCESS: CounterVec = register_counter_vec!(
        "sponsor_relayer_health_check_success_total",
        "Total successful health checks",
        &[]
    ).unwrap();

    pub static ref HEALTH_CHECK_FAILURE: CounterVec = register_counter_vec!(
        "sponsor_relayer_health_check_failure_total",
        "Total failed health checks",
        &[]
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

    pub async fn run(&self) -> RelayerResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| RelayerError::Config(format!("Cannot bind metrics on {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| RelayerError::Internal(format!("Metrics server failed: {}", e)))
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

// Helper functions to record metrics

pub fn record_chain_health(chain_id: u64, healthy: bool) {
    CHAIN_CONNECTED
        .with_label_values(&[&chain_id.to_string()])
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_block_height(chain_id: u64, block_number: u64) {
    CHAIN_BLOCK_HEIGHT
        .with_label_values(&[&chain_id.to_string()])
        .set(block_number as f64);
}

pub fn record_relay_request(outcome: &str) {
    RELAY_REQUESTS.with_label_values(&[outcome]).inc();
}

pub fn record_tx_submitted() {
    TX_SUBMITTED.with_label_values(&[]).inc();
}

pub fn record_tx_resent() {
    TX_RESENT.with_label_values(&[]).inc();
}

pub fn record_tx_confirmed(latency_secs: f64) {
    TX_CONFIRMED.with_label_values(&[]).inc();
    TX_CONFIRMATION_LATENCY.observe(latency_secs.max(0.0));
}

pub fn record_pending(count: usize) {
    PENDING_TRANSACTIONS.set(count as f64);
}

pub fn record_gas_price(price: U256) {
    MIN_GAS_PRICE.set(wei_as_f64(price));
}

pub fn record_health_check() {
    HEALTH_CHECK_SUCCESS.with_label_values(&[]).inc();
}

pub fn record_health_check_failure() {
    HEALTH_CHECK_FAILURE.with_label_values(&[]).inc();
}

fn wei_as_f64(value: U256) -> f64 {
    if value > U256::from(u128::MAX) {
        f64::MAX
    } else {
        value.as_u128() as f64
    }
}
