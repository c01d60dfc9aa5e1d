//! HTTP API for relay requests, health checks and status

use crate::config::ApiConfig;
use crate::error::{RelayerError, RelayerResult};
use crate::relay::{RelayServer, RelayTransactionRequest};
use crate::store::PendingTransaction;
use crate::tx::SignedTransaction;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use ethers::types::{Address, U256};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<RelayServer>,
    pub started_at: Instant,
}

/// Build the API routes
pub fn router(relay: Arc<RelayServer>) -> Router {
    let state = AppState {
        relay,
        started_at: Instant::now(),
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/getaddr", get(get_address))
        .route("/relay", post(relay_transaction))
        .route("/status", get(get_status))
        .layer(TraceLayer::new_for_http())
        // Browser wallets call the relay directly
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, relay: Arc<RelayServer>) -> RelayerResult<()> {
    let app = router(relay);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| RelayerError::Config(format!("Cannot bind API on {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| RelayerError::Internal(format!("API server failed: {}", e)))
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Relay identity and the gas price floor clients must meet
async fn get_address(State(state): State<AppState>) -> impl IntoResponse {
    let min_gas_price = state.relay.gas_price().await;

    Json(AddressResponse {
        relay_server_address: state.relay.address(),
        relay_hub_address: state.relay.relay_hub(),
        min_gas_price,
        ready: !min_gas_price.is_zero(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Relay a signed client request
async fn relay_transaction(
    State(state): State<AppState>,
    Json(request): Json<RelayTransactionRequest>,
) -> Response {
    match state.relay.create_relay_transaction(request).await {
        Ok(signed_tx) => (StatusCode::OK, Json(RelayResponse { signed_tx })).into_response(),
        Err(e) => error_response(&e),
    }
}

/// Get relayer status
async fn get_status(State(state): State<AppState>) -> Response {
    match state.relay.pending().await {
        Ok(pending) => Json(StatusResponse {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: state.started_at.elapsed().as_secs(),
            chain_id: state.relay.chain_id(),
            relay_server_address: state.relay.address(),
            dev_mode: state.relay.dev_mode().await,
            min_gas_price: state.relay.gas_price().await,
            pending,
        })
        .into_response(),
        Err(e) => error_response(&e),
    }
}

fn status_for(error: &RelayerError) -> StatusCode {
    match error {
        RelayerError::Validation(_) => StatusCode::BAD_REQUEST,
        RelayerError::Submission { .. } | RelayerError::ChainConnection { .. } => {
            StatusCode::BAD_GATEWAY
        }
        RelayerError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(error: &RelayerError) -> Response {
    (
        status_for(error),
        Json(ErrorResponse {
            error: error.to_string(),
            kind: error.kind(),
        }),
    )
        .into_response()
}

// Response types

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AddressResponse {
    relay_server_address: Address,
    relay_hub_address: Address,
    min_gas_price: U256,
    ready: bool,
    version: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RelayResponse {
    signed_tx: SignedTransaction,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    version: String,
    uptime_seconds: u64,
    chain_id: u64,
    relay_server_address: Address,
    dev_mode: bool,
    min_gas_price: U256,
    pending: Vec<PendingTransaction>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    kind: &'static str,
}
