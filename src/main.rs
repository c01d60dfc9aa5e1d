//! Sponsor Relayer - pays gas for fee-less clients' meta-transactions
//!
//! Accepts signed relay requests over HTTP, wraps them into relay hub calls paid by the
//! relay account, and keeps resubmitting stuck transactions until they are final.

use anyhow::{Context, Result};
use ethers::types::Address;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{debug, error, info, warn};

use sponsor_relayer::api;
use sponsor_relayer::chain::{EthLedger, Ledger};
use sponsor_relayer::clock::SystemClock;
use sponsor_relayer::config::{Settings, StoreBackend};
use sponsor_relayer::metrics::{self, MetricsServer};
use sponsor_relayer::relay::{EthSignVerifier, RelayDeps, RelayServer, UpdateOutcome};
use sponsor_relayer::store::{MemoryTxStore, PgTxStore, TxStore};
use sponsor_relayer::tx::RelaySigner;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting Sponsor Relayer v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration for chain {} ({} RPC endpoints)",
        settings.ledger.chain_id,
        settings.ledger.rpc_urls.len()
    );

    // Initialize pending transaction store
    let (store, database): (Arc<dyn TxStore>, Option<Arc<PgTxStore>>) =
        match settings.store.backend {
            StoreBackend::Memory => {
                warn!("Using in-memory store; pending transactions are lost on restart");
                (Arc::new(MemoryTxStore::new()) as Arc<dyn TxStore>, None)
            }
            StoreBackend::Postgres => {
                let db_config = settings
                    .store
                    .database
                    .as_ref()
                    .context("Postgres store selected without database settings")?;
                let pg = Arc::new(PgTxStore::new(db_config).await?);
                info!("Database connection established");
                pg.run_migrations().await?;
                (pg.clone() as Arc<dyn TxStore>, Some(pg))
            }
        };
    let pending = store.len().await?;
    if pending > 0 {
        info!("Resuming with {} pending transactions", pending);
    }
    metrics::record_pending(pending);

    // Initialize ledger connection
    let ledger: Arc<dyn Ledger> = Arc::new(EthLedger::new(
        &settings.ledger,
        settings.relayer.rpc_timeout(),
    )?);
    info!("Ledger connection initialized");

    let signer = RelaySigner::from_env(&settings.wallet.private_key_env, settings.ledger.chain_id)?;
    let relay_hub: Address = settings
        .ledger
        .relay_hub_address
        .parse()
        .with_context(|| format!("Invalid relay hub address {}", settings.ledger.relay_hub_address))?;

    let relay = Arc::new(RelayServer::new(
        settings.relayer.clone(),
        relay_hub,
        signer,
        RelayDeps {
            ledger: ledger.clone(),
            store,
            clock: Arc::new(SystemClock),
            verifier: Arc::new(EthSignVerifier),
        },
    ));

    if let Err(e) = relay.refresh_gas_price().await {
        warn!("Initial gas price refresh failed, requests rejected until it succeeds: {}", e);
    }

    // Start API server
    let api_handle = tokio::spawn({
        let config = settings.api.clone();
        let relay = relay.clone();
        async move {
            if let Err(e) = api::run_server(config, relay).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Confirmation/resend loop
    let update_handle = tokio::spawn({
        let relay = relay.clone();
        let interval = Duration::from_millis(settings.relayer.poll_interval_ms);
        async move {
            loop {
                tokio::time::sleep(interval).await;
                drain_confirmations(&relay).await;
            }
        }
    });

    // Gas price refresh loop
    let gas_price_handle = tokio::spawn({
        let relay = relay.clone();
        let interval = Duration::from_secs(settings.relayer.gas_price_refresh_secs);
        async move {
            loop {
                tokio::time::sleep(interval).await;
                if let Err(e) = relay.refresh_gas_price().await {
                    warn!("Gas price refresh failed: {}", e);
                }
            }
        }
    });

    // Health check loop
    let health_handle = tokio::spawn({
        let ledger = ledger.clone();
        let database = database.clone();
        let interval = settings.relayer.health_check_interval_secs;
        async move {
            loop {
                tokio::time::sleep(Duration::from_secs(interval)).await;
                let mut healthy = true;

                // Check ledger connection
                match ledger.block_number().await {
                    Ok(height) => {
                        metrics::record_chain_health(ledger.chain_id(), true);
                        metrics::record_block_height(ledger.chain_id(), height);
                    }
                    Err(e) => {
                        warn!("Ledger {} health check failed: {}", ledger.chain_id(), e);
                        metrics::record_chain_health(ledger.chain_id(), false);
                        healthy = false;
                    }
                }

                // Check database connection
                if let Some(database) = &database {
                    if let Err(e) = database.health_check().await {
                        warn!("Database health check failed: {}", e);
                        healthy = false;
                    }
                }

                if healthy {
                    metrics::record_health_check();
                } else {
                    metrics::record_health_check_failure();
                }
            }
        }
    });

    info!("Sponsor Relayer {:?} is running", relay.address());
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    // Abort background tasks
    api_handle.abort();
    update_handle.abort();
    gas_price_handle.abort();
    health_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Sponsor Relayer stopped");
    Ok(())
}

/// Settle as many final or superseded transactions as possible, stopping at the first
/// one that is still pending or was just resent
async fn drain_confirmations(relay: &RelayServer) {
    loop {
        match relay.update_outcome().await {
            Ok(UpdateOutcome::Confirmed { .. }) | Ok(UpdateOutcome::Superseded { .. }) => continue,
            Ok(UpdateOutcome::Resent(tx)) => {
                debug!("Resent nonce {} as {:?}", tx.nonce, tx.hash);
                break;
            }
            Ok(UpdateOutcome::Idle) | Ok(UpdateOutcome::Waiting { .. }) => break,
            Err(e) => {
                warn!("Pending transaction update failed: {}", e);
                break;
            }
        }
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,sponsor_relayer=debug,sqlx=warn,hyper=warn")
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
