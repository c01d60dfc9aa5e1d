//! Ledger client over ethers HTTP providers with automatic failover

use super::{Ledger, TxReceipt};
use crate::config::LedgerConfig;
use crate::error::{RelayerError, RelayerResult};
use crate::tx::SignedTransaction;

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Multi-provider ledger client with automatic failover
pub struct EthLedger {
    chain_id: u64,
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
    /// Upper bound on every RPC round trip
    rpc_timeout: Duration,
}

impl EthLedger {
    /// Create a new ledger client
    pub fn new(config: &LedgerConfig, rpc_timeout: Duration) -> RelayerResult<Self> {
        let mut http_providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(Duration::from_millis(100));
                    http_providers.push(provider);
                    debug!("Added HTTP provider for chain {}: {}", config.chain_id, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(RelayerError::ChainConnection {
                chain_id: config.chain_id,
                message: "No valid RPC providers".to_string(),
            });
        }

        Ok(Self {
            chain_id: config.chain_id,
            http_providers,
            current_provider: AtomicUsize::new(0),
            rpc_timeout,
        })
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    fn failover(&self) {
        if self.http_providers.len() < 2 {
            return;
        }
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.chain_id, next);
    }

    /// Run a read-only query against each provider in turn until one answers
    async fn query<'a, T, F, Fut>(&'a self, operation: &str, call: F) -> RelayerResult<T>
    where
        F: Fn(&'a Provider<Http>) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>> + 'a,
    {
        let mut last_error = String::from("no providers");
        for _ in 0..self.http_providers.len() {
            match timeout(self.rpc_timeout, call(self.http())).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => {
                    warn!("{} failed on chain {}: {}", operation, self.chain_id, e);
                    last_error = e.to_string();
                    self.failover();
                }
                Err(_) => {
                    warn!("{} timed out on chain {}", operation, self.chain_id);
                    last_error = format!("{} timed out", operation);
                    self.failover();
                }
            }
        }

        Err(RelayerError::ChainConnection {
            chain_id: self.chain_id,
            message: last_error,
        })
    }
}

#[async_trait]
impl Ledger for EthLedger {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn send_raw_transaction(&self, tx: &SignedTransaction) -> RelayerResult<H256> {
        // Never fail over a broadcast: a second provider may accept a tx the first already has.
        let result = timeout(
            self.rpc_timeout,
            self.http().send_raw_transaction(tx.raw.clone()),
        )
        .await;

        match result {
            Ok(Ok(pending)) => Ok(pending.tx_hash()),
            Ok(Err(e)) => Err(RelayerError::ChainConnection {
                chain_id: self.chain_id,
                message: e.to_string(),
            }),
            Err(_) => Err(RelayerError::Timeout {
                operation: format!("send transaction with nonce {}", tx.nonce),
            }),
        }
    }

    async fn transaction_receipt(&self, hash: H256) -> RelayerResult<Option<TxReceipt>> {
        let receipt = self
            .query("get_transaction_receipt", |p| p.get_transaction_receipt(hash))
            .await?;

        // Receipts without a block number belong to pending transactions
        Ok(receipt.and_then(|r| {
            r.block_number.map(|block| TxReceipt {
                transaction_hash: r.transaction_hash,
                block_number: block.as_u64(),
                status: r.status.map(|s| s.as_u64()),
                gas_used: r.gas_used.unwrap_or_default(),
                logs: r.logs,
            })
        }))
    }

    async fn account_nonce(&self, address: Address) -> RelayerResult<u64> {
        let nonce = self
            .query("get_transaction_count", |p| p.get_transaction_count(address, None))
            .await
            .map_err(|e| RelayerError::Nonce {
                chain_id: self.chain_id,
                message: e.to_string(),
            })?;

        Ok(nonce.as_u64())
    }

    async fn pending_account_nonce(&self, address: Address) -> RelayerResult<u64> {
        let nonce = self
            .query("get_transaction_count", |p| {
                p.get_transaction_count(address, Some(BlockNumber::Pending.into()))
            })
            .await
            .map_err(|e| RelayerError::Nonce {
                chain_id: self.chain_id,
                message: e.to_string(),
            })?;

        Ok(nonce.as_u64())
    }

    async fn suggested_gas_price(&self) -> RelayerResult<U256> {
        self.query("get_gas_price", |p| p.get_gas_price())
            .await
            .map_err(|e| RelayerError::GasPrice(e.to_string()))
    }

    async fn block_number(&self) -> RelayerResult<u64> {
        let block = self
            .query("get_block_number", |p| p.get_block_number())
            .await?;
        Ok(block.as_u64())
    }
}
