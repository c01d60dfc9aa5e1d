//! Chain module - the relay's view of the ledger
//!
//! This module provides:
//! - The narrow `Ledger` capability the relay core depends on
//! - An ethers-backed HTTP implementation with per-call timeouts
//! - Confirmation depth helpers

pub mod finality;
pub mod provider;

pub use finality::{confirmations, ConfirmationStatus};
pub use provider::EthLedger;

use crate::error::RelayerResult;
use crate::tx::SignedTransaction;

use async_trait::async_trait;
use ethers::types::{Address, Log, H256, U256};

/// Receipt of a mined transaction, reduced to what the relay needs
#[derive(Debug, Clone, PartialEq)]
pub struct TxReceipt {
    pub transaction_hash: H256,
    pub block_number: u64,
    /// 1 for success, 0 for revert, `None` on pre-byzantium chains
    pub status: Option<u64>,
    pub gas_used: U256,
    pub logs: Vec<Log>,
}

/// Ledger operations used by the relay
///
/// Every method may block on network I/O. Implementations report transport failures as
/// `RelayerError::ChainConnection` or `RelayerError::Timeout`.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Chain ID transactions are signed for
    fn chain_id(&self) -> u64;

    /// Broadcast a signed transaction, returning the hash the ledger assigned
    async fn send_raw_transaction(&self, tx: &SignedTransaction) -> RelayerResult<H256>;

    /// Receipt for a transaction, `None` if unknown or not yet mined
    async fn transaction_receipt(&self, hash: H256) -> RelayerResult<Option<TxReceipt>>;

    /// Number of transactions the account has had mined
    async fn account_nonce(&self, address: Address) -> RelayerResult<u64>;

    /// Next nonce for the account counting transactions still in the mempool
    async fn pending_account_nonce(&self, address: Address) -> RelayerResult<u64> {
        self.account_nonce(address).await
    }

    /// Network's suggested gas price
    async fn suggested_gas_price(&self) -> RelayerResult<U256>;

    /// Current block height
    async fn block_number(&self) -> RelayerResult<u64>;
}
