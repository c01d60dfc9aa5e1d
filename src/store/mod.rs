//! Pending transaction storage
//!
//! Handles:
//! - Ordering of in-flight relay transactions by nonce
//! - In-place replacement when a transaction is resent
//! - Optional PostgreSQL persistence for restart recovery

mod memory;
mod postgres;

pub use memory::MemoryTxStore;
pub use postgres::PgTxStore;

use crate::error::RelayerResult;
use crate::tx::SignedTransaction;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ethers::types::{Address, Bytes, H256, U256};
use serde::Serialize;

/// A transaction the relay submitted and has not yet seen settle
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTransaction {
    pub nonce: u64,
    pub hash: H256,
    pub gas_price: U256,
    pub gas_limit: U256,
    pub to: Address,
    pub data: Bytes,
    /// Re-broadcastable signed bytes
    pub signed_payload: Bytes,
    pub submitted_at: DateTime<Utc>,
}

impl PendingTransaction {
    pub fn new(tx: &SignedTransaction, submitted_at: DateTime<Utc>) -> Self {
        Self {
            nonce: tx.nonce,
            hash: tx.hash,
            gas_price: tx.gas_price,
            gas_limit: tx.gas_limit,
            to: tx.to,
            data: tx.data.clone(),
            signed_payload: tx.raw.clone(),
            submitted_at,
        }
    }

    /// The stored transaction in its broadcastable form
    pub fn signed(&self) -> SignedTransaction {
        SignedTransaction {
            hash: self.hash,
            nonce: self.nonce,
            to: self.to,
            data: self.data.clone(),
            gas_limit: self.gas_limit,
            gas_price: self.gas_price,
            raw: self.signed_payload.clone(),
        }
    }
}

/// Nonce-ordered record of submitted, unconfirmed transactions
///
/// All operations are atomic with respect to each other. "First" is always the entry
/// with the lowest nonce.
#[async_trait]
pub trait TxStore: Send + Sync {
    /// Add an entry, failing with `DuplicateNonce` if the nonce is already tracked
    async fn insert(&self, tx: PendingTransaction) -> RelayerResult<()>;

    /// Lowest-nonce entry, if any
    async fn get_first(&self) -> RelayerResult<Option<PendingTransaction>>;

    /// Drop the entry for `nonce`, returning it if it existed
    async fn remove(&self, nonce: u64) -> RelayerResult<Option<PendingTransaction>>;

    /// Swap the entry for `nonce` with a resent version of the same nonce
    async fn replace(&self, nonce: u64, tx: PendingTransaction) -> RelayerResult<()>;

    /// Drop every entry
    async fn clear(&self) -> RelayerResult<()>;

    /// All entries in nonce order
    async fn list(&self) -> RelayerResult<Vec<PendingTransaction>>;

    async fn len(&self) -> RelayerResult<usize> {
        Ok(self.list().await?.len())
    }
}
