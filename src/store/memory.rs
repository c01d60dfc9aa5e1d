//! In-process pending transaction store

use super::{PendingTransaction, TxStore};
use crate::error::{RelayerError, RelayerResult};

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Memory-only store; contents are lost on restart
#[derive(Debug, Default)]
pub struct MemoryTxStore {
    entries: RwLock<BTreeMap<u64, PendingTransaction>>,
}

impl MemoryTxStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TxStore for MemoryTxStore {
    async fn insert(&self, tx: PendingTransaction) -> RelayerResult<()> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(&tx.nonce) {
            return Err(RelayerError::DuplicateNonce { nonce: tx.nonce });
        }
        debug!("Tracking pending tx {:?} at nonce {}", tx.hash, tx.nonce);
        entries.insert(tx.nonce, tx);
        Ok(())
    }

    async fn get_first(&self) -> RelayerResult<Option<PendingTransaction>> {
        Ok(self
            .entries
            .read()
            .await
            .first_key_value()
            .map(|(_, tx)| tx.clone()))
    }

    async fn remove(&self, nonce: u64) -> RelayerResult<Option<PendingTransaction>> {
        Ok(self.entries.write().await.remove(&nonce))
    }

    async fn replace(&self, nonce: u64, tx: PendingTransaction) -> RelayerResult<()> {
        if tx.nonce != nonce {
            return Err(RelayerError::Internal(format!(
                "Replacement for nonce {} carries nonce {}",
                nonce, tx.nonce
            )));
        }

        let mut entries = self.entries.write().await;
        match entries.get_mut(&nonce) {
            Some(existing) => {
                *existing = tx;
                Ok(())
            }
            None => Err(RelayerError::PendingNotFound { nonce }),
        }
    }

    async fn clear(&self) -> RelayerResult<()> {
        self.entries.write().await.clear();
        Ok(())
    }

    async fn list(&self) -> RelayerResult<Vec<PendingTransaction>> {
        Ok(self.entries.read().await.values().cloned().collect())
    }

    async fn len(&self) -> RelayerResult<usize> {
        Ok(self.entries.read().await.len())
    }
}
