//! Confirmation and resend engine
//!
//! Inspects only the lowest pending nonce on each call. A nonce-ordered ledger cannot
//! confirm nonce k+1 before k, so later entries are left alone until the head settles.

use super::server::RelayServer;
use crate::chain::{ConfirmationStatus, TxReceipt};
use crate::error::{RelayerError, RelayerResult};
use crate::events;
use crate::store::PendingTransaction;
use crate::tx::{scale_gas_price, SignedTransaction};

use ethers::types::H256;
use std::future::Future;
use tracing::{debug, info, warn};

/// What one pass over the oldest pending transaction did
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    /// Nothing pending
    Idle,
    /// Head entry left as is: not mined and not stale, or mined and still shallow
    Waiting { nonce: u64 },
    /// Head entry reached confirmation depth and was dropped from the store
    Confirmed { nonce: u64, hash: H256 },
    /// Head entry was re-signed at a higher gas price and broadcast again
    Resent(SignedTransaction),
    /// Head hash was never mined but the account already used its nonce through an
    /// earlier broadcast; the entry was dropped
    Superseded { nonce: u64, hash: H256 },
}

impl RelayServer {
    /// Settle or resend the oldest pending transaction
    ///
    /// Returns the replacement transaction when a resend happened, `None` otherwise.
    /// "Not yet time to resend" is a normal `None`, never an error.
    pub async fn update_unconfirmed_transactions(
        &self,
    ) -> RelayerResult<Option<SignedTransaction>> {
        match self.update_outcome().await? {
            UpdateOutcome::Resent(tx) => Ok(Some(tx)),
            _ => Ok(None),
        }
    }

    /// Same pass as `update_unconfirmed_transactions`, reporting what was decided
    pub async fn update_outcome(&self) -> RelayerResult<UpdateOutcome> {
        // Held for the whole read-decide-resubmit sequence
        let _nonces = self.nonces.lock().await;

        let pending = match self.store.get_first().await? {
            Some(pending) => pending,
            None => return Ok(UpdateOutcome::Idle),
        };
        let nonce = pending.nonce;

        let receipt = self
            .confirmation_query(
                nonce,
                "fetch receipt",
                self.ledger.transaction_receipt(pending.hash),
            )
            .await?;
        let height = match receipt {
            Some(_) => {
                self.confirmation_query(nonce, "fetch block height", self.ledger.block_number())
                    .await?
            }
            None => 0,
        };

        let status = ConfirmationStatus::classify(
            receipt.as_ref(),
            height,
            self.config.confirmation_blocks,
        );

        match status {
            ConfirmationStatus::Final { confirmations, .. } => {
                // `Final` is only produced from a receipt
                if let Some(receipt) = receipt.as_ref() {
                    self.confirm(&pending, receipt, confirmations).await?;
                }
                Ok(UpdateOutcome::Confirmed {
                    nonce,
                    hash: pending.hash,
                })
            }
            ConfirmationStatus::Shallow { confirmations, .. } => {
                if !self.is_stale(&pending) {
                    debug!(
                        "Tx {:?} at nonce {} has {}/{} confirmations",
                        pending.hash, nonce, confirmations, self.config.confirmation_blocks
                    );
                    return Ok(UpdateOutcome::Waiting { nonce });
                }

                // A receipt for a nonce the account has already moved past is simply
                // waiting for depth; resending would be rejected as a reused nonce.
                if self.nonce_used(nonce).await? {
                    debug!(
                        "Tx {:?} at nonce {} mined, awaiting depth ({} confirmations)",
                        pending.hash, nonce, confirmations
                    );
                    return Ok(UpdateOutcome::Waiting { nonce });
                }

                self.resend(&pending).await.map(UpdateOutcome::Resent)
            }
            ConfirmationStatus::NotMined => {
                if !self.is_stale(&pending) {
                    debug!(
                        "Tx {:?} at nonce {} not mined yet, within resend interval",
                        pending.hash, nonce
                    );
                    return Ok(UpdateOutcome::Waiting { nonce });
                }

                // Another broadcast at this nonce was mined in place of the stored hash
                if self.nonce_used(nonce).await? {
                    self.drop_superseded(&pending).await?;
                    return Ok(UpdateOutcome::Superseded {
                        nonce,
                        hash: pending.hash,
                    });
                }

                self.resend(&pending).await.map(UpdateOutcome::Resent)
            }
        }
    }

    /// Whether the ledger has mined some relay transaction at `nonce`
    async fn nonce_used(&self, nonce: u64) -> RelayerResult<bool> {
        let account_nonce = self
            .confirmation_query(
                nonce,
                "fetch relay nonce",
                self.ledger.account_nonce(self.signer.address()),
            )
            .await?;
        Ok(account_nonce > nonce)
    }

    async fn drop_superseded(&self, pending: &PendingTransaction) -> RelayerResult<()> {
        self.store.remove(pending.nonce).await?;
        warn!(
            "Dropping tx {:?}: nonce {} was used by an earlier broadcast",
            pending.hash, pending.nonce
        );
        crate::metrics::record_pending(self.store.len().await?);
        Ok(())
    }

    fn is_stale(&self, pending: &PendingTransaction) -> bool {
        let elapsed = (self.clock.now() - pending.submitted_at)
            .to_std()
            .unwrap_or_default();
        elapsed >= self.config.resend_interval()
    }

    async fn confirm(
        &self,
        pending: &PendingTransaction,
        receipt: &TxReceipt,
        confirmations: u64,
    ) -> RelayerResult<()> {
        self.store.remove(pending.nonce).await?;

        match events::find_transaction_relayed(&receipt.logs) {
            Some(relayed) if !relayed.status.is_ok() => warn!(
                "Tx {:?} at nonce {} confirmed but relayed call reported {:?}",
                pending.hash, pending.nonce, relayed.status
            ),
            Some(relayed) => debug!(
                "Tx {:?} relayed call from {:?} charged {}",
                pending.hash, relayed.from, relayed.charge
            ),
            None => debug!("Tx {:?} receipt carries no relay settlement log", pending.hash),
        }

        info!(
            "Tx {:?} at nonce {} confirmed in block {} ({} confirmations)",
            pending.hash, pending.nonce, receipt.block_number, confirmations
        );
        let latency = (self.clock.now() - pending.submitted_at).num_milliseconds() as f64 / 1000.0;
        crate::metrics::record_tx_confirmed(latency);
        crate::metrics::record_pending(self.store.len().await?);
        Ok(())
    }

    async fn resend(&self, pending: &PendingTransaction) -> RelayerResult<SignedTransaction> {
        let mut unsigned = pending.signed().unsigned();
        unsigned.gas_price = scale_gas_price(pending.gas_price, self.config.gas_price_bump_percent);

        let resent = self.signer.sign(unsigned).await?;
        self.submit(&resent).await?;
        self.store
            .replace(pending.nonce, PendingTransaction::new(&resent, self.clock.now()))
            .await?;

        info!(
            "Resent nonce {}: {:?} -> {:?}, gas price {} -> {}",
            pending.nonce, pending.hash, resent.hash, pending.gas_price, resent.gas_price
        );
        crate::metrics::record_tx_resent();
        Ok(resent)
    }

    /// Ledger lookup whose failure leaves the pending entry untouched
    async fn confirmation_query<T, F>(&self, nonce: u64, operation: &str, call: F) -> RelayerResult<T>
    where
        F: Future<Output = RelayerResult<T>>,
    {
        self.bounded(operation, call)
            .await
            .map_err(|e| RelayerError::ConfirmationQuery {
                nonce,
                message: format!("{}: {}", operation, e),
            })
    }
}
