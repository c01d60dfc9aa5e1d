//! Confirmation depth tracking for relayed transactions
//!
//! A transaction is treated as final once `depth` blocks have been built on top of the
//! block that included it. Anything shallower may still be reorganized away.

use super::TxReceipt;

/// Where a submitted transaction stands relative to the confirmation threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationStatus {
    /// No receipt: still in the mempool, dropped, or reorganized out
    NotMined,
    /// Mined but not yet deep enough to be final
    Shallow { block_number: u64, confirmations: u64 },
    /// Deep enough to forget about
    Final { block_number: u64, confirmations: u64 },
}

impl ConfirmationStatus {
    /// Classify a receipt lookup against the current chain height
    pub fn classify(receipt: Option<&TxReceipt>, current_height: u64, depth: u64) -> Self {
        match receipt {
            None => ConfirmationStatus::NotMined,
            Some(receipt) => {
                let confirmations = confirmations(current_height, receipt.block_number);
                if confirmations >= depth {
                    ConfirmationStatus::Final {
                        block_number: receipt.block_number,
                        confirmations,
                    }
                } else {
                    ConfirmationStatus::Shallow {
                        block_number: receipt.block_number,
                        confirmations,
                    }
                }
            }
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, ConfirmationStatus::Final { .. })
    }
}

/// Blocks built on top of `included_in`, zero if the ledger reports a lower height
pub fn confirmations(current_height: u64, included_in: u64) -> u64 {
    current_height.saturating_sub(included_in)
}
