//! Nonce allocation for the relay's signing account
//!
//! Handles:
//! - Local nonce caching seeded once from the ledger, counting mempool transactions
//! - Advancing only after a submission is accepted
//! - A bypass path that always asks the ledger, for recovering from desync
//!
//! The allocator is not synchronized on its own. The relay holds it inside the same
//! critical section as the pending transaction store.

use crate::chain::Ledger;
use crate::error::RelayerResult;

use ethers::types::Address;
use tracing::{debug, warn};

/// Where the next nonce comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceMode {
    /// Local counter, seeded from the ledger on first use
    Cached,
    /// Query the ledger on every allocation ("dev mode")
    Bypass,
}

impl NonceMode {
    pub fn from_dev_mode(dev_mode: bool) -> Self {
        if dev_mode {
            NonceMode::Bypass
        } else {
            NonceMode::Cached
        }
    }
}

/// Produces nonces for one signing account
#[derive(Debug)]
pub struct NonceAllocator {
    address: Address,
    mode: NonceMode,
    /// Next nonce to use, `None` until seeded from the ledger
    next: Option<u64>,
}

impl NonceAllocator {
    pub fn new(address: Address, mode: NonceMode) -> Self {
        Self {
            address,
            mode,
            next: None,
        }
    }

    /// Nonce the next submission should use. Does not reserve it; call `advance` once the
    /// ledger has accepted a transaction at that nonce.
    pub async fn next_nonce(&mut self, ledger: &dyn Ledger) -> RelayerResult<u64> {
        match self.mode {
            NonceMode::Cached => self.cached_nonce(ledger).await,
            NonceMode::Bypass => self.live_nonce(ledger).await,
        }
    }

    async fn cached_nonce(&mut self, ledger: &dyn Ledger) -> RelayerResult<u64> {
        if let Some(nonce) = self.next {
            return Ok(nonce);
        }

        let nonce = ledger.pending_account_nonce(self.address).await?;
        debug!(
            "Seeded nonce cache for {:?} on chain {}: {}",
            self.address,
            ledger.chain_id(),
            nonce
        );
        self.next = Some(nonce);
        Ok(nonce)
    }

    async fn live_nonce(&self, ledger: &dyn Ledger) -> RelayerResult<u64> {
        let nonce = ledger.account_nonce(self.address).await?;
        if let Some(cached) = self.next {
            if cached != nonce {
                warn!(
                    "Ledger nonce {} differs from cached nonce {} for {:?}",
                    nonce, cached, self.address
                );
            }
        }
        Ok(nonce)
    }

    /// Record that `used` was accepted by the ledger
    pub fn advance(&mut self, used: u64) {
        self.next = Some(used + 1);
        debug!("Nonce cache for {:?} advanced to {}", self.address, used + 1);
    }

    /// Drop the cached value so the next allocation re-seeds from the ledger
    pub fn reset(&mut self) {
        self.next = None;
    }

    pub fn set_mode(&mut self, mode: NonceMode) {
        self.mode = mode;
    }

    pub fn mode(&self) -> NonceMode {
        self.mode
    }

    pub fn cached(&self) -> Option<u64> {
        self.next
    }
}
