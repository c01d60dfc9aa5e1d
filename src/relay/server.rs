//! Relay transaction coordinator
//!
//! Owns the relay account context: signing key, nonce cache, gas price cache and the
//! pending transaction store. Nonce allocation and store mutation share one lock, so
//! concurrent requests receive distinct, gap-free nonces and the store only ever sees
//! inserts in nonce order.

use super::hub::encode_relay_call;
use super::policy::FeePolicy;
use super::request::RelayTransactionRequest;
use super::signature::SignatureVerifier;
use crate::chain::Ledger;
use crate::clock::Clock;
use crate::config::RelayerConfig;
use crate::error::{RelayerError, RelayerResult, ValidationError};
use crate::store::{PendingTransaction, TxStore};
use crate::tx::{
    encoded_function_gas, GasPriceOracle, NonceAllocator, NonceMode, RelaySigner,
    SignedTransaction, UnsignedTransaction,
};

use ethers::types::{Address, U256};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// External collaborators the relay talks to
pub struct RelayDeps {
    pub ledger: Arc<dyn Ledger>,
    pub store: Arc<dyn TxStore>,
    pub clock: Arc<dyn Clock>,
    pub verifier: Arc<dyn SignatureVerifier>,
}

/// Sponsors client requests with the relay's own funded account
pub struct RelayServer {
    pub(super) ledger: Arc<dyn Ledger>,
    pub(super) store: Arc<dyn TxStore>,
    pub(super) clock: Arc<dyn Clock>,
    verifier: Arc<dyn SignatureVerifier>,
    pub(super) signer: RelaySigner,
    gas_price: GasPriceOracle,
    fee_policy: FeePolicy,
    /// Nonce allocation and store mutation happen under this lock
    pub(super) nonces: Mutex<NonceAllocator>,
    relay_hub: Address,
    pub(super) config: RelayerConfig,
}

impl RelayServer {
    pub fn new(
        config: RelayerConfig,
        relay_hub: Address,
        signer: RelaySigner,
        deps: RelayDeps,
    ) -> Self {
        let nonces = NonceAllocator::new(
            signer.address(),
            NonceMode::from_dev_mode(config.dev_mode),
        );

        info!(
            "Relay {:?} serving hub {:?} on chain {}",
            signer.address(),
            relay_hub,
            signer.chain_id()
        );

        Self {
            ledger: deps.ledger,
            store: deps.store,
            clock: deps.clock,
            verifier: deps.verifier,
            signer,
            gas_price: GasPriceOracle::new(config.gas_price_markup_percent),
            fee_policy: FeePolicy::new(&config),
            nonces: Mutex::new(nonces),
            relay_hub,
            config,
        }
    }

    /// Validate a client request, then sign and submit the hub call that executes it
    pub async fn create_relay_transaction(
        &self,
        request: RelayTransactionRequest,
    ) -> RelayerResult<SignedTransaction> {
        let result = self.relay(&request).await;
        match &result {
            Ok(_) => crate::metrics::record_relay_request("relayed"),
            Err(e) => {
                warn!(
                    "Relay request from {:?} (recipient nonce {}) rejected: {}",
                    request.from, request.recipient_nonce, e
                );
                crate::metrics::record_relay_request(e.kind());
            }
        }
        result
    }

    async fn relay(&self, request: &RelayTransactionRequest) -> RelayerResult<SignedTransaction> {
        if request.relay_hub_address != self.relay_hub {
            return Err(ValidationError::WrongRelayHub {
                requested: format!("{:?}", request.relay_hub_address),
                expected: format!("{:?}", self.relay_hub),
            }
            .into());
        }

        let minimum = self.gas_price.current().await;
        if minimum.is_zero() {
            return Err(ValidationError::GasPriceUnavailable.into());
        }
        if request.gas_price < minimum {
            return Err(ValidationError::Underpriced {
                offered: request.gas_price,
                minimum,
            }
            .into());
        }

        let intrinsic_gas = encoded_function_gas(&request.encoded_function)?;
        self.fee_policy.check(request, intrinsic_gas)?;
        let call = encode_relay_call(request)?;
        let gas_limit = self.fee_policy.relay_gas_limit(request, intrinsic_gas)?;

        let mut nonces = self.nonces.lock().await;
        let nonce = self
            .bounded("fetch relay nonce", nonces.next_nonce(self.ledger.as_ref()))
            .await?;
        if U256::from(nonce) > request.relay_max_nonce {
            return Err(ValidationError::NonceCeilingExceeded {
                nonce,
                max: request.relay_max_nonce,
            }
            .into());
        }

        self.verifier.verify(request, self.signer.address())?;

        let signed = self
            .signer
            .sign(UnsignedTransaction {
                nonce,
                to: self.relay_hub,
                data: call,
                gas_limit,
                gas_price: request.gas_price,
            })
            .await?;

        self.submit(&signed).await?;
        nonces.advance(nonce);

        // The transaction is live from here on, so the caller always gets it back
        if let Err(e) = self
            .track(PendingTransaction::new(&signed, self.clock.now()))
            .await
        {
            error!(
                "Tx {:?} at nonce {} was broadcast but could not be tracked, it will not be resent: {}",
                signed.hash, nonce, e
            );
        }

        info!(
            "Relayed request from {:?} to {:?}: tx {:?} nonce {} gas price {}",
            request.from, request.to, signed.hash, signed.nonce, signed.gas_price
        );
        crate::metrics::record_tx_submitted();
        Ok(signed)
    }

    /// Broadcast, mapping every failure to a submission error for this nonce
    pub(super) async fn submit(&self, tx: &SignedTransaction) -> RelayerResult<()> {
        let result = self
            .bounded(
                "send transaction",
                self.ledger.send_raw_transaction(tx),
            )
            .await;

        match result {
            Ok(hash) => {
                if hash != tx.hash {
                    warn!(
                        "Ledger reported hash {:?} for tx {:?} at nonce {}",
                        hash, tx.hash, tx.nonce
                    );
                }
                Ok(())
            }
            Err(e) => Err(RelayerError::Submission {
                nonce: tx.nonce,
                message: e.to_string(),
            }),
        }
    }

    /// Record an accepted transaction. A leftover entry at the same nonce belongs to a
    /// transaction the ledger no longer has, so the new one replaces it.
    async fn track(&self, pending: PendingTransaction) -> RelayerResult<()> {
        let nonce = pending.nonce;
        match self.store.insert(pending.clone()).await {
            Err(RelayerError::DuplicateNonce { .. }) => {
                warn!("Replacing stale pending entry at nonce {}", nonce);
                self.store.replace(nonce, pending).await
            }
            other => other,
        }?;

        crate::metrics::record_pending(self.store.len().await?);
        Ok(())
    }

    /// Run a ledger call under the configured RPC timeout
    pub(super) async fn bounded<T, F>(&self, operation: &str, call: F) -> RelayerResult<T>
    where
        F: Future<Output = RelayerResult<T>>,
    {
        match timeout(self.config.rpc_timeout(), call).await {
            Ok(result) => result,
            Err(_) => Err(RelayerError::Timeout {
                operation: operation.to_string(),
            }),
        }
    }

    /// Refresh the relay's minimum gas price from the ledger
    pub async fn refresh_gas_price(&self) -> RelayerResult<U256> {
        self.bounded(
            "fetch gas price",
            self.gas_price.refresh(self.ledger.as_ref()),
        )
        .await
    }

    /// Minimum gas price a request must offer, zero before the first refresh
    pub async fn gas_price(&self) -> U256 {
        self.gas_price.current().await
    }

    /// Toggle nonce cache bypass
    pub async fn set_dev_mode(&self, enabled: bool) {
        let mut nonces = self.nonces.lock().await;
        nonces.set_mode(NonceMode::from_dev_mode(enabled));
        if enabled {
            warn!("Dev mode enabled: relay nonce will be read from the ledger on every request");
        } else {
            debug!("Dev mode disabled");
        }
    }

    pub async fn dev_mode(&self) -> bool {
        self.nonces.lock().await.mode() == NonceMode::Bypass
    }

    /// Drop every pending entry and forget the cached nonce
    pub async fn clear_pending(&self) -> RelayerResult<()> {
        let mut nonces = self.nonces.lock().await;
        self.store.clear().await?;
        nonces.reset();
        crate::metrics::record_pending(0);
        info!("Pending transaction store cleared");
        Ok(())
    }

    /// Oldest outstanding transaction
    pub async fn first_pending(&self) -> RelayerResult<Option<PendingTransaction>> {
        self.store.get_first().await
    }

    pub async fn pending(&self) -> RelayerResult<Vec<PendingTransaction>> {
        self.store.list().await
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn relay_hub(&self) -> Address {
        self.relay_hub
    }

    pub fn chain_id(&self) -> u64 {
        self.signer.chain_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::fixtures::{self, TestRelay};
    use crate::tests::MockTxStore;
    use ethers::types::Bytes;
    use futures::future::join_all;

    #[tokio::test]
    async fn test_relay_before_gas_price_refresh_rejected() {
        let relay = TestRelay::new();
        let request = relay.request(0).await;

        let err = relay.server.create_relay_transaction(request).await.unwrap_err();
        assert!(matches!(
            err,
            RelayerError::Validation(ValidationError::GasPriceUnavailable)
        ));
        assert!(relay.ledger.sent().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_applies_markup() {
        let relay = TestRelay::new();
        assert!(relay.server.gas_price().await.is_zero());
        relay.server.refresh_gas_price().await.unwrap();
        assert_eq!(relay.server.gas_price().await, U256::from(1100));
    }

    #[tokio::test]
    async fn test_relay_submits_and_tracks() {
        let relay = TestRelay::ready().await;
        let base = relay.ledger.account_nonce_now();
        let request = relay.request(0).await;

        let tx = relay.server.create_relay_transaction(request).await.unwrap();

        assert_eq!(tx.nonce, base);
        assert_eq!(tx.gas_price, U256::from(2000));
        assert_eq!(tx.to, fixtures::relay_hub());
        let first = relay.server.first_pending().await.unwrap().unwrap();
        assert_eq!(first.hash, tx.hash);
        assert_eq!(first.submitted_at, relay.clock.now());
        assert!(relay.ledger.receipt_now(tx.hash).is_some());
    }

    #[tokio::test]
    async fn test_underpriced_request_rejected() {
        let relay = TestRelay::ready().await;
        let mut request = fixtures::unsigned_request(0);
        request.gas_price = U256::from(1099);
        let request = fixtures::sign(request, relay.server.address()).await;

        let err = relay.server.create_relay_transaction(request).await.unwrap_err();
        assert!(matches!(
            err,
            RelayerError::Validation(ValidationError::Underpriced { .. })
        ));
        assert!(relay.server.first_pending().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unprofitable_request_rejected() {
        let relay = TestRelay::ready().await;
        let mut request = fixtures::unsigned_request(0);
        request.relay_fee = U256::from(5);
        let request = fixtures::sign(request, relay.server.address()).await;

        let err = relay.server.create_relay_transaction(request).await.unwrap_err();
        assert!(matches!(
            err,
            RelayerError::Validation(ValidationError::Unprofitable { .. })
        ));
    }

    #[tokio::test]
    async fn test_nonce_ceiling_enforced() {
        let relay = TestRelay::ready().await;
        relay.ledger.set_account_nonce(5);
        let mut request = fixtures::unsigned_request(0);
        request.relay_max_nonce = U256::from(4);
        let request = fixtures::sign(request, relay.server.address()).await;

        let err = relay.server.create_relay_transaction(request).await.unwrap_err();
        assert!(matches!(
            err,
            RelayerError::Validation(ValidationError::NonceCeilingExceeded { nonce: 5, .. })
        ));
        assert!(relay.ledger.sent().is_empty());
    }

    #[tokio::test]
    async fn test_bad_signature_rejected() {
        let relay = TestRelay::ready().await;
        let mut request = relay.request(0).await;
        request.signature = Bytes::from(vec![0u8; 65]);

        let err = relay.server.create_relay_transaction(request).await.unwrap_err();
        assert!(matches!(
            err,
            RelayerError::Validation(ValidationError::BadSignature(_))
        ));
        assert!(relay.ledger.sent().is_empty());
    }

    #[tokio::test]
    async fn test_wrong_hub_rejected() {
        let relay = TestRelay::ready().await;
        let mut request = fixtures::unsigned_request(0);
        request.relay_hub_address = Address::repeat_byte(0x77);
        let request = fixtures::sign(request, relay.server.address()).await;

        let err = relay.server.create_relay_transaction(request).await.unwrap_err();
        assert!(matches!(
            err,
            RelayerError::Validation(ValidationError::WrongRelayHub { .. })
        ));
    }

    #[tokio::test]
    async fn test_failed_submission_does_not_consume_nonce() {
        let relay = TestRelay::ready().await;
        let base = relay.ledger.account_nonce_now();
        relay.ledger.fail_next_send("insufficient funds for gas * price + value");

        let err = relay
            .server
            .create_relay_transaction(relay.request(0).await)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayerError::Submission { nonce, .. } if nonce == base));
        assert!(relay.server.first_pending().await.unwrap().is_none());

        let retried = relay
            .server
            .create_relay_transaction(relay.request(0).await)
            .await
            .unwrap();
        assert_eq!(retried.nonce, base);
    }

    #[tokio::test]
    async fn test_concurrent_requests_get_consecutive_nonces() {
        let relay = Arc::new(TestRelay::ready().await);
        let base = relay.ledger.account_nonce_now();

        let mut requests = Vec::new();
        for recipient_nonce in 0..10 {
            requests.push(relay.request(recipient_nonce).await);
        }

        let results = join_all(requests.into_iter().map(|request| {
            let relay = relay.clone();
            tokio::spawn(async move { relay.server.create_relay_transaction(request).await })
        }))
        .await;

        let mut nonces: Vec<u64> = results
            .into_iter()
            .map(|joined| joined.unwrap().unwrap().nonce)
            .collect();
        nonces.sort_unstable();
        assert_eq!(nonces, (base..base + 10).collect::<Vec<_>>());

        let stored: Vec<u64> = relay
            .server
            .pending()
            .await
            .unwrap()
            .iter()
            .map(|tx| tx.nonce)
            .collect();
        assert_eq!(stored, nonces);
    }

    #[tokio::test]
    async fn test_oversized_gas_limit_rejected_before_signing() {
        let relay = TestRelay::ready().await;
        let mut request = fixtures::unsigned_request(0);
        request.gas_limit = U256::MAX;
        let request = fixtures::sign(request, relay.server.address()).await;

        let err = relay.server.create_relay_transaction(request).await.unwrap_err();
        assert!(matches!(
            err,
            RelayerError::Validation(ValidationError::GasLimitTooHigh { .. })
        ));
        assert!(relay.ledger.sent().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_gas_price_rejected() {
        let relay = TestRelay::ready().await;
        let mut request = fixtures::unsigned_request(0);
        request.gas_price = U256::MAX;
        let request = fixtures::sign(request, relay.server.address()).await;

        let err = relay.server.create_relay_transaction(request).await.unwrap_err();
        assert!(matches!(
            err,
            RelayerError::Validation(ValidationError::GasPriceTooHigh { .. })
        ));
    }

    #[tokio::test]
    async fn test_store_failure_after_broadcast_still_returns_transaction() {
        let mut store = MockTxStore::new();
        store.expect_insert().returning(|_| {
            Err(RelayerError::Internal("connection reset".to_string()))
        });
        store.expect_replace().never();
        let relay = TestRelay::with_store(Arc::new(store)).await;
        let base = relay.ledger.account_nonce_now();

        let tx = relay
            .server
            .create_relay_transaction(relay.request(0).await)
            .await
            .unwrap();
        assert_eq!(tx.nonce, base);
        assert!(relay.ledger.receipt_now(tx.hash).is_some());

        // The nonce cache moved past the broadcast nonce
        let next = relay
            .server
            .create_relay_transaction(relay.request(1).await)
            .await
            .unwrap();
        assert_eq!(next.nonce, base + 1);
    }

    #[tokio::test]
    async fn test_dev_mode_defaults_off_and_toggles() {
        let relay = TestRelay::new();
        assert!(!relay.server.dev_mode().await);
        relay.server.set_dev_mode(true).await;
        assert!(relay.server.dev_mode().await);
    }
}
