//! Shared test support: ledger and store mocks, a stateful fake ledger and request fixtures

mod lifecycle;

use crate::chain::{Ledger, TxReceipt};
use crate::error::RelayerResult;
use crate::store::{PendingTransaction, TxStore};
use crate::tx::SignedTransaction;

use async_trait::async_trait;
use ethers::types::{Address, H256, U256};
use mockall::mock;

mock! {
    pub Ledger {}

    #[async_trait]
    impl Ledger for Ledger {
        fn chain_id(&self) -> u64;
        async fn send_raw_transaction(&self, tx: &SignedTransaction) -> RelayerResult<H256>;
        async fn transaction_receipt(&self, hash: H256) -> RelayerResult<Option<TxReceipt>>;
        async fn account_nonce(&self, address: Address) -> RelayerResult<u64>;
        async fn pending_account_nonce(&self, address: Address) -> RelayerResult<u64>;
        async fn suggested_gas_price(&self) -> RelayerResult<U256>;
        async fn block_number(&self) -> RelayerResult<u64>;
    }
}

mock! {
    pub TxStore {}

    #[async_trait]
    impl TxStore for TxStore {
        async fn insert(&self, tx: PendingTransaction) -> RelayerResult<()>;
        async fn get_first(&self) -> RelayerResult<Option<PendingTransaction>>;
        async fn remove(&self, nonce: u64) -> RelayerResult<Option<PendingTransaction>>;
        async fn replace(&self, nonce: u64, tx: PendingTransaction) -> RelayerResult<()>;
        async fn clear(&self) -> RelayerResult<()>;
        async fn list(&self) -> RelayerResult<Vec<PendingTransaction>>;
        async fn len(&self) -> RelayerResult<usize>;
    }
}
