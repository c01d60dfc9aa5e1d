//! Client meta-transaction request

use ethers::types::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};

/// A fee-less client's signed instruction for the relay to execute through the hub
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayTransactionRequest {
    /// Hex call data for the target contract, `0x` prefix optional
    pub encoded_function: String,
    #[serde(default)]
    pub approval_data: Bytes,
    pub signature: Bytes,
    pub from: Address,
    pub to: Address,
    pub gas_price: U256,
    pub gas_limit: U256,
    pub recipient_nonce: U256,
    /// Highest relay nonce the client accepts
    pub relay_max_nonce: U256,
    /// Relay fee offered, in percent
    pub relay_fee: U256,
    pub relay_hub_address: Address,
}
