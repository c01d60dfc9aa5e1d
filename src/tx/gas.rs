//! Gas accounting: intrinsic call-data cost, relay gas price, resend escalation

use crate::chain::Ledger;
use crate::error::{RelayerResult, ValidationError};

use ethers::types::U256;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Gas charged per zero byte of call data
pub const ZERO_BYTE_GAS: u64 = 4;
/// Gas charged per non-zero byte of call data
pub const NON_ZERO_BYTE_GAS: u64 = 68;

/// Intrinsic gas the ledger charges for carrying `data` as call data
pub fn calldata_gas(data: &[u8]) -> u64 {
    data.iter()
        .map(|b| if *b == 0 { ZERO_BYTE_GAS } else { NON_ZERO_BYTE_GAS })
        .sum()
}

/// Intrinsic gas of a hex-encoded function call, with or without a `0x` prefix
pub fn encoded_function_gas(encoded_function: &str) -> Result<u64, ValidationError> {
    let bytes = decode_hex(encoded_function)?;
    Ok(calldata_gas(&bytes))
}

/// Decode hex call data, accepting an optional `0x`/`0X` prefix
pub fn decode_hex(encoded: &str) -> Result<Vec<u8>, ValidationError> {
    let stripped = encoded
        .strip_prefix("0x")
        .or_else(|| encoded.strip_prefix("0X"))
        .unwrap_or(encoded);
    hex::decode(stripped).map_err(|e| ValidationError::MalformedCallData(e.to_string()))
}

/// Scale a gas price by a percentage, rounding down and saturating at `U256::MAX`
pub fn scale_gas_price(price: U256, percent: u64) -> U256 {
    let percent = U256::from(percent);
    let hundred = U256::from(100u64);
    match price.checked_mul(percent) {
        Some(scaled) => scaled / hundred,
        None => (price / hundred).saturating_mul(percent),
    }
}

/// Caches the relay's minimum acceptable gas price
///
/// The cached value is the network's suggested price plus the relay markup. Zero means
/// the price has never been fetched and must not be used to validate requests.
pub struct GasPriceOracle {
    /// Markup percentage added to the network price (e.g., 10 = +10%)
    markup_percent: u64,
    cached: RwLock<U256>,
}

impl GasPriceOracle {
    pub fn new(markup_percent: u64) -> Self {
        Self {
            markup_percent,
            cached: RwLock::new(U256::zero()),
        }
    }

    /// Fetch the network price and store it with the relay markup applied
    pub async fn refresh(&self, ledger: &dyn Ledger) -> RelayerResult<U256> {
        let network_price = ledger.suggested_gas_price().await?;
        let price = scale_gas_price(network_price, 100 + self.markup_percent);

        let mut cached = self.cached.write().await;
        if *cached != price {
            info!(
                "Relay gas price updated: {} -> {} (network {})",
                *cached, price, network_price
            );
        } else {
            debug!("Relay gas price unchanged at {}", price);
        }
        *cached = price;

        crate::metrics::record_gas_price(price);
        Ok(price)
    }

    /// Last refreshed price, zero if never refreshed
    pub async fn current(&self) -> U256 {
        *self.cached.read().await
    }
}
