//! Profitability rules a request must satisfy before the relay pays for it

use super::request::RelayTransactionRequest;
use crate::config::RelayerConfig;
use crate::error::ValidationError;

use ethers::types::U256;

/// Minimum-fee profitability policy
///
/// The offered fee must reach the relay's fee and the request gas limit must at least
/// pay for carrying its own call data. Gas limit and gas price are also capped, which
/// keeps every later gas computation within `U256`.
#[derive(Debug, Clone)]
pub struct FeePolicy {
    min_fee_percent: u64,
    /// Gas the hub burns around the recipient call
    hub_overhead_gas: u64,
    max_gas_limit: U256,
    max_gas_price: U256,
}

impl FeePolicy {
    pub fn new(config: &RelayerConfig) -> Self {
        Self {
            min_fee_percent: config.fee_percent,
            hub_overhead_gas: config.hub_overhead_gas,
            max_gas_limit: U256::from(config.max_gas_limit),
            max_gas_price: U256::from(config.max_gas_price),
        }
    }

    pub fn check(
        &self,
        request: &RelayTransactionRequest,
        intrinsic_gas: u64,
    ) -> Result<(), ValidationError> {
        if request.gas_limit > self.max_gas_limit {
            return Err(ValidationError::GasLimitTooHigh {
                offered: request.gas_limit,
                max: self.max_gas_limit,
            });
        }
        if request.gas_price > self.max_gas_price {
            return Err(ValidationError::GasPriceTooHigh {
                offered: request.gas_price,
                max: self.max_gas_price,
            });
        }

        if request.relay_fee < U256::from(self.min_fee_percent) {
            return Err(ValidationError::Unprofitable {
                reason: format!(
                    "relay fee {}% is below the relay's {}%",
                    request.relay_fee, self.min_fee_percent
                ),
            });
        }

        if request.gas_limit < U256::from(intrinsic_gas) {
            return Err(ValidationError::Unprofitable {
                reason: format!(
                    "gas limit {} does not cover call data cost {}",
                    request.gas_limit, intrinsic_gas
                ),
            });
        }

        Ok(())
    }

    /// Gas limit of the relay's own transaction for this request
    pub fn relay_gas_limit(
        &self,
        request: &RelayTransactionRequest,
        intrinsic_gas: u64,
    ) -> Result<U256, ValidationError> {
        request
            .gas_limit
            .checked_add(U256::from(intrinsic_gas))
            .and_then(|gas| gas.checked_add(U256::from(self.hub_overhead_gas)))
            .ok_or(ValidationError::GasLimitTooHigh {
                offered: request.gas_limit,
                max: self.max_gas_limit,
            })
    }
}
