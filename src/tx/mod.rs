//! Transaction plumbing: gas accounting, nonce allocation and signing

pub mod gas;
pub mod nonce;
mod signer;

pub use gas::{calldata_gas, encoded_function_gas, scale_gas_price, GasPriceOracle};
pub use nonce::{NonceAllocator, NonceMode};
pub use signer::{RelaySigner, SignedTransaction, UnsignedTransaction};
