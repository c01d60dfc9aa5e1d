//! Relay module - turning client requests into relay-paid transactions
//!
//! This module provides:
//! - Request validation (hub, gas price, fee policy, nonce ceiling, signature)
//! - The coordinator that signs, submits and records relay transactions
//! - The engine that confirms or resends the oldest pending transaction

pub mod hub;
pub mod policy;
pub mod request;
mod resend;
mod server;
pub mod signature;

pub use policy::FeePolicy;
pub use request::RelayTransactionRequest;
pub use resend::UpdateOutcome;
pub use server::{RelayDeps, RelayServer};
pub use signature::{relay_request_hash, EthSignVerifier, SignatureVerifier};
