//! Sponsor Relayer - meta-transaction relay core
//!
//! Validates fee-less clients' signed requests, submits them through the relay hub from
//! the relay's own account, and confirms or resends what it submitted.

pub mod api;
pub mod chain;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod metrics;
pub mod relay;
pub mod store;
pub mod tx;

#[cfg(test)]
mod tests;
