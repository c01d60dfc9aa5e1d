//! Error types for the sponsor relayer

use ethers::types::U256;
use thiserror::Error;

/// Reasons a relay request is rejected before anything is signed or submitted
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Relay gas price is not known yet, refresh it before relaying")]
    GasPriceUnavailable,

    #[error("Gas price {offered} is below the relay minimum of {minimum}")]
    Underpriced { offered: U256, minimum: U256 },

    #[error("Gas limit {offered} exceeds the relay maximum of {max}")]
    GasLimitTooHigh { offered: U256, max: U256 },

    #[error("Gas price {offered} exceeds the relay maximum of {max}")]
    GasPriceTooHigh { offered: U256, max: U256 },

    #[error("Request is not profitable: {reason}")]
    Unprofitable { reason: String },

    #[error("Relay nonce {nonce} exceeds the request ceiling of {max}")]
    NonceCeilingExceeded { nonce: u64, max: U256 },

    #[error("Signature does not match sender: {0}")]
    BadSignature(String),

    #[error("Request targets relay hub {requested}, this relay serves {expected}")]
    WrongRelayHub { requested: String, expected: String },

    #[error("Malformed call data: {0}")]
    MalformedCallData(String),
}

/// Main error type for the relayer
#[derive(Error, Debug)]
pub enum RelayerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Chain connection error for chain {chain_id}: {message}")]
    ChainConnection { chain_id: u64, message: String },

    #[error("Invalid relay request: {0}")]
    Validation(#[from] ValidationError),

    #[error("Submission of nonce {nonce} failed: {message}")]
    Submission { nonce: u64, message: String },

    #[error("Confirmation query for nonce {nonce} failed: {message}")]
    ConfirmationQuery { nonce: u64, message: String },

    #[error("Nonce error for chain {chain_id}: {message}")]
    Nonce { chain_id: u64, message: String },

    #[error("Gas price error: {0}")]
    GasPrice(String),

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Pending transaction with nonce {nonce} already exists")]
    DuplicateNonce { nonce: u64 },

    #[error("No pending transaction with nonce {nonce}")]
    PendingNotFound { nonce: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayerError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RelayerError::ChainConnection { .. }
                | RelayerError::Timeout { .. }
                | RelayerError::ConfirmationQuery { .. }
                | RelayerError::Submission { .. }
        )
    }

    /// Whether the request was rejected before reaching the ledger
    pub fn is_validation(&self) -> bool {
        matches!(self, RelayerError::Validation(_))
    }

    /// Short label used for metrics and API responses
    pub fn kind(&self) -> &'static str {
        match self {
            RelayerError::Validation(_) => "validation",
            RelayerError::Submission { .. } => "submission",
            RelayerError::ConfirmationQuery { .. } => "confirmation_query",
            RelayerError::Timeout { .. } => "timeout",
            RelayerError::Nonce { .. } => "nonce",
            RelayerError::GasPrice(_) => "gas_price",
            RelayerError::ChainConnection { .. } => "chain_connection",
            RelayerError::Database(_)
            | RelayerError::DuplicateNonce { .. }
            | RelayerError::PendingNotFound { .. } => "store",
            RelayerError::Config(_) | RelayerError::Wallet(_) | RelayerError::Internal(_) => {
                "internal"
            }
        }
    }
}

/// Result type for relayer operations
pub type RelayerResult<T> = Result<T, RelayerError>;
