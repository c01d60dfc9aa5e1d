//! Relay hub and recipient log decoding
//!
//! A relayed call emits, in order: the recipient's pre-call hook, whatever the recipient
//! itself logs, the recipient's post-call hook, and finally the hub's
//! `TransactionRelayed` settlement log.

use crate::error::{RelayerError, RelayerResult};

use ethers::abi::{decode, ParamType, Token};
use ethers::types::{Address, Log, H256, U256};
use ethers::utils::keccak256;
use lazy_static::lazy_static;
use serde::Serialize;

pub const TRANSACTION_RELAYED_SIGNATURE: &str =
    "TransactionRelayed(address,address,address,bytes4,uint8,uint256)";
pub const RECIPIENT_PRE_CALL_SIGNATURE: &str = "SampleRecipientPreCall()";
pub const RECIPIENT_EMITTED_SIGNATURE: &str =
    "SampleRecipientEmitted(string,address,address,address)";
pub const RECIPIENT_POST_CALL_SIGNATURE: &str = "SampleRecipientPostCall(bool,uint256,bytes32)";

/// Event topic signatures (keccak256 of event signature)
pub mod topics {
    use super::*;

    lazy_static! {
        pub static ref TRANSACTION_RELAYED: H256 =
            H256::from(keccak256(TRANSACTION_RELAYED_SIGNATURE));
        pub static ref RECIPIENT_PRE_CALL: H256 =
            H256::from(keccak256(RECIPIENT_PRE_CALL_SIGNATURE));
        pub static ref RECIPIENT_EMITTED: H256 =
            H256::from(keccak256(RECIPIENT_EMITTED_SIGNATURE));
        pub static ref RECIPIENT_POST_CALL: H256 =
            H256::from(keccak256(RECIPIENT_POST_CALL_SIGNATURE));
    }
}

/// Outcome the hub reports for the inner call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RelayCallStatus {
    Ok,
    RelayedCallFailed,
    PreRelayedFailed,
    PostRelayedFailed,
    RecipientBalanceChanged,
    Unrecognized(u8),
}

impl RelayCallStatus {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => RelayCallStatus::Ok,
            1 => RelayCallStatus::RelayedCallFailed,
            2 => RelayCallStatus::PreRelayedFailed,
            3 => RelayCallStatus::PostRelayedFailed,
            4 => RelayCallStatus::RecipientBalanceChanged,
            other => RelayCallStatus::Unrecognized(other),
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            RelayCallStatus::Ok => 0,
            RelayCallStatus::RelayedCallFailed => 1,
            RelayCallStatus::PreRelayedFailed => 2,
            RelayCallStatus::PostRelayedFailed => 3,
            RelayCallStatus::RecipientBalanceChanged => 4,
            RelayCallStatus::Unrecognized(code) => *code,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, RelayCallStatus::Ok)
    }
}

/// Hub settlement log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionRelayed {
    pub relay: Address,
    pub from: Address,
    pub to: Address,
    pub selector: [u8; 4],
    pub status: RelayCallStatus,
    pub charge: U256,
}

/// Logs a relayed transaction's receipt may carry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RelayEvent {
    RecipientPreCall {
        recipient: Address,
    },
    RecipientEmitted {
        recipient: Address,
        message: String,
        real_sender: Address,
        msg_sender: Address,
        origin: Address,
    },
    RecipientPostCall {
        recipient: Address,
        success: bool,
        actual_charge: U256,
    },
    TransactionRelayed(TransactionRelayed),
    Unknown {
        address: Address,
        topic: H256,
    },
}

impl RelayEvent {
    /// Get event name for assertions and logging
    pub fn name(&self) -> &'static str {
        match self {
            RelayEvent::RecipientPreCall { .. } => "recipient_pre_call",
            RelayEvent::RecipientEmitted { .. } => "recipient_emitted",
            RelayEvent::RecipientPostCall { .. } => "recipient_post_call",
            RelayEvent::TransactionRelayed(_) => "transaction_relayed",
            RelayEvent::Unknown { .. } => "unknown",
        }
    }
}

/// Decode one receipt log
pub fn parse_log(log: &Log) -> RelayerResult<RelayEvent> {
    let topic = log.topics.first().copied().unwrap_or_default();

    if topic == *topics::TRANSACTION_RELAYED {
        return parse_transaction_relayed(log).map(RelayEvent::TransactionRelayed);
    }

    if topic == *topics::RECIPIENT_PRE_CALL {
        return Ok(RelayEvent::RecipientPreCall {
            recipient: log.address,
        });
    }

    if topic == *topics::RECIPIENT_EMITTED {
        let tokens = decode_data(
            log,
            &[
                ParamType::String,
                ParamType::Address,
                ParamType::Address,
                ParamType::Address,
            ],
        )?;
        return match tokens.as_slice() {
            [Token::String(message), Token::Address(real_sender), Token::Address(msg_sender), Token::Address(origin)] => {
                Ok(RelayEvent::RecipientEmitted {
                    recipient: log.address,
                    message: message.clone(),
                    real_sender: *real_sender,
                    msg_sender: *msg_sender,
                    origin: *origin,
                })
            }
            _ => Err(malformed("SampleRecipientEmitted")),
        };
    }

    if topic == *topics::RECIPIENT_POST_CALL {
        let tokens = decode_data(
            log,
            &[ParamType::Bool, ParamType::Uint(256), ParamType::FixedBytes(32)],
        )?;
        return match tokens.as_slice() {
            [Token::Bool(success), Token::Uint(actual_charge), Token::FixedBytes(_)] => {
                Ok(RelayEvent::RecipientPostCall {
                    recipient: log.address,
                    success: *success,
                    actual_charge: *actual_charge,
                })
            }
            _ => Err(malformed("SampleRecipientPostCall")),
        };
    }

    Ok(RelayEvent::Unknown {
        address: log.address,
        topic,
    })
}

/// Decode every log in order
pub fn parse_logs(logs: &[Log]) -> RelayerResult<Vec<RelayEvent>> {
    logs.iter().map(parse_log).collect()
}

/// The hub settlement entry among a receipt's logs, if any decodes
pub fn find_transaction_relayed(logs: &[Log]) -> Option<TransactionRelayed> {
    logs.iter()
        .filter(|log| log.topics.first() == Some(&*topics::TRANSACTION_RELAYED))
        .find_map(|log| parse_transaction_relayed(log).ok())
}

fn parse_transaction_relayed(log: &Log) -> RelayerResult<TransactionRelayed> {
    // relay, from and to are indexed
    let indexed = |i: usize| {
        log.topics
            .get(i)
            .map(|t| Address::from_slice(&t.0[12..32]))
            .ok_or_else(|| malformed("TransactionRelayed"))
    };

    let tokens = decode_data(
        log,
        &[ParamType::FixedBytes(4), ParamType::Uint(8), ParamType::Uint(256)],
    )?;
    match tokens.as_slice() {
        [Token::FixedBytes(selector), Token::Uint(status), Token::Uint(charge)]
            if selector.len() == 4 =>
        {
            let mut sel = [0u8; 4];
            sel.copy_from_slice(selector);
            Ok(TransactionRelayed {
                relay: indexed(1)?,
                from: indexed(2)?,
                to: indexed(3)?,
                selector: sel,
                status: RelayCallStatus::from_code(status.low_u32() as u8),
                charge: *charge,
            })
        }
        _ => Err(malformed("TransactionRelayed")),
    }
}

fn decode_data(log: &Log, params: &[ParamType]) -> RelayerResult<Vec<Token>> {
    decode(params, &log.data).map_err(|e| {
        RelayerError::Internal(format!(
            "Undecodable log data from {:?}: {}",
            log.address, e
        ))
    })
}

fn malformed(event: &str) -> RelayerError {
    RelayerError::Internal(format!("Malformed {} log", event))
}
