//! Relay hub call encoding

use super::request::RelayTransactionRequest;
use crate::error::ValidationError;
use crate::tx::gas::decode_hex;

use ethers::abi::{encode, Token};
use ethers::types::Bytes;
use ethers::utils::id;

/// Hub entry point every relayed transaction calls
pub const RELAY_CALL_SIGNATURE: &str =
    "relayCall(address,address,bytes,uint256,uint256,uint256,uint256,bytes,bytes)";

/// ABI-encode `relayCall` carrying the client's request
pub fn encode_relay_call(request: &RelayTransactionRequest) -> Result<Bytes, ValidationError> {
    let call_data = decode_hex(&request.encoded_function)?;

    let mut data = id(RELAY_CALL_SIGNATURE).to_vec();
    data.extend(encode(&[
        Token::Address(request.from),
        Token::Address(request.to),
        Token::Bytes(call_data),
        Token::Uint(request.relay_fee),
        Token::Uint(request.gas_price),
        Token::Uint(request.gas_limit),
        Token::Uint(request.recipient_nonce),
        Token::Bytes(request.signature.to_vec()),
        Token::Bytes(request.approval_data.to_vec()),
    ]));

    Ok(Bytes::from(data))
}
