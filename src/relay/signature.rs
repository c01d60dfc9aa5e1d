//! Client signature checks over relay requests
//!
//! The signed digest is `keccak256("rlx:" ‖ from ‖ to ‖ call data ‖ fee ‖ gas price ‖
//! gas limit ‖ recipient nonce ‖ hub ‖ relay)`, tightly packed, and the client signs it
//! with the `\x19Ethereum Signed Message:\n32` prefix.

use super::request::RelayTransactionRequest;
use crate::error::ValidationError;
use crate::tx::gas::decode_hex;

use ethers::types::{Address, Signature, H256, U256};
use ethers::utils::{hash_message, keccak256};

const RELAY_PREFIX: &[u8] = b"rlx:";

/// Checks that a request was signed by its `from` account
pub trait SignatureVerifier: Send + Sync {
    fn verify(
        &self,
        request: &RelayTransactionRequest,
        relay: Address,
    ) -> Result<(), ValidationError>;
}

/// Digest the client signs for a request addressed to `relay`
pub fn relay_request_hash(
    request: &RelayTransactionRequest,
    relay: Address,
) -> Result<H256, ValidationError> {
    let call_data = decode_hex(&request.encoded_function)?;

    let mut packed = Vec::with_capacity(RELAY_PREFIX.len() + 4 * 20 + call_data.len() + 4 * 32);
    packed.extend_from_slice(RELAY_PREFIX);
    packed.extend_from_slice(request.from.as_bytes());
    packed.extend_from_slice(request.to.as_bytes());
    packed.extend_from_slice(&call_data);
    for word in [
        request.relay_fee,
        request.gas_price,
        request.gas_limit,
        request.recipient_nonce,
    ] {
        packed.extend_from_slice(&uint256_bytes(word));
    }
    packed.extend_from_slice(request.relay_hub_address.as_bytes());
    packed.extend_from_slice(relay.as_bytes());

    Ok(H256::from(keccak256(packed)))
}

fn uint256_bytes(value: U256) -> [u8; 32] {
    let mut word = [0u8; 32];
    value.to_big_endian(&mut word);
    word
}

/// Recovers the signer of the prefixed request digest
#[derive(Debug, Default, Clone, Copy)]
pub struct EthSignVerifier;

impl SignatureVerifier for EthSignVerifier {
    fn verify(
        &self,
        request: &RelayTransactionRequest,
        relay: Address,
    ) -> Result<(), ValidationError> {
        let digest = relay_request_hash(request, relay)?;
        let signature = Signature::try_from(request.signature.as_ref())
            .map_err(|e| ValidationError::BadSignature(e.to_string()))?;
        let signer = signature
            .recover(hash_message(digest))
            .map_err(|e| ValidationError::BadSignature(e.to_string()))?;

        if signer != request.from {
            return Err(ValidationError::BadSignature(format!(
                "recovered {:?}, expected {:?}",
                signer, request.from
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::fixtures;
    use ethers::types::Bytes;

    #[tokio::test]
    async fn test_valid_signature_accepted() {
        let request = fixtures::signed_request(0, fixtures::relay_address()).await;
        assert!(EthSignVerifier
            .verify(&request, fixtures::relay_address())
            .is_ok());
    }

    #[tokio::test]
    async fn test_signature_bound_to_relay_address() {
        let request = fixtures::signed_request(0, fixtures::relay_address()).await;
        let other_relay = Address::repeat_byte(0x99);
        assert!(matches!(
            EthSignVerifier.verify(&request, other_relay),
            Err(ValidationError::BadSignature(_))
        ));
    }

    #[tokio::test]
    async fn test_tampered_field_rejected() {
        let mut request = fixtures::signed_request(0, fixtures::relay_address()).await;
        request.gas_limit = request.gas_limit + U256::one();
        assert!(EthSignVerifier
            .verify(&request, fixtures::relay_address())
            .is_err());
    }

    #[test]
    fn test_garbage_signature_rejected() {
        let mut request = fixtures::unsigned_request(0);
        request.signature = Bytes::from(vec![1, 2, 3]);
        assert!(matches!(
            EthSignVerifier.verify(&request, fixtures::relay_address()),
            Err(ValidationError::BadSignature(_))
        ));
    }

    #[test]
    fn test_prefixed_and_bare_call_data_hash_the_same() {
        let mut bare = fixtures::unsigned_request(0);
        bare.encoded_function = bare.encoded_function.trim_start_matches("0x").to_string();
        let prefixed = fixtures::unsigned_request(0);

        assert_eq!(
            relay_request_hash(&bare, fixtures::relay_address()).unwrap(),
            relay_request_hash(&prefixed, fixtures::relay_address()).unwrap()
        );
    }
}
