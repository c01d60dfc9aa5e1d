//! Relay signing key and raw transaction construction

use crate::error::{RelayerError, RelayerResult};

use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionRequest, H256, U256};
use ethers::utils::keccak256;
use serde::Serialize;
use tracing::info;

/// Fields of a ledger transaction before signing
#[derive(Debug, Clone, PartialEq)]
pub struct UnsignedTransaction {
    pub nonce: u64,
    pub to: Address,
    pub data: Bytes,
    pub gas_limit: U256,
    pub gas_price: U256,
}

/// A transaction signed by the relay, ready to broadcast
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedTransaction {
    pub hash: H256,
    pub nonce: u64,
    pub to: Address,
    pub data: Bytes,
    pub gas_limit: U256,
    pub gas_price: U256,
    /// RLP of the signed transaction
    pub raw: Bytes,
}

impl SignedTransaction {
    /// The unsigned fields, e.g. for re-signing at a new gas price
    pub fn unsigned(&self) -> UnsignedTransaction {
        UnsignedTransaction {
            nonce: self.nonce,
            to: self.to,
            data: self.data.clone(),
            gas_limit: self.gas_limit,
            gas_price: self.gas_price,
        }
    }
}

/// Holds the relay's private key. The key never leaves this type.
pub struct RelaySigner {
    wallet: LocalWallet,
}

impl RelaySigner {
    pub fn new(wallet: LocalWallet, chain_id: u64) -> Self {
        Self {
            wallet: wallet.with_chain_id(chain_id),
        }
    }

    /// Load the key from the named environment variable
    pub fn from_env(var: &str, chain_id: u64) -> RelayerResult<Self> {
        let key = std::env::var(var).map_err(|_| {
            RelayerError::Wallet(format!("No wallet configured. Set {} to the relay key", var))
        })?;
        let signer = Self::from_hex(&key, chain_id)?;
        info!("Relay signer loaded: {:?}", signer.address());
        Ok(signer)
    }

    pub fn from_hex(key: &str, chain_id: u64) -> RelayerResult<Self> {
        let wallet = key
            .trim_start_matches("0x")
            .parse::<LocalWallet>()
            .map_err(|e| RelayerError::Wallet(format!("Invalid private key: {}", e)))?;
        Ok(Self::new(wallet, chain_id))
    }

    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    pub fn chain_id(&self) -> u64 {
        self.wallet.chain_id()
    }

    /// Sign a legacy transaction and compute its hash
    pub async fn sign(&self, unsigned: UnsignedTransaction) -> RelayerResult<SignedTransaction> {
        let request = TransactionRequest::new()
            .from(self.address())
            .to(unsigned.to)
            .data(unsigned.data.clone())
            .nonce(unsigned.nonce)
            .gas(unsigned.gas_limit)
            .gas_price(unsigned.gas_price)
            .chain_id(self.chain_id());
        let typed = TypedTransaction::Legacy(request);

        let signature = self
            .wallet
            .sign_transaction(&typed)
            .await
            .map_err(|e| RelayerError::Wallet(e.to_string()))?;
        let raw = typed.rlp_signed(&signature);
        let hash = H256::from(keccak256(&raw));

        Ok(SignedTransaction {
            hash,
            nonce: unsigned.nonce,
            to: unsigned.to,
            data: unsigned.data,
            gas_limit: unsigned.gas_limit,
            gas_price: unsigned.gas_price,
            raw,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GANACHE_KEY_0: &str = "4f3edf983ac636a65a842ce7c78d9aa706d3b113bce9c46f30d7d21715b23b1d";

    fn unsigned(nonce: u64, gas_price: u64) -> UnsignedTransaction {
        UnsignedTransaction {
            nonce,
            to: Address::repeat_byte(0x42),
            data: Bytes::from(vec![0x2a, 0xc0, 0xdf, 0x26]),
            gas_limit: U256::from(1_121_488u64),
            gas_price: U256::from(gas_price),
        }
    }

    #[test]
    fn test_address_from_key() {
        let signer = RelaySigner::from_hex(GANACHE_KEY_0, 1337).unwrap();
        let expected: Address = "0x90f8bf6a479f320ead074411a4b0e7944ea8c9c1".parse().unwrap();
        assert_eq!(signer.address(), expected);
        assert_eq!(signer.chain_id(), 1337);
    }

    #[test]
    fn test_invalid_key_rejected() {
        assert!(matches!(
            RelaySigner::from_hex("not-a-key", 1),
            Err(RelayerError::Wallet(_))
        ));
    }

    #[tokio::test]
    async fn test_hash_is_keccak_of_raw() {
        let signer = RelaySigner::from_hex(GANACHE_KEY_0, 1337).unwrap();
        let signed = signer.sign(unsigned(5, 2000)).await.unwrap();

        assert_eq!(signed.hash, H256::from(keccak256(&signed.raw)));
        assert_eq!(signed.nonce, 5);
        assert_eq!(signed.unsigned(), unsigned(5, 2000));
    }

    #[tokio::test]
    async fn test_resign_at_new_price_changes_hash_not_nonce() {
        let signer = RelaySigner::from_hex(GANACHE_KEY_0, 1337).unwrap();
        let original = signer.sign(unsigned(5, 2000)).await.unwrap();

        let mut bumped = original.unsigned();
        bumped.gas_price = U256::from(2400);
        let resigned = signer.sign(bumped).await.unwrap();

        assert_ne!(original.hash, resigned.hash);
        assert_eq!(original.nonce, resigned.nonce);
        assert_eq!(resigned.gas_price, U256::from(2400));
    }
}
