use ed25519_dalek::{Keypair, PublicKey, Signature, Signer, Verifier};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::crypto::account_id_from_public_key;
use crate::errors::{ChainError, ChainResult};

use super::AccountId;

/// Transfer payload. The sender is deliberately absent: it is derived from
/// the key that signed the envelope, never trusted from the wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tx {
    pub chain_id: u16,
    pub nonce: u64,
    pub to_id: AccountId,
    pub value: u64,
    pub tip: u64,
    #[serde(default)]
    pub data: Vec<u8>,
    pub gas_price: u64,
    pub gas_units: u64,
}

impl Tx {
    pub fn canonical_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("serializing transaction")
    }

    pub fn hash(&self) -> String {
        hex::encode(Sha256::digest(self.canonical_bytes()))
    }
}

/// A signed transaction as it travels between mempools and into blocks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTx {
    pub payload: Tx,
    pub signature: String,
    pub public_key: String,
}

impl SignedTx {
    pub fn sign(payload: Tx, keypair: &Keypair) -> Self {
        let signature = keypair.sign(&payload.canonical_bytes());
        Self {
            payload,
            signature: hex::encode(signature.to_bytes()),
            public_key: hex::encode(keypair.public.to_bytes()),
        }
    }

    /// Verifies the envelope and yields the sender account. Fails with
    /// `InvalidSignature` when the signature does not match the payload or
    /// the embedded key is malformed.
    pub fn from_account(&self) -> ChainResult<AccountId> {
        let public_key = decode_signing_key(&self.public_key)?;
        let signature = decode_signature(&self.signature)?;
        public_key
            .verify(&self.payload.canonical_bytes(), &signature)
            .map_err(|err| ChainError::InvalidSignature(err.to_string()))?;
        Ok(account_id_from_public_key(&public_key))
    }

    pub fn hash(&self) -> String {
        self.payload.hash()
    }
}

fn decode_signing_key(encoded: &str) -> ChainResult<PublicKey> {
    let bytes = hex::decode(encoded)
        .map_err(|err| ChainError::InvalidSignature(format!("public key: {err}")))?;
    PublicKey::from_bytes(&bytes)
        .map_err(|err| ChainError::InvalidSignature(format!("public key: {err}")))
}

fn decode_signature(encoded: &str) -> ChainResult<Signature> {
    let bytes = hex::decode(encoded)
        .map_err(|err| ChainError::InvalidSignature(err.to_string()))?;
    Signature::from_bytes(&bytes).map_err(|err| ChainError::InvalidSignature(err.to_string()))
}
