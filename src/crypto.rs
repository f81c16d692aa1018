use std::fs;
use std::path::Path;

use ed25519_dalek::{Keypair, PublicKey, SecretKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

use crate::errors::{ChainError, ChainResult};
use crate::types::AccountId;

/// The node's signing identity.
///
/// The keystore file holds nothing but the hex-encoded secret; the public
/// half and the account id are rederived on load, so a keystore can never
/// disagree with itself.
pub struct NodeKey {
    keypair: Keypair,
}

impl NodeKey {
    pub fn generate() -> Self {
        Self {
            keypair: Keypair::generate(&mut OsRng),
        }
    }

    pub fn load(path: &Path) -> ChainResult<Self> {
        let raw = fs::read_to_string(path)?;
        Self::from_secret_hex(raw.trim()).map_err(|err| {
            ChainError::Crypto(format!("keystore {} unusable: {err}", path.display()))
        })
    }

    pub fn save(&self, path: &Path) -> ChainResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, hex::encode(self.keypair.secret.to_bytes()))?;
        Ok(())
    }

    pub fn load_or_create(path: &Path) -> ChainResult<Self> {
        if path.exists() {
            return Self::load(path);
        }
        let key = Self::generate();
        key.save(path)?;
        Ok(key)
    }

    pub fn account_id(&self) -> AccountId {
        account_id_from_public_key(&self.keypair.public)
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    fn from_secret_hex(encoded: &str) -> Result<Self, String> {
        let bytes = hex::decode(encoded).map_err(|err| err.to_string())?;
        let secret = SecretKey::from_bytes(&bytes).map_err(|err| err.to_string())?;
        let public = PublicKey::from(&secret);
        Ok(Self {
            keypair: Keypair { secret, public },
        })
    }
}

/// An account is addressed by the digest of the public key that owns it.
pub fn account_id_from_public_key(public_key: &PublicKey) -> AccountId {
    AccountId::from_digest(Sha256::digest(public_key.as_bytes()).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn keystore_rederives_the_same_identity() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("keys/node.key");
        let key = NodeKey::load_or_create(&path).expect("create");
        let reloaded = NodeKey::load_or_create(&path).expect("load");
        assert_eq!(key.account_id(), reloaded.account_id());
    }

    #[test]
    fn corrupt_keystore_is_rejected() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("node.key");
        fs::write(&path, "zz-not-hex").expect("write");
        let err = match NodeKey::load(&path) {
            Ok(_) => panic!("corrupt keystore accepted"),
            Err(err) => err,
        };
        assert!(matches!(err, ChainError::Crypto(_)));
    }
}
