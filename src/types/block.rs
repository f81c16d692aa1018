use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::{ChainError, ChainResult};
use crate::merkle::merkle_root;

use super::{AccountId, SignedTx};

/// Hash value reported for the empty block that anchors an empty chain.
pub const ZERO_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub number: u64,
    pub prev_block_hash: String,
    pub timestamp: u64,
    pub beneficiary_id: AccountId,
    pub difficulty: u32,
    pub mining_reward: u64,
    pub state_root: String,
    pub trans_root: String,
    pub nonce: u64,
}

impl Default for BlockHeader {
    fn default() -> Self {
        Self {
            number: 0,
            prev_block_hash: ZERO_HASH.to_string(),
            timestamp: 0,
            beneficiary_id: AccountId::default(),
            difficulty: 0,
            mining_reward: 0,
            state_root: ZERO_HASH.to_string(),
            trans_root: ZERO_HASH.to_string(),
            nonce: 0,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<SignedTx>,
}

impl Block {
    /// Digest of the canonical JSON header. The empty block hashes to the
    /// zero hash so an unmined chain still has a well-defined parent.
    pub fn hash(&self) -> String {
        if self.header.number == 0 {
            return ZERO_HASH.to_string();
        }
        let bytes = serde_json::to_vec(&self.header).expect("serializing block header");
        hex::encode(Sha256::digest(bytes))
    }

    /// Checks this block against its parent: linkage mismatches surface as
    /// `ChainForked`, everything else as a validation or signature error.
    pub fn validate(&self, prev: &Block, difficulty: u32) -> ChainResult<()> {
        if self.header.number != prev.header.number + 1 {
            return Err(ChainError::ChainForked);
        }
        if self.header.prev_block_hash != prev.hash() {
            return Err(ChainError::ChainForked);
        }
        if !is_hash_solved(difficulty, &self.hash()) {
            return Err(ChainError::BlockValidation(format!(
                "block {} hash does not meet the difficulty target",
                self.header.number
            )));
        }
        if self.header.trans_root != compute_trans_root(&self.transactions) {
            return Err(ChainError::BlockValidation(format!(
                "block {} transaction root mismatch",
                self.header.number
            )));
        }
        for tx in &self.transactions {
            tx.from_account()?;
        }
        Ok(())
    }
}

/// Merkle root over the block's transactions, zero hash for an empty set.
pub fn compute_trans_root(transactions: &[SignedTx]) -> String {
    let leaves: Vec<[u8; 32]> = transactions
        .iter()
        .map(|tx| Sha256::digest(tx.payload.canonical_bytes()).into())
        .collect();
    hex::encode(merkle_root(&leaves))
}

/// A hash satisfies the proof-of-work target when it starts with
/// `difficulty` zero characters.
pub fn is_hash_solved(difficulty: u32, hash: &str) -> bool {
    let want = difficulty as usize;
    hash.len() >= want && hash.bytes().take(want).all(|b| b == b'0')
}

pub fn now_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
