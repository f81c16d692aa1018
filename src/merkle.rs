use sha2::{Digest, Sha256};

/// Root of a binary Merkle tree over the given leaves.
///
/// A lone leaf is its own root, a trailing odd leaf hashes against itself,
/// and the empty tree roots to all zeroes.
pub fn merkle_root(leaves: &[[u8; 32]]) -> [u8; 32] {
    let mut level = leaves.to_vec();
    loop {
        match level.len() {
            0 => return [0u8; 32],
            1 => return level[0],
            _ => level = level.chunks(2).map(hash_pair).collect(),
        }
    }
}

fn hash_pair(pair: &[[u8; 32]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(pair[0]);
    hasher.update(pair[pair.len() - 1]);
    hasher.finalize().into()
}
