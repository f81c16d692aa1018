use std::cmp::Reverse;
use std::collections::HashMap;

use parking_lot::RwLock;

use crate::errors::ChainResult;
use crate::types::{AccountId, SignedTx};

/// Pending transactions not yet mined, keyed `sender:nonce` so a resubmitted
/// transaction replaces its earlier version instead of duplicating it.
pub struct Mempool {
    pool: RwLock<HashMap<String, SignedTx>>,
}

impl Mempool {
    pub fn new() -> Self {
        Self {
            pool: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.pool.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.read().is_empty()
    }

    /// Inserts or replaces a transaction and returns the new pool length.
    /// The signature is checked here so the pool only ever holds
    /// transactions with a recoverable sender.
    pub fn upsert(&self, tx: SignedTx) -> ChainResult<usize> {
        let from = tx.from_account()?;
        let mut pool = self.pool.write();
        pool.insert(pool_key(&from, tx.payload.nonce), tx);
        Ok(pool.len())
    }

    /// Drops every transaction that made it into a written block.
    pub fn remove_applied(&self, transactions: &[SignedTx]) {
        let mut pool = self.pool.write();
        for tx in transactions {
            if let Ok(from) = tx.from_account() {
                pool.remove(&pool_key(&from, tx.payload.nonce));
            }
        }
    }

    /// Up to `take` transactions, highest tip first. Ties break on the pool
    /// key so selection is deterministic across nodes.
    pub fn pick_best(&self, take: usize) -> Vec<SignedTx> {
        let pool = self.pool.read();
        let mut entries: Vec<(&String, &SignedTx)> = pool.iter().collect();
        entries.sort_by_key(|(key, tx)| (Reverse(tx.payload.tip), (*key).clone()));
        entries
            .into_iter()
            .take(take)
            .map(|(_, tx)| tx.clone())
            .collect()
    }
}

impl Default for Mempool {
    fn default() -> Self {
        Self::new()
    }
}

fn pool_key(from: &AccountId, nonce: u64) -> String {
    format!("{from}:{nonce}")
}
