use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task;
use tracing::{debug, info};

use crate::errors::{ChainError, ChainResult};
use crate::genesis::Genesis;
use crate::ledger::Ledger;
use crate::mempool::Mempool;
use crate::storage::Storage;
use crate::types::{
    compute_trans_root, is_hash_solved, now_timestamp, Account, AccountId, Block, BlockHeader,
    Peer, PeerSet, PeerStatus, SignedTx,
};

/// How many hash attempts the proof-of-work loop runs between cancellation
/// checks. Keeps the abort latency to a bounded number of attempts.
const CANCEL_POLL_INTERVAL: u64 = 512;

/// The state façade: genesis, ledger, mempool, and peer set behind one
/// handle that the worker and the RPC layer share.
pub struct Node {
    inner: Arc<NodeInner>,
}

struct NodeInner {
    genesis: Genesis,
    beneficiary: AccountId,
    ledger: Ledger,
    mempool: Mempool,
    peers: PeerSet,
    // Serializes block sealing so a mined block and a peer block can never
    // interleave their ledger/storage updates.
    write_lock: Mutex<()>,
}

#[derive(Clone)]
pub struct NodeHandle {
    inner: Arc<NodeInner>,
}

impl Node {
    pub fn new(
        genesis: Genesis,
        storage: Arc<dyn Storage>,
        beneficiary: AccountId,
        host: String,
        origin_peers: Vec<Peer>,
    ) -> ChainResult<Self> {
        let ledger = Ledger::new(genesis.clone(), storage)?;
        let inner = Arc::new(NodeInner {
            genesis,
            beneficiary,
            ledger,
            mempool: Mempool::new(),
            peers: PeerSet::new(host, origin_peers),
            write_lock: Mutex::new(()),
        });
        Ok(Self { inner })
    }

    pub fn handle(&self) -> NodeHandle {
        NodeHandle {
            inner: self.inner.clone(),
        }
    }
}

impl NodeHandle {
    pub fn genesis(&self) -> &Genesis {
        &self.inner.genesis
    }

    pub fn beneficiary(&self) -> &AccountId {
        &self.inner.beneficiary
    }

    pub fn submit_transaction(&self, tx: SignedTx) -> ChainResult<usize> {
        self.inner.submit_transaction(tx)
    }

    pub async fn mine_new_block(
        &self,
        cancel: watch::Receiver<bool>,
    ) -> ChainResult<(Block, Duration)> {
        self.inner.mine_new_block(cancel).await
    }

    pub fn write_next_block(&self, block: Block) -> ChainResult<()> {
        self.inner.write_next_block(block)
    }

    pub fn truncate(&self) -> ChainResult<()> {
        self.inner.truncate()
    }

    pub fn copy_known_peers(&self) -> Vec<Peer> {
        self.inner.peers.copy()
    }

    pub fn add_peer_node(&self, peer: Peer) -> ChainResult<()> {
        self.inner.peers.add(peer)
    }

    pub fn copy_latest_block(&self) -> Block {
        self.inner.ledger.latest_block()
    }

    pub fn query_mempool_length(&self) -> usize {
        self.inner.mempool.len()
    }

    pub fn copy_accounts(&self) -> HashMap<AccountId, Account> {
        self.inner.ledger.copy_accounts()
    }

    pub fn account(&self, account_id: &AccountId) -> Account {
        self.inner.ledger.account(account_id)
    }

    pub fn node_status(&self) -> PeerStatus {
        PeerStatus {
            latest_block_number: self.copy_latest_block().header.number,
            known_peers: self.copy_known_peers(),
        }
    }

    pub fn block_range(&self, from: u64, to: u64) -> ChainResult<Vec<Block>> {
        let blocks = self.inner.ledger.read_all_blocks(false)?;
        Ok(blocks
            .into_iter()
            .filter(|block| block.header.number >= from && block.header.number <= to)
            .collect())
    }

    pub fn close(&self) -> ChainResult<()> {
        self.inner.ledger.close()
    }
}

impl NodeInner {
    fn submit_transaction(&self, tx: SignedTx) -> ChainResult<usize> {
        if tx.payload.chain_id != self.genesis.chain_id {
            return Err(ChainError::WrongChainId {
                got: tx.payload.chain_id,
                expected: self.genesis.chain_id,
            });
        }
        self.mempool.upsert(tx)
    }

    /// Drains the best transactions from the mempool, performs proof-of-work
    /// until the header hash meets the difficulty target or `cancel` flips,
    /// and commits the solved block through the regular write path.
    async fn mine_new_block(
        &self,
        cancel: watch::Receiver<bool>,
    ) -> ChainResult<(Block, Duration)> {
        let trans_per_block = self.genesis.trans_per_block as usize;
        let transactions = self.mempool.pick_best(trans_per_block);
        if transactions.len() < trans_per_block {
            return Err(ChainError::NotEnoughTransactions);
        }

        let latest = self.ledger.latest_block();
        let header = BlockHeader {
            number: latest.header.number + 1,
            prev_block_hash: latest.hash(),
            timestamp: now_timestamp(),
            beneficiary_id: self.beneficiary.clone(),
            difficulty: self.genesis.difficulty,
            mining_reward: self.genesis.mining_reward,
            state_root: self.ledger.state_root(),
            trans_root: compute_trans_root(&transactions),
            nonce: 0,
        };
        let candidate = Block {
            header,
            transactions,
        };

        let difficulty = self.genesis.difficulty;
        let started = Instant::now();
        let mined = task::spawn_blocking(move || prove_work(candidate, difficulty, cancel))
            .await
            .map_err(|err| ChainError::Io(io::Error::new(io::ErrorKind::Other, err)))??;
        let duration = started.elapsed();

        self.write_next_block(mined.clone())?;
        Ok((mined, duration))
    }

    /// Validates a block against the current tip and applies it atomically:
    /// transactions, mining reward, storage append, latest-block update, and
    /// mempool cleanup all happen under the write lock or not at all.
    fn write_next_block(&self, block: Block) -> ChainResult<()> {
        let _guard = self.write_lock.lock();
        let latest = self.ledger.latest_block();
        block.validate(&latest, self.genesis.difficulty)?;

        for tx in &block.transactions {
            if let Err(err) = self.ledger.apply_transaction(&block, tx) {
                debug!(height = block.header.number, %err, "transaction not applied");
            }
        }
        self.ledger.apply_mining_reward(&block);
        self.ledger.write(&block)?;
        self.ledger.update_latest_block(block.clone());
        self.mempool.remove_applied(&block.transactions);
        info!(
            height = block.header.number,
            transactions = block.transactions.len(),
            "sealed block"
        );
        Ok(())
    }

    /// Fork recovery: drops the tip block and rebuilds ledger and storage
    /// from genesis plus the remaining chain.
    fn truncate(&self) -> ChainResult<()> {
        let _guard = self.write_lock.lock();
        let mut blocks = self.ledger.read_all_blocks(false)?;
        let Some(tip) = blocks.pop() else {
            return Ok(());
        };
        self.ledger.reset()?;
        for block in &blocks {
            for tx in &block.transactions {
                if let Err(err) = self.ledger.apply_transaction(block, tx) {
                    debug!(height = block.header.number, %err, "transaction not applied");
                }
            }
            self.ledger.apply_mining_reward(block);
            self.ledger.write(block)?;
            self.ledger.update_latest_block(block.clone());
        }
        info!(
            removed = tip.header.number,
            height = self.ledger.latest_block().header.number,
            "truncated chain tip for fork recovery"
        );
        Ok(())
    }
}

fn prove_work(mut block: Block, difficulty: u32, cancel: watch::Receiver<bool>) -> ChainResult<Block> {
    block.header.nonce = rand::random();
    let mut attempts: u64 = 0;
    loop {
        if attempts % CANCEL_POLL_INTERVAL == 0 && *cancel.borrow() {
            return Err(ChainError::Cancelled);
        }
        if is_hash_solved(difficulty, &block.hash()) {
            return Ok(block);
        }
        block.header.nonce = block.header.nonce.wrapping_add(1);
        attempts += 1;
    }
}
