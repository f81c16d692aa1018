use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::errors::{ChainError, ChainResult};
use crate::genesis::Genesis;
use crate::merkle::merkle_root;
use crate::storage::Storage;
use crate::types::{Account, AccountId, Block, SignedTx};

/// In-memory account state plus the storage engine backing it. All mutation
/// happens behind the single writer lock, which gives every honest node the
/// same total order over state transitions.
pub struct Ledger {
    genesis: Genesis,
    accounts: RwLock<HashMap<AccountId, Account>>,
    latest_block: RwLock<Block>,
    storage: Arc<dyn Storage>,
}

impl Ledger {
    /// Builds the ledger from genesis balances and replays every stored
    /// block. Block validation failures abort startup; transaction-level
    /// failures do not, because the gas charge they leave behind is part of
    /// the state the block's miner produced.
    pub fn new(genesis: Genesis, storage: Arc<dyn Storage>) -> ChainResult<Self> {
        let ledger = Self {
            genesis,
            accounts: RwLock::new(HashMap::new()),
            latest_block: RwLock::new(Block::default()),
            storage,
        };
        ledger.seed_genesis()?;

        let blocks = ledger.read_all_blocks(true)?;
        for block in &blocks {
            for tx in &block.transactions {
                if let Err(err) = ledger.apply_transaction(block, tx) {
                    debug!(
                        height = block.header.number,
                        %err,
                        "transaction not applied during replay"
                    );
                }
            }
            ledger.apply_mining_reward(block);
        }
        if let Some(last) = blocks.last() {
            ledger.update_latest_block(last.clone());
        }
        Ok(ledger)
    }

    pub fn genesis(&self) -> &Genesis {
        &self.genesis
    }

    fn seed_genesis(&self) -> ChainResult<()> {
        let mut accounts = self.accounts.write();
        for (account_id, balance) in self.genesis.funded_accounts()? {
            accounts.insert(
                account_id,
                Account {
                    balance,
                    nonce: 0,
                },
            );
        }
        Ok(())
    }

    /// Applies one transaction to the account map.
    ///
    /// The gas fee is charged first, clamped to the sender's balance, and
    /// persisted before any accounting check runs. A validation error after
    /// that point leaves the gas charge in place; callers must treat the
    /// error as informational, not as "nothing changed".
    ///
    /// Accounts are loaded as snapshots and written back in a fixed order,
    /// so when sender, recipient, and beneficiary alias each other the last
    /// write wins deterministically.
    pub fn apply_transaction(&self, block: &Block, tx: &SignedTx) -> ChainResult<()> {
        let from_id = tx.from_account()?;
        let bnfc_id = block.header.beneficiary_id.clone();

        let mut accounts = self.accounts.write();
        let mut from = accounts.get(&from_id).copied().unwrap_or_default();
        let mut to = accounts.get(&tx.payload.to_id).copied().unwrap_or_default();
        let mut bnfc = accounts.get(&bnfc_id).copied().unwrap_or_default();

        let mut gas_fee = tx.payload.gas_price.saturating_mul(tx.payload.gas_units);
        if gas_fee > from.balance {
            gas_fee = from.balance;
        }
        from.balance -= gas_fee;
        bnfc.balance = bnfc.balance.saturating_add(gas_fee);
        accounts.insert(from_id.clone(), from);
        accounts.insert(bnfc_id.clone(), bnfc);

        if tx.payload.chain_id != self.genesis.chain_id {
            return Err(ChainError::WrongChainId {
                got: tx.payload.chain_id,
                expected: self.genesis.chain_id,
            });
        }
        if from_id == tx.payload.to_id {
            return Err(ChainError::SelfTransfer);
        }
        if tx.payload.nonce <= from.nonce {
            return Err(ChainError::NonceTooSmall {
                current: from.nonce,
                provided: tx.payload.nonce,
            });
        }
        let needed = tx
            .payload
            .value
            .checked_add(tx.payload.tip)
            .ok_or(ChainError::InsufficientFunds {
                balance: from.balance,
                needed: u64::MAX,
            })?;
        if from.balance == 0 || from.balance < needed {
            return Err(ChainError::InsufficientFunds {
                balance: from.balance,
                needed,
            });
        }

        from.balance -= tx.payload.value;
        to.balance = to.balance.saturating_add(tx.payload.value);

        from.balance -= tx.payload.tip;
        bnfc.balance = bnfc.balance.saturating_add(tx.payload.tip);

        from.nonce = tx.payload.nonce;

        accounts.insert(from_id, from);
        accounts.insert(tx.payload.to_id.clone(), to);
        accounts.insert(bnfc_id, bnfc);

        Ok(())
    }

    pub fn apply_mining_reward(&self, block: &Block) {
        let mut accounts = self.accounts.write();
        let account = accounts
            .entry(block.header.beneficiary_id.clone())
            .or_default();
        account.balance = account.balance.saturating_add(block.header.mining_reward);
    }

    pub fn copy_accounts(&self) -> HashMap<AccountId, Account> {
        self.accounts.read().clone()
    }

    pub fn account(&self, account_id: &AccountId) -> Account {
        self.accounts
            .read()
            .get(account_id)
            .copied()
            .unwrap_or_default()
    }

    pub fn remove(&self, account_id: &AccountId) {
        self.accounts.write().remove(account_id);
    }

    pub fn update_latest_block(&self, block: Block) {
        *self.latest_block.write() = block;
    }

    pub fn latest_block(&self) -> Block {
        self.latest_block.read().clone()
    }

    pub fn write(&self, block: &Block) -> ChainResult<()> {
        self.storage.write(block)
    }

    pub fn close(&self) -> ChainResult<()> {
        self.storage.close()
    }

    /// Re-initializes the ledger to the genesis state: empty chain, genesis
    /// balances, reset storage.
    pub fn reset(&self) -> ChainResult<()> {
        self.storage.reset()?;
        {
            let mut accounts = self.accounts.write();
            accounts.clear();
        }
        self.seed_genesis()?;
        *self.latest_block.write() = Block::default();
        Ok(())
    }

    /// Streams every stored block through the cursor contract, optionally
    /// validating each against its parent.
    pub fn read_all_blocks(&self, validate: bool) -> ChainResult<Vec<Block>> {
        let mut blocks: Vec<Block> = Vec::new();
        let mut prev = Block::default();
        let mut iter = self.storage.for_each();
        loop {
            let block = iter.next()?;
            if iter.done() {
                break;
            }
            if validate {
                block.validate(&prev, self.genesis.difficulty)?;
            }
            prev = block.clone();
            blocks.push(block);
        }
        Ok(blocks)
    }

    /// Root over the sorted account set; identical state yields an identical
    /// root on every node.
    pub fn state_root(&self) -> String {
        let accounts = self.accounts.read();
        let mut entries: Vec<(&AccountId, &Account)> = accounts.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        let leaves: Vec<[u8; 32]> = entries
            .iter()
            .map(|(account_id, account)| {
                let bytes =
                    serde_json::to_vec(&(account_id, account)).expect("serializing account");
                Sha256::digest(bytes).into()
            })
            .collect();
        hex::encode(merkle_root(&leaves))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::account_id_from_public_key;
    use crate::storage::MemoryStorage;
    use crate::types::{BlockHeader, Tx};
    use ed25519_dalek::{Keypair, PublicKey, SecretKey};

    fn keypair(seed: u8) -> Keypair {
        let secret = SecretKey::from_bytes(&[seed; 32]).expect("secret");
        let public = PublicKey::from(&secret);
        Keypair { secret, public }
    }

    fn account_id(seed: u8) -> AccountId {
        account_id_from_public_key(&keypair(seed).public)
    }

    fn test_genesis(balances: &[(u8, u64)]) -> Genesis {
        let mut genesis = Genesis {
            chain_id: 1,
            mining_reward: 50,
            gas_price: 1,
            trans_per_block: 2,
            difficulty: 1,
            balances: HashMap::new(),
        };
        for (seed, balance) in balances {
            genesis
                .balances
                .insert(account_id(*seed).to_string(), *balance);
        }
        genesis
    }

    fn ledger(balances: &[(u8, u64)]) -> Ledger {
        Ledger::new(test_genesis(balances), Arc::new(MemoryStorage::new())).expect("ledger")
    }

    fn mined_by(seed: u8) -> Block {
        Block {
            header: BlockHeader {
                number: 1,
                beneficiary_id: account_id(seed),
                mining_reward: 50,
                ..BlockHeader::default()
            },
            transactions: Vec::new(),
        }
    }

    fn transfer(from: u8, to: AccountId, nonce: u64, value: u64, tip: u64) -> SignedTx {
        SignedTx::sign(
            Tx {
                chain_id: 1,
                nonce,
                to_id: to,
                value,
                tip,
                data: Vec::new(),
                gas_price: 1,
                gas_units: 5,
            },
            &keypair(from),
        )
    }

    const A: u8 = 1;
    const B: u8 = 2;
    const M: u8 = 3;

    #[test]
    fn successful_transfer_moves_value_tip_and_gas() {
        let ledger = ledger(&[(A, 1_000)]);
        let block = mined_by(M);
        ledger
            .apply_transaction(&block, &transfer(A, account_id(B), 1, 100, 10))
            .expect("apply");
        assert_eq!(
            ledger.account(&account_id(A)),
            Account {
                balance: 885,
                nonce: 1
            }
        );
        assert_eq!(ledger.account(&account_id(B)).balance, 100);
        assert_eq!(ledger.account(&account_id(M)).balance, 15);
    }

    #[test]
    fn stale_nonce_still_pays_gas() {
        let ledger = ledger(&[(A, 1_000)]);
        let block = mined_by(M);
        ledger
            .apply_transaction(&block, &transfer(A, account_id(B), 7, 10, 0))
            .expect("apply");

        let err = ledger
            .apply_transaction(&block, &transfer(A, account_id(B), 5, 10, 0))
            .unwrap_err();
        assert!(matches!(
            err,
            ChainError::NonceTooSmall {
                current: 7,
                provided: 5
            }
        ));
        let from = ledger.account(&account_id(A));
        assert_eq!(from.nonce, 7);
        assert_eq!(from.balance, 1_000 - 5 - 10 - 5);
        assert_eq!(ledger.account(&account_id(M)).balance, 10);
    }

    #[test]
    fn gas_charge_clamps_to_the_remaining_balance() {
        let ledger = ledger(&[(A, 3)]);
        let block = mined_by(M);
        let err = ledger
            .apply_transaction(&block, &transfer(A, account_id(B), 1, 10, 0))
            .unwrap_err();
        assert!(matches!(err, ChainError::InsufficientFunds { .. }));
        assert_eq!(ledger.account(&account_id(A)).balance, 0);
        assert_eq!(ledger.account(&account_id(M)).balance, 3);
    }

    #[test]
    fn self_transfer_is_rejected_after_the_gas_charge() {
        let ledger = ledger(&[(A, 1_000)]);
        let block = mined_by(M);
        let tx = SignedTx::sign(
            Tx {
                chain_id: 1,
                nonce: 1,
                to_id: account_id(A),
                value: 10,
                tip: 0,
                data: Vec::new(),
                gas_price: 1,
                gas_units: 2,
            },
            &keypair(A),
        );
        let err = ledger.apply_transaction(&block, &tx).unwrap_err();
        assert!(matches!(err, ChainError::SelfTransfer));
        assert_eq!(ledger.account(&account_id(A)).balance, 998);
        assert_eq!(ledger.account(&account_id(M)).balance, 2);
    }

    #[test]
    fn wrong_chain_id_is_rejected_after_the_gas_charge() {
        let ledger = ledger(&[(A, 1_000)]);
        let block = mined_by(M);
        let tx = Tx {
            chain_id: 9,
            nonce: 1,
            to_id: account_id(B),
            value: 10,
            tip: 0,
            data: Vec::new(),
            gas_price: 1,
            gas_units: 5,
        };
        let err = ledger
            .apply_transaction(&block, &SignedTx::sign(tx, &keypair(A)))
            .unwrap_err();
        assert!(matches!(err, ChainError::WrongChainId { got: 9, .. }));
        assert_eq!(ledger.account(&account_id(A)).balance, 995);
    }

    #[test]
    fn applied_nonces_strictly_increase() {
        let ledger = ledger(&[(A, 10_000)]);
        let block = mined_by(M);
        let mut last = 0;
        for nonce in [1, 2, 5, 9] {
            ledger
                .apply_transaction(&block, &transfer(A, account_id(B), nonce, 10, 0))
                .expect("apply");
            let current = ledger.account(&account_id(A)).nonce;
            assert!(current > last);
            last = current;
        }
        assert!(ledger
            .apply_transaction(&block, &transfer(A, account_id(B), 9, 10, 0))
            .is_err());
        assert_eq!(ledger.account(&account_id(A)).nonce, 9);
    }

    #[test]
    fn application_is_deterministic() {
        let run = || {
            let ledger = ledger(&[(A, 1_000), (B, 40)]);
            let block = mined_by(M);
            let txs = [
                transfer(A, account_id(B), 1, 100, 10),
                transfer(B, account_id(A), 1, 200, 0),
                transfer(A, account_id(B), 2, 5, 1),
            ];
            let results: Vec<bool> = txs
                .iter()
                .map(|tx| ledger.apply_transaction(&block, tx).is_ok())
                .collect();
            (results, ledger.state_root())
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn value_is_conserved_modulo_rewards() {
        let ledger = ledger(&[(A, 1_000), (B, 500)]);
        let block = mined_by(M);
        let _ = ledger.apply_transaction(&block, &transfer(A, account_id(B), 1, 100, 10));
        let _ = ledger.apply_transaction(&block, &transfer(B, account_id(A), 1, 9_999, 0));
        let total: u64 = ledger
            .copy_accounts()
            .values()
            .map(|account| account.balance)
            .sum();
        assert_eq!(total, 1_500);

        ledger.apply_mining_reward(&block);
        let total: u64 = ledger
            .copy_accounts()
            .values()
            .map(|account| account.balance)
            .sum();
        assert_eq!(total, 1_550);
    }

    #[test]
    fn reset_returns_to_genesis() {
        let ledger = ledger(&[(A, 1_000)]);
        let block = mined_by(M);
        ledger
            .apply_transaction(&block, &transfer(A, account_id(B), 1, 100, 0))
            .expect("apply");
        ledger.update_latest_block(block);
        ledger.reset().expect("reset");
        assert_eq!(ledger.account(&account_id(A)).balance, 1_000);
        assert_eq!(ledger.account(&account_id(B)).balance, 0);
        assert_eq!(ledger.latest_block(), Block::default());
    }
}
