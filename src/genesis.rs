use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{ChainError, ChainResult};
use crate::types::AccountId;

/// Immutable chain parameters, read once at startup and never mutated.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Genesis {
    pub chain_id: u16,
    pub mining_reward: u64,
    pub gas_price: u64,
    pub trans_per_block: u32,
    pub difficulty: u32,
    #[serde(default)]
    pub balances: HashMap<String, u64>,
}

impl Genesis {
    pub fn load(path: &Path) -> ChainResult<Self> {
        let raw = fs::read_to_string(path)?;
        let genesis: Genesis = serde_json::from_str(&raw).map_err(|err| {
            ChainError::Config(format!("{} is not a valid genesis file: {err}", path.display()))
        })?;
        genesis.validate()?;
        Ok(genesis)
    }

    pub fn save(&self, path: &Path) -> ChainResult<()> {
        let encoded = serde_json::to_vec_pretty(self)
            .map_err(|err| ChainError::Config(format!("could not encode genesis: {err}")))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, encoded)?;
        Ok(())
    }

    /// Balance keys must already be well-formed account ids; a bad key would
    /// otherwise mint funds nobody can spend.
    fn validate(&self) -> ChainResult<()> {
        if self.trans_per_block == 0 {
            return Err(ChainError::Config(
                "genesis trans_per_block must be at least 1".into(),
            ));
        }
        for account in self.balances.keys() {
            AccountId::from_hex(account)?;
        }
        Ok(())
    }

    pub fn funded_accounts(&self) -> ChainResult<Vec<(AccountId, u64)>> {
        self.balances
            .iter()
            .map(|(account, balance)| Ok((AccountId::from_hex(account)?, *balance)))
            .collect()
    }
}

impl Default for Genesis {
    fn default() -> Self {
        Self {
            chain_id: 1,
            mining_reward: 700,
            gas_price: 15,
            trans_per_block: 10,
            difficulty: 6,
            balances: HashMap::new(),
        }
    }
}
