use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{ChainError, ChainResult};
use crate::types::Peer;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    pub data_dir: PathBuf,
    pub key_path: PathBuf,
    pub genesis_path: PathBuf,
    pub api_listen: SocketAddr,
    /// Host other nodes reach this one on; excluded from the peer set.
    pub host: String,
    #[serde(default)]
    pub origin_peers: Vec<String>,
}

impl NodeConfig {
    pub fn load(path: &Path) -> ChainResult<Self> {
        let raw = fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|err| {
            ChainError::Config(format!("{} is not a valid config: {err}", path.display()))
        })
    }

    pub fn save(&self, path: &Path) -> ChainResult<()> {
        let encoded = toml::to_string_pretty(self)
            .map_err(|err| ChainError::Config(format!("could not encode config: {err}")))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, encoded)?;
        Ok(())
    }

    pub fn ensure_directories(&self) -> ChainResult<()> {
        let dirs = [Some(self.data_dir.as_path()), self.key_path.parent()];
        for dir in dirs.into_iter().flatten() {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn origin_peers(&self) -> Vec<Peer> {
        self.origin_peers.iter().map(Peer::new).collect()
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            key_path: PathBuf::from("./keys/node.key"),
            genesis_path: PathBuf::from("./config/genesis.json"),
            api_listen: "127.0.0.1:7080".parse().expect("valid socket addr"),
            host: "127.0.0.1:7080".to_string(),
            origin_peers: Vec::new(),
        }
    }
}
