use std::collections::HashSet;
use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::errors::{ChainError, ChainResult};

/// A node on the network, identified by its announced host.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Peer {
    pub host: String,
}

impl Peer {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.host)
    }
}

/// What a peer reports about itself during a sync pass.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PeerStatus {
    pub latest_block_number: u64,
    pub known_peers: Vec<Peer>,
}

/// The set of peers this node gossips with. The node's own host is pinned at
/// construction and can never be added back as a peer.
pub struct PeerSet {
    host: String,
    peers: RwLock<HashSet<Peer>>,
}

impl PeerSet {
    pub fn new(host: String, origins: impl IntoIterator<Item = Peer>) -> Self {
        let set = Self {
            host: host.clone(),
            peers: RwLock::new(HashSet::new()),
        };
        {
            let mut peers = set.peers.write();
            for peer in origins {
                if peer.host != host {
                    peers.insert(peer);
                }
            }
        }
        set
    }

    pub fn add(&self, peer: Peer) -> ChainResult<()> {
        if peer.host == self.host {
            return Err(ChainError::PeerAlreadyKnown(peer.host));
        }
        let mut peers = self.peers.write();
        if !peers.insert(peer.clone()) {
            return Err(ChainError::PeerAlreadyKnown(peer.host));
        }
        Ok(())
    }

    pub fn copy(&self) -> Vec<Peer> {
        let mut peers: Vec<Peer> = self.peers.read().iter().cloned().collect();
        peers.sort_by(|a, b| a.host.cmp(&b.host));
        peers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_host_is_never_a_peer() {
        let set = PeerSet::new(
            "127.0.0.1:7080".into(),
            vec![Peer::new("127.0.0.1:7080"), Peer::new("127.0.0.1:7081")],
        );
        assert_eq!(set.copy(), vec![Peer::new("127.0.0.1:7081")]);
        let err = set.add(Peer::new("127.0.0.1:7080")).unwrap_err();
        assert!(matches!(err, ChainError::PeerAlreadyKnown(_)));
    }

    #[test]
    fn duplicate_add_reports_already_known() {
        let set = PeerSet::new("127.0.0.1:7080".into(), Vec::new());
        set.add(Peer::new("127.0.0.1:9000")).expect("first add");
        assert!(set.add(Peer::new("127.0.0.1:9000")).is_err());
        assert_eq!(set.copy().len(), 1);
    }
}
