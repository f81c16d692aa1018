mod account;
mod block;
mod peer;
mod transaction;

pub use account::{Account, AccountId, ACCOUNT_ID_LEN};
pub use block::{
    compute_trans_root, is_hash_solved, now_timestamp, Block, BlockHeader, ZERO_HASH,
};
pub use peer::{Peer, PeerSet, PeerStatus};
pub use transaction::{SignedTx, Tx};
