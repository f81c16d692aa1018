use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
    #[error("wrong chain id, got {got}, exp {expected}")]
    WrongChainId { got: u16, expected: u16 },
    #[error("sending money to yourself is not permitted")]
    SelfTransfer,
    #[error("nonce too small, current {current}, provided {provided}")]
    NonceTooSmall { current: u64, provided: u64 },
    #[error("insufficient funds, balance {balance}, needed {needed}")]
    InsufficientFunds { balance: u64, needed: u64 },
    #[error("not enough transactions in the mempool to mine a block")]
    NotEnoughTransactions,
    #[error("chain forked, block does not link to the local tip")]
    ChainForked,
    #[error("block validation failed: {0}")]
    BlockValidation(String),
    #[error("mining cancelled")]
    Cancelled,
    #[error("peer {0} already known")]
    PeerAlreadyKnown(String),
    #[error("peer unreachable: {0}")]
    PeerUnreachable(String),
    #[error("peer rejected request: {0}")]
    PeerRejected(String),
    #[error("block store failure: {0}")]
    Storage(#[from] rocksdb::Error),
    #[error("encoding failure: {0}")]
    Serialization(#[from] bincode::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("key failure: {0}")]
    Crypto(String),
    #[error("i/o failure: {0}")]
    Io(#[from] io::Error),
}

pub type ChainResult<T> = Result<T, ChainError>;
