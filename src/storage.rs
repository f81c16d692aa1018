use std::collections::VecDeque;
use std::path::Path;

use parking_lot::RwLock;
use rocksdb::{IteratorMode, Options, DB};

use crate::errors::{ChainError, ChainResult};
use crate::types::Block;

/// Behavior required from any engine persisting the block chain.
pub trait Storage: Send + Sync {
    fn write(&self, block: &Block) -> ChainResult<()>;
    fn get_block(&self, number: u64) -> ChainResult<Option<Block>>;
    fn for_each(&self) -> Box<dyn BlockIterator>;
    fn close(&self) -> ChainResult<()>;
    fn reset(&self) -> ChainResult<()>;
}

/// Cursor over stored blocks. `done` is only meaningful after a `next` call:
/// the exhausted `next` yields an empty block with no error and flips `done`,
/// so callers must check `done` before using the block.
pub trait BlockIterator: Send {
    fn next(&mut self) -> ChainResult<Block>;
    fn done(&self) -> bool;
}

/// Shared cursor implementation; both engines snapshot their blocks when the
/// cursor is created, so a cursor is stable under concurrent writes.
struct BlockCursor {
    blocks: VecDeque<Block>,
    pending_err: Option<ChainError>,
    done: bool,
}

impl BlockCursor {
    fn new(result: ChainResult<Vec<Block>>) -> Self {
        match result {
            Ok(blocks) => Self {
                blocks: blocks.into(),
                pending_err: None,
                done: false,
            },
            Err(err) => Self {
                blocks: VecDeque::new(),
                pending_err: Some(err),
                done: false,
            },
        }
    }
}

impl BlockIterator for BlockCursor {
    fn next(&mut self) -> ChainResult<Block> {
        if let Some(err) = self.pending_err.take() {
            return Err(err);
        }
        match self.blocks.pop_front() {
            Some(block) => Ok(block),
            None => {
                self.done = true;
                Ok(Block::default())
            }
        }
    }

    fn done(&self) -> bool {
        self.done
    }
}

// =============================================================================

/// RocksDB-backed block store. Blocks live in the default column family
/// keyed by big-endian height, so the raw key order is the chain order.
pub struct RocksStorage {
    db: DB,
}

impl RocksStorage {
    pub fn open(path: &Path) -> ChainResult<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path)?;
        Ok(Self { db })
    }

    fn load_all(&self) -> ChainResult<Vec<Block>> {
        let mut blocks = Vec::new();
        for entry in self.db.iterator(IteratorMode::Start) {
            let (_key, value) = entry?;
            blocks.push(bincode::deserialize::<Block>(&value)?);
        }
        Ok(blocks)
    }
}

impl Storage for RocksStorage {
    fn write(&self, block: &Block) -> ChainResult<()> {
        let data = bincode::serialize(block)?;
        self.db.put(block.header.number.to_be_bytes(), data)?;
        Ok(())
    }

    fn get_block(&self, number: u64) -> ChainResult<Option<Block>> {
        match self.db.get(number.to_be_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    fn for_each(&self) -> Box<dyn BlockIterator> {
        Box::new(BlockCursor::new(self.load_all()))
    }

    fn close(&self) -> ChainResult<()> {
        self.db.flush()?;
        Ok(())
    }

    fn reset(&self) -> ChainResult<()> {
        let keys: Vec<Box<[u8]>> = self
            .db
            .iterator(IteratorMode::Start)
            .map(|entry| entry.map(|(key, _)| key))
            .collect::<Result<_, _>>()?;
        for key in keys {
            self.db.delete(key)?;
        }
        Ok(())
    }
}

// =============================================================================

/// In-memory block store for ephemeral nodes and tests.
#[derive(Default)]
pub struct MemoryStorage {
    blocks: RwLock<Vec<Block>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn write(&self, block: &Block) -> ChainResult<()> {
        self.blocks.write().push(block.clone());
        Ok(())
    }

    fn get_block(&self, number: u64) -> ChainResult<Option<Block>> {
        Ok(self
            .blocks
            .read()
            .iter()
            .find(|block| block.header.number == number)
            .cloned())
    }

    fn for_each(&self) -> Box<dyn BlockIterator> {
        Box::new(BlockCursor::new(Ok(self.blocks.read().clone())))
    }

    fn close(&self) -> ChainResult<()> {
        Ok(())
    }

    fn reset(&self) -> ChainResult<()> {
        self.blocks.write().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BlockHeader;
    use tempfile::tempdir;

    fn block(number: u64) -> Block {
        Block {
            header: BlockHeader {
                number,
                ..BlockHeader::default()
            },
            transactions: Vec::new(),
        }
    }

    fn collect(storage: &dyn Storage) -> Vec<u64> {
        let mut numbers = Vec::new();
        let mut iter = storage.for_each();
        loop {
            let block = iter.next().expect("cursor next");
            if iter.done() {
                break;
            }
            numbers.push(block.header.number);
        }
        numbers
    }

    #[test]
    fn memory_engine_honors_the_cursor_contract() {
        let storage = MemoryStorage::new();
        storage.write(&block(1)).expect("write");
        storage.write(&block(2)).expect("write");
        assert_eq!(collect(&storage), vec![1, 2]);
        assert_eq!(
            storage.get_block(2).expect("get").map(|b| b.header.number),
            Some(2)
        );
        storage.reset().expect("reset");
        assert!(collect(&storage).is_empty());
    }

    #[test]
    fn rocks_engine_persists_blocks_in_height_order() {
        let dir = tempdir().expect("tempdir");
        let storage = RocksStorage::open(dir.path()).expect("open");
        storage.write(&block(2)).expect("write");
        storage.write(&block(1)).expect("write");
        assert_eq!(collect(&storage), vec![1, 2]);
        assert!(storage.get_block(3).expect("get").is_none());
        storage.reset().expect("reset");
        assert!(collect(&storage).is_empty());
        assert!(storage.get_block(1).expect("get").is_none());
    }

    #[test]
    fn exhausted_cursor_yields_an_empty_block() {
        let storage = MemoryStorage::new();
        let mut iter = storage.for_each();
        let sentinel = iter.next().expect("next");
        assert!(iter.done());
        assert_eq!(sentinel, Block::default());
    }
}
