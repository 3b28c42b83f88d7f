//! In-memory canonical chain.
//!
//! Every block keeps its post-state so the next block can be built on top of it and a reorg can
//! rewind to any kept block without re-executing.

use alloy_consensus::Header;
use alloy_eips::BlockNumHash;
use alloy_primitives::{Sealed, B256};
use arb_chain_arbos::{InMemoryWorldState, TxReceipt};
use arb_chain_primitives::ArbTransaction;
use parking_lot::RwLock;
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};
use tokio::sync::watch;
use tracing::{debug, info};

/// A block together with everything executing it produced.
#[derive(Debug, Clone)]
pub struct ExecutedBlock {
    pub header: Sealed<Header>,
    pub transactions: Vec<ArbTransaction>,
    pub receipts: Vec<TxReceipt>,
    pub state: Arc<InMemoryWorldState>,
}

impl ExecutedBlock {
    pub fn hash(&self) -> B256 {
        self.header.hash()
    }

    pub fn number(&self) -> u64 {
        self.header.number
    }

    pub fn num_hash(&self) -> BlockNumHash {
        BlockNumHash::new(self.number(), self.hash())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    #[error("block {number} does not extend head {head}")]
    NotChild { number: u64, head: u64 },
    #[error("parent hash {got} does not match head hash {expected}")]
    ParentMismatch { expected: B256, got: B256 },
    #[error("block {0} is not canonical")]
    NotCanonical(u64),
}

#[derive(Debug, Default)]
struct TreeInner {
    blocks: HashMap<B256, Arc<ExecutedBlock>>,
    canonical: BTreeMap<u64, B256>,
    safe: Option<BlockNumHash>,
    finalized: Option<BlockNumHash>,
}

impl TreeInner {
    fn head(&self) -> Option<Arc<ExecutedBlock>> {
        let (_, hash) = self.canonical.last_key_value()?;
        self.blocks.get(hash).cloned()
    }
}

/// The canonical chain plus the safe and finalized pointers.
#[derive(Debug)]
pub struct BlockTree {
    inner: RwLock<TreeInner>,
    head_tx: watch::Sender<Option<BlockNumHash>>,
}

impl Default for BlockTree {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockTree {
    pub fn new() -> Self {
        let (head_tx, _) = watch::channel(None);
        Self { inner: RwLock::new(TreeInner::default()), head_tx }
    }

    pub fn head(&self) -> Option<Arc<ExecutedBlock>> {
        self.inner.read().head()
    }

    pub fn head_num_hash(&self) -> Option<BlockNumHash> {
        self.inner.read().head().map(|block| block.num_hash())
    }

    pub fn genesis(&self) -> Option<Arc<ExecutedBlock>> {
        let inner = self.inner.read();
        let (_, hash) = inner.canonical.first_key_value()?;
        inner.blocks.get(hash).cloned()
    }

    pub fn canonical_block(&self, number: u64) -> Option<Arc<ExecutedBlock>> {
        let inner = self.inner.read();
        inner.canonical.get(&number).and_then(|hash| inner.blocks.get(hash)).cloned()
    }

    pub fn canonical_hash(&self, number: u64) -> Option<B256> {
        self.inner.read().canonical.get(&number).copied()
    }

    pub fn block_by_hash(&self, hash: B256) -> Option<Arc<ExecutedBlock>> {
        self.inner.read().blocks.get(&hash).cloned()
    }

    pub fn safe(&self) -> Option<BlockNumHash> {
        self.inner.read().safe
    }

    pub fn finalized(&self) -> Option<BlockNumHash> {
        self.inner.read().finalized
    }

    /// Notifies on every head change.
    pub fn subscribe_head(&self) -> watch::Receiver<Option<BlockNumHash>> {
        self.head_tx.subscribe()
    }

    /// Starts the chain at `block`, whatever its number.
    pub fn insert_genesis(&self, block: ExecutedBlock) {
        let num_hash = block.num_hash();
        {
            let mut inner = self.inner.write();
            *inner = TreeInner::default();
            inner.canonical.insert(num_hash.number, num_hash.hash);
            inner.blocks.insert(num_hash.hash, Arc::new(block));
        }
        info!(
            target: "arb::engine",
            number = num_hash.number,
            hash = %num_hash.hash,
            "genesis block inserted"
        );
        self.head_tx.send_replace(Some(num_hash));
    }

    /// Appends `block` to the canonical chain as the new head.
    pub fn commit(&self, block: ExecutedBlock) -> Result<Arc<ExecutedBlock>, ChainError> {
        let block = Arc::new(block);
        let num_hash = block.num_hash();
        {
            let mut inner = self.inner.write();
            if let Some(head) = inner.head() {
                if head.number() + 1 != num_hash.number {
                    return Err(ChainError::NotChild {
                        number: num_hash.number,
                        head: head.number(),
                    });
                }
                if head.hash() != block.header.parent_hash {
                    return Err(ChainError::ParentMismatch {
                        expected: head.hash(),
                        got: block.header.parent_hash,
                    });
                }
            }
            inner.canonical.insert(num_hash.number, num_hash.hash);
            inner.blocks.insert(num_hash.hash, block.clone());
        }
        debug!(target: "arb::engine", number = num_hash.number, hash = %num_hash.hash, "new head");
        self.head_tx.send_replace(Some(num_hash));
        Ok(block)
    }

    /// Drops every canonical block above `number`, making `number` the head.
    pub fn rewind_to(&self, number: u64) -> Result<BlockNumHash, ChainError> {
        let head = {
            let mut inner = self.inner.write();
            let hash = *inner.canonical.get(&number).ok_or(ChainError::NotCanonical(number))?;
            let dropped = inner.canonical.split_off(&(number + 1));
            for hash in dropped.values() {
                inner.blocks.remove(hash);
            }
            BlockNumHash::new(number, hash)
        };
        info!(target: "arb::engine", number, hash = %head.hash, "chain rewound");
        self.head_tx.send_replace(Some(head));
        Ok(head)
    }

    /// Moves the safe and finalized pointers. `None` clears a pointer.
    pub fn fork_choice_updated(
        &self,
        finalized: Option<BlockNumHash>,
        safe: Option<BlockNumHash>,
    ) {
        let mut inner = self.inner.write();
        inner.finalized = finalized;
        inner.safe = safe;
        debug!(
            target: "arb::engine",
            finalized = ?finalized.map(|b| b.number),
            safe = ?safe.map(|b| b.number),
            "fork choice updated"
        );
    }
}
