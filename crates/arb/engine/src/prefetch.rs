//! Speculative execution of the next message.
//!
//! While message `n` is digested the prefetcher runs message `n + 1` on a snapshot of the head
//! state and records every storage slot it touches into the back buffer of a
//! [`DoubleBufferedCache`]. The engine cancels and joins the prefetch before swapping the buffers,
//! so the slots the real build reads from the front buffer always come from a finished run.

use crate::{builder::BlockBuilder, chain::ExecutedBlock, engine::EvmFactory, error::BuildError};
use alloy_primitives::{Address, B256, U256};
use arb_chain_arbos::{state::Checkpoint, InMemoryWorldState, WorldState};
use arb_chain_primitives::InboundMessage;
use parking_lot::{Mutex, RwLock};
use std::{
    cell::RefCell,
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
    time::Instant,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Storage slots worth loading before a block runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrewarmCache {
    slots: BTreeMap<Address, BTreeSet<B256>>,
}

impl PrewarmCache {
    pub fn record(&mut self, address: Address, slot: B256) {
        self.slots.entry(address).or_default().insert(slot);
    }

    pub fn contains(&self, address: Address, slot: B256) -> bool {
        self.slots.get(&address).is_some_and(|slots| slots.contains(&slot))
    }

    pub fn len(&self) -> usize {
        self.slots.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn merge(&mut self, other: Self) {
        for (address, slots) in other.slots {
            self.slots.entry(address).or_default().extend(slots);
        }
    }

    /// Hands every recorded slot to [`WorldState::prewarm`].
    pub fn apply<S: WorldState + ?Sized>(&self, state: &mut S) {
        for (address, slots) in &self.slots {
            let slots: Vec<B256> = slots.iter().copied().collect();
            state.prewarm(*address, &slots);
        }
    }
}

/// A readable front buffer and a back buffer being filled.
#[derive(Debug, Default)]
pub struct DoubleBufferedCache {
    front: RwLock<Arc<PrewarmCache>>,
    back: Mutex<PrewarmCache>,
}

impl DoubleBufferedCache {
    pub fn front(&self) -> Arc<PrewarmCache> {
        self.front.read().clone()
    }

    pub fn fill_back(&self, cache: PrewarmCache) {
        self.back.lock().merge(cache);
    }

    /// Publishes the back buffer and leaves an empty one in its place.
    pub fn swap(&self) {
        let filled = std::mem::take(&mut *self.back.lock());
        *self.front.write() = Arc::new(filled);
    }
}

/// Records the storage slots read or written through it.
#[derive(Debug)]
pub struct RecordingState<'a> {
    inner: &'a mut InMemoryWorldState,
    touched: RefCell<PrewarmCache>,
}

impl<'a> RecordingState<'a> {
    pub fn new(inner: &'a mut InMemoryWorldState) -> Self {
        Self { inner, touched: RefCell::default() }
    }

    pub fn into_touched(self) -> PrewarmCache {
        self.touched.into_inner()
    }
}

impl WorldState for RecordingState<'_> {
    fn balance(&self, address: Address) -> U256 {
        self.inner.balance(address)
    }

    fn set_balance(&mut self, address: Address, balance: U256) {
        self.inner.set_balance(address, balance)
    }

    fn nonce(&self, address: Address) -> u64 {
        self.inner.nonce(address)
    }

    fn set_nonce(&mut self, address: Address, nonce: u64) {
        self.inner.set_nonce(address, nonce)
    }

    fn storage(&self, address: Address, slot: B256) -> B256 {
        self.touched.borrow_mut().record(address, slot);
        self.inner.storage(address, slot)
    }

    fn set_storage(&mut self, address: Address, slot: B256, value: B256) {
        self.touched.get_mut().record(address, slot);
        self.inner.set_storage(address, slot, value)
    }

    fn checkpoint(&mut self) -> Checkpoint {
        self.inner.checkpoint()
    }

    fn revert_to(&mut self, checkpoint: Checkpoint) {
        self.inner.revert_to(checkpoint)
    }

    fn discard(&mut self, checkpoint: Checkpoint) {
        self.inner.discard(checkpoint)
    }

    fn state_root(&self) -> B256 {
        self.inner.state_root()
    }
}

#[derive(Debug)]
struct PrefetchTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Runs at most one speculative block at a time.
#[derive(Debug, Default)]
pub struct Prefetcher {
    caches: Arc<DoubleBufferedCache>,
    task: Mutex<Option<PrefetchTask>>,
}

impl Prefetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn caches(&self) -> &Arc<DoubleBufferedCache> {
        &self.caches
    }

    /// Starts executing `message` on top of `parent` in the background.
    ///
    /// The caller must [`cancel_and_wait`](Self::cancel_and_wait) for the previous prefetch
    /// first. One still registered here is cancelled and detached.
    pub fn prefetch_block<F: EvmFactory>(
        &self,
        parent: Arc<ExecutedBlock>,
        message: InboundMessage,
        evm_factory: Arc<F>,
    ) {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let caches = self.caches.clone();

        let handle = tokio::task::spawn_blocking(move || {
            let mut scratch = InMemoryWorldState::clone(&parent.state);
            let mut recording = RecordingState::new(&mut scratch);
            let mut evm = evm_factory.create_evm();

            let result = BlockBuilder::new(&parent, &message, &mut evm)
                .with_cancellation(&token)
                .execute(&mut recording);
            let touched = recording.into_touched();

            match result {
                Ok(_) | Err(BuildError::Cancelled) => {
                    debug!(
                        target: "arb::prefetch",
                        number = parent.number() + 1,
                        slots = touched.len(),
                        cancelled = token.is_cancelled(),
                        "prefetch finished"
                    );
                    caches.fill_back(touched);
                }
                Err(err) => {
                    debug!(target: "arb::prefetch", %err, "prefetch failed");
                }
            }
        });

        if let Some(previous) = self.task.lock().replace(PrefetchTask { cancel, handle }) {
            warn!(target: "arb::prefetch", "replacing a prefetch that was never joined");
            previous.cancel.cancel();
        }
    }

    /// Cancels the running prefetch, if any, and waits for it to stop.
    pub async fn cancel_and_wait(&self) {
        let Some(task) = self.task.lock().take() else { return };
        let pending = !task.handle.is_finished();
        task.cancel.cancel();

        let started = Instant::now();
        if let Err(err) = task.handle.await {
            warn!(target: "arb::prefetch", %err, "prefetch task panicked");
        }
        if pending {
            debug!(
                target: "arb::prefetch",
                elapsed = ?started.elapsed(),
                "joined running prefetch"
            );
        }
    }

    pub fn swap_caches(&self) {
        self.caches.swap();
    }
}
