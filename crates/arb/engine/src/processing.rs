//! Verification pipeline for blocks built off the main state.
//!
//! A block handed to the [`ProcessingQueue`] is first announced as the new best block, then
//! re-checked and committed by a background task, which reports the verdict through a
//! [`ProcessingEvent::BlockRemoved`]. Producers await the verdict for one hash through a
//! [`BlockWaiter`] instead of filtering the event stream.

use crate::chain::{BlockTree, ExecutedBlock};
use alloy_primitives::B256;
use arb_chain_arbos::{ArbosState, WorldState};
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Terminal status of a processed block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingResult {
    Success,
    /// The block was rejected.
    ProcessingError(String),
    /// Processing itself broke.
    Exception(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingEvent {
    NewBestBlock(B256),
    BlockRemoved { hash: B256, result: ProcessingResult },
}

#[derive(Debug, Default)]
struct Pending {
    best: Option<oneshot::Sender<()>>,
    removed: Option<oneshot::Sender<ProcessingResult>>,
}

type Registry = Arc<Mutex<HashMap<B256, Pending>>>;

/// Receives the verdict for a single block. Unregisters itself when dropped.
#[derive(Debug)]
pub struct BlockWaiter {
    hash: B256,
    best: oneshot::Receiver<()>,
    removed: oneshot::Receiver<ProcessingResult>,
    registry: Registry,
}

impl BlockWaiter {
    pub fn hash(&self) -> B256 {
        self.hash
    }

    /// Resolves once the block was announced and removed from the queue. `None` means the
    /// pipeline shut down first.
    pub async fn wait(&mut self) -> Option<ProcessingResult> {
        (&mut self.best).await.ok()?;
        (&mut self.removed).await.ok()
    }
}

impl Drop for BlockWaiter {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.hash);
    }
}

/// Handle to the processing task.
#[derive(Debug, Clone)]
pub struct ProcessingQueue {
    blocks: mpsc::UnboundedSender<ExecutedBlock>,
    events: broadcast::Sender<ProcessingEvent>,
    registry: Registry,
}

impl ProcessingQueue {
    /// Spawns the processing task committing into `tree`. The task exits on `shutdown`.
    pub fn spawn(tree: Arc<BlockTree>, shutdown: CancellationToken) -> Self {
        let (blocks, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(128);
        let registry = Registry::default();

        let worker = Worker { tree, events: events.clone(), registry: registry.clone() };
        tokio::spawn(worker.run(rx, shutdown));

        Self { blocks, events, registry }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProcessingEvent> {
        self.events.subscribe()
    }

    /// Registers interest in the verdict for `hash`. Register before enqueueing the block.
    pub fn register(&self, hash: B256) -> BlockWaiter {
        let (best_tx, best) = oneshot::channel();
        let (removed_tx, removed) = oneshot::channel();
        self.registry
            .lock()
            .insert(hash, Pending { best: Some(best_tx), removed: Some(removed_tx) });
        BlockWaiter { hash, best, removed, registry: self.registry.clone() }
    }

    /// Queues `block`. Returns it back if the task is gone.
    pub fn enqueue(&self, block: ExecutedBlock) -> Result<(), ExecutedBlock> {
        self.blocks.send(block).map_err(|err| err.0)
    }
}

struct Worker {
    tree: Arc<BlockTree>,
    events: broadcast::Sender<ProcessingEvent>,
    registry: Registry,
}

impl Worker {
    async fn run(
        self,
        mut rx: mpsc::UnboundedReceiver<ExecutedBlock>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(target: "arb::engine", "processing queue shutting down");
                    break;
                }
                block = rx.recv() => {
                    let Some(block) = block else { break };
                    self.process(block);
                }
            }
        }
    }

    fn process(&self, block: ExecutedBlock) {
        let hash = block.hash();
        self.emit(ProcessingEvent::NewBestBlock(hash));

        let result = match verify(&block) {
            Ok(()) => match self.tree.commit(block) {
                Ok(_) => ProcessingResult::Success,
                Err(err) => ProcessingResult::ProcessingError(err.to_string()),
            },
            Err(result) => result,
        };

        match &result {
            ProcessingResult::Success => {
                debug!(target: "arb::engine", block = %hash, "block processed")
            }
            ProcessingResult::ProcessingError(message) => {
                warn!(target: "arb::engine", block = %hash, %message, "block rejected")
            }
            ProcessingResult::Exception(message) => {
                error!(target: "arb::engine", block = %hash, %message, "block processing failed")
            }
        }
        self.emit(ProcessingEvent::BlockRemoved { hash, result });
    }

    fn emit(&self, event: ProcessingEvent) {
        if let Some(pending) = self.registry.lock().get_mut(event_hash(&event)) {
            match &event {
                ProcessingEvent::NewBestBlock(_) => {
                    if let Some(tx) = pending.best.take() {
                        let _ = tx.send(());
                    }
                }
                ProcessingEvent::BlockRemoved { result, .. } => {
                    if let Some(tx) = pending.removed.take() {
                        let _ = tx.send(result.clone());
                    }
                }
            }
        }
        // no subscribers is fine
        let _ = self.events.send(event);
    }
}

fn event_hash(event: &ProcessingEvent) -> &B256 {
    match event {
        ProcessingEvent::NewBestBlock(hash) | ProcessingEvent::BlockRemoved { hash, .. } => hash,
    }
}

/// Re-checks what the builder committed to in the header.
fn verify(block: &ExecutedBlock) -> Result<(), ProcessingResult> {
    let header = &block.header;
    let state_root = block.state.state_root();
    if header.state_root != state_root {
        return Err(ProcessingResult::ProcessingError(format!(
            "state root mismatch: header {}, computed {state_root}",
            header.state_root
        )));
    }

    let gas_used = block.receipts.last().map_or(0, |receipt| receipt.cumulative_gas_used);
    if header.gas_used != gas_used {
        return Err(ProcessingResult::ProcessingError(format!(
            "gas used mismatch: header {}, receipts {gas_used}",
            header.gas_used
        )));
    }

    ArbosState::open(block.state.as_ref())
        .map_err(|err| ProcessingResult::Exception(err.to_string()))?;
    Ok(())
}
