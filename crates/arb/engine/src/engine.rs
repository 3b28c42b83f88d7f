//! The execution engine consensus drives: one message in, one block out.
//!
//! Block production holds a single build slot acquired without waiting. A caller that finds the
//! slot taken gets [`EngineError::BuildInProgress`] and retries. Everything else reads the
//! [`BlockTree`] concurrently.

use crate::{
    args::{BuildMode, EngineConfig},
    builder::{genesis_block, BlockBuilder},
    chain::{BlockTree, ExecutedBlock},
    error::EngineError,
    prefetch::Prefetcher,
    processing::{ProcessingQueue, ProcessingResult},
    sync_monitor::{FinalityData, SyncMonitor},
    tracker::{DigestMessageTracker, CONSISTENCY_TIMEOUT},
};
use alloy_primitives::{B256, U256};
use arb_chain_arbos::Evm;
use arb_chain_primitives::{
    ChainConfig, ConsensusSyncData, HeaderInfo, InboundMessage, MessageBlockConverter,
    MessageResult,
};
use serde_json::Value;
use std::{
    collections::BTreeMap,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Creates a fresh EVM for every block the engine builds.
pub trait EvmFactory: Send + Sync + 'static {
    type Evm: Evm + Send + 'static;

    fn create_evm(&self) -> Self::Evm;
}

impl<F, E> EvmFactory for F
where
    F: Fn() -> E + Send + Sync + 'static,
    E: Evm + Send + 'static,
{
    type Evm = E;

    fn create_evm(&self) -> E {
        self()
    }
}

#[derive(Debug)]
pub struct ExecutionEngine<F> {
    config: EngineConfig,
    converter: MessageBlockConverter,
    tree: Arc<BlockTree>,
    build_lock: Mutex<()>,
    processing: Option<ProcessingQueue>,
    sync_monitor: SyncMonitor,
    tracker: DigestMessageTracker,
    prefetcher: Prefetcher,
    evm_factory: Arc<F>,
    shutdown: CancellationToken,
}

impl<F: EvmFactory> ExecutionEngine<F> {
    /// Creates an engine on an empty chain.
    ///
    /// In [`BuildMode::WaitForProcessing`] this spawns the processing task and must run inside a
    /// tokio runtime. The task stops when `shutdown` is cancelled.
    pub fn new(
        config: EngineConfig,
        evm_factory: F,
        shutdown: CancellationToken,
    ) -> Result<Self, EngineError> {
        let converter = MessageBlockConverter::new(config.genesis_block_num);
        let tree = Arc::new(BlockTree::new());

        let processing = match config.build_mode {
            BuildMode::MainState => None,
            BuildMode::WaitForProcessing { .. } => {
                Some(ProcessingQueue::spawn(tree.clone(), shutdown.child_token()))
            }
        };
        let sync_monitor = SyncMonitor::new(
            tree.clone(),
            converter,
            config.safe_block_wait_for_validator,
            config.finalized_block_wait_for_validator,
            config.msg_lag,
        )?;
        let tracker = DigestMessageTracker::new(tree.clone(), converter);

        info!(
            target: "arb::engine",
            genesis_block_num = config.genesis_block_num,
            build_mode = ?config.build_mode,
            prefetch = config.prefetch,
            "execution engine created"
        );

        Ok(Self {
            config,
            converter,
            tree,
            build_lock: Mutex::new(()),
            processing,
            sync_monitor,
            tracker,
            prefetcher: Prefetcher::new(),
            evm_factory: Arc::new(evm_factory),
            shutdown,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn tree(&self) -> &Arc<BlockTree> {
        &self.tree
    }

    pub fn processing_queue(&self) -> Option<&ProcessingQueue> {
        self.processing.as_ref()
    }

    /// Cancelled when the engine hits an error it cannot recover from.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Builds the genesis block from the init message. Returns the existing genesis if there is
    /// one.
    pub fn digest_init_message(
        &self,
        initial_l1_base_fee: U256,
        serialized_chain_config: &[u8],
    ) -> Result<MessageResult, EngineError> {
        if let Some(genesis) = self.tree.genesis() {
            debug!(target: "arb::engine", hash = %genesis.hash(), "genesis already initialized");
            return Ok(MessageResult { block_hash: genesis.hash(), send_root: B256::ZERO });
        }

        if initial_l1_base_fee.is_zero() {
            return Err(EngineError::ZeroInitialL1BaseFee);
        }
        if serialized_chain_config.is_empty() {
            return Err(EngineError::EmptyChainConfig);
        }
        let chain_config = ChainConfig::from_json(serialized_chain_config).map_err(|err| {
            error!(target: "arb::engine", %err, "failed to deserialize chain config");
            EngineError::InvalidChainConfig(err)
        })?;
        let configured = self.converter.genesis_block_number();
        if chain_config.arbitrum.genesis_block_num != configured {
            return Err(EngineError::GenesisBlockMismatch {
                configured,
                chain_config: chain_config.arbitrum.genesis_block_num,
            });
        }

        let genesis = genesis_block(&chain_config, serialized_chain_config, initial_l1_base_fee)?;
        let block_hash = genesis.hash();
        self.tree.insert_genesis(genesis);
        Ok(MessageResult { block_hash, send_root: B256::ZERO })
    }

    /// Builds the block for message `index` on top of the head.
    ///
    /// Returns the existing result if the block was already built. With prefetching enabled,
    /// `message_for_prefetch` is executed speculatively once the block is in.
    pub async fn digest_message(
        &self,
        index: u64,
        message: &InboundMessage,
        message_for_prefetch: Option<&InboundMessage>,
    ) -> Result<MessageResult, EngineError> {
        self.digest(index, message, message_for_prefetch)
            .await
            .inspect_err(|err| self.stop_if_fatal(err))
    }

    async fn digest(
        &self,
        index: u64,
        message: &InboundMessage,
        message_for_prefetch: Option<&InboundMessage>,
    ) -> Result<MessageResult, EngineError> {
        if let Ok(existing) = self.result_at_message_index(index) {
            trace!(
                target: "arb::engine",
                index,
                hash = %existing.block_hash,
                "message already digested"
            );
            return Ok(existing);
        }

        let Ok(_guard) = self.build_lock.try_lock() else {
            return Err(EngineError::BuildInProgress);
        };

        // contention is reported before any waiting
        if !self.tracker.ensure_consistency(index, CONSISTENCY_TIMEOUT).await {
            warn!(
                target: "arb::engine",
                index,
                "digesting on a tip that diverged from the last response"
            );
        }

        self.tracker.validate_tip_advancement(index)?;

        let number = self.converter.message_index_to_block_number(index)?;
        let parent = self.tree.head().ok_or(EngineError::MissingGenesis)?;
        if parent.number() + 1 != number {
            let expected = parent.number() + 1;
            return Err(EngineError::WrongBlockNumber { got: number, expected });
        }

        let result = match self.config.build_mode {
            BuildMode::MainState => {
                self.produce_on_main_state(parent, message, message_for_prefetch).await?
            }
            BuildMode::WaitForProcessing { timeout } => {
                self.produce_and_wait(parent, message, timeout).await?
            }
        };

        self.tracker.record(index, result.block_hash);
        Ok(result)
    }

    /// Rewinds to the block of `first_index - 1` and builds `new_messages` on top of it.
    ///
    /// Safe and finalized pointers above the kept block are cleared. Stops at the first message
    /// that fails to build.
    pub async fn reorg(
        &self,
        first_index: u64,
        new_messages: &[InboundMessage],
    ) -> Result<Vec<MessageResult>, EngineError> {
        self.reorg_to(first_index, new_messages).await.inspect_err(|err| self.stop_if_fatal(err))
    }

    async fn reorg_to(
        &self,
        first_index: u64,
        new_messages: &[InboundMessage],
    ) -> Result<Vec<MessageResult>, EngineError> {
        if first_index == 0 {
            return Err(EngineError::ReorgToGenesis);
        }
        let Ok(_guard) = self.build_lock.try_lock() else {
            return Err(EngineError::BuildInProgress);
        };

        let keep_number = self.converter.message_index_to_block_number(first_index - 1)?;
        let keep = self
            .tree
            .canonical_block(keep_number)
            .ok_or(EngineError::ReorgTargetNotFound(keep_number))?;

        // speculation on the old head is worthless now
        self.prefetcher.cancel_and_wait().await;

        let mut safe = self.tree.safe();
        let mut finalized = self.tree.finalized();
        if let Some(current) = safe.filter(|block| block.number > keep_number) {
            info!(
                target: "arb::engine",
                last_block_to_keep = keep_number,
                safe = current.number,
                "reorg target is below the safe block"
            );
            safe = None;
        }
        if let Some(current) = finalized.filter(|block| block.number > keep_number) {
            info!(
                target: "arb::engine",
                last_block_to_keep = keep_number,
                finalized = current.number,
                "reorg target is below the finalized block"
            );
            finalized = None;
        }
        self.tree.fork_choice_updated(finalized, safe);
        self.tree.rewind_to(keep_number)?;
        self.tracker.record(first_index - 1, keep.hash());

        let mut results = Vec::with_capacity(new_messages.len());
        let mut parent = keep;
        for (index, message) in (first_index..).zip(new_messages) {
            let block = self.build(parent, message).await?;
            let committed = self.tree.commit(block)?;
            let result = message_result(&committed);
            self.tracker.record(index, result.block_hash);
            results.push(result);
            parent = committed;
        }

        info!(
            target: "arb::engine",
            first_index,
            replayed = results.len(),
            head = self.tree.head_num_hash().map(|head| head.number),
            "reorg complete"
        );
        Ok(results)
    }

    /// Block hash and send root of the canonical block for message `index`.
    pub fn result_at_message_index(&self, index: u64) -> Result<MessageResult, EngineError> {
        let number = self.converter.message_index_to_block_number(index)?;
        let block = self.tree.canonical_block(number).ok_or(EngineError::MessageNotFound(index))?;
        Ok(message_result(&block))
    }

    /// Message index of the head block, or zero before genesis.
    pub fn head_message_index(&self) -> Result<u64, EngineError> {
        let Some(head) = self.tree.head_num_hash() else { return Ok(0) };
        Ok(self.converter.block_number_to_message_index(head.number)?)
    }

    pub fn message_index_to_block_number(&self, index: u64) -> Result<u64, EngineError> {
        Ok(self.converter.message_index_to_block_number(index)?)
    }

    pub fn block_number_to_message_index(&self, number: u64) -> Result<u64, EngineError> {
        Ok(self.converter.block_number_to_message_index(number)?)
    }

    pub fn set_finality_data(&self, data: &FinalityData) -> Result<(), EngineError> {
        debug!(
            target: "arb::engine",
            safe = ?data.safe.map(|record| record.message_index),
            finalized = ?data.finalized.map(|record| record.message_index),
            validated = ?data.validated.map(|record| record.message_index),
            "set finality data"
        );
        self.sync_monitor.set_finality_data(data).inspect_err(|err| self.stop_if_fatal(err))
    }

    pub fn set_consensus_sync_data(&self, data: ConsensusSyncData) {
        self.sync_monitor.set_consensus_sync_data(data);
    }

    pub fn synced(&self) -> bool {
        self.sync_monitor.synced(self.built_message_count(), now_ms())
    }

    pub fn full_sync_progress_map(&self) -> BTreeMap<String, Value> {
        self.sync_monitor.full_sync_progress_map(self.built_message_count(), now_ms())
    }

    /// ArbOS version the block for message `index` was executed with.
    pub fn arbos_version_for_message_index(&self, index: u64) -> Result<u64, EngineError> {
        let number = self.converter.message_index_to_block_number(index)?;
        let block = self.tree.canonical_block(number).ok_or(EngineError::BlockNotFound(number))?;
        Ok(HeaderInfo::extract_or_default(&block.header).arbos_format_version)
    }

    fn stop_if_fatal(&self, err: &EngineError) {
        if err.is_fatal() {
            error!(target: "arb::engine", %err, "fatal engine error, shutting down");
            self.shutdown.cancel();
        }
    }

    fn built_message_count(&self) -> u64 {
        self.tree
            .head_num_hash()
            .and_then(|head| self.converter.block_number_to_message_index(head.number).ok())
            .map_or(0, |index| index + 1)
    }

    async fn produce_on_main_state(
        &self,
        parent: Arc<ExecutedBlock>,
        message: &InboundMessage,
        message_for_prefetch: Option<&InboundMessage>,
    ) -> Result<MessageResult, EngineError> {
        if self.config.prefetch {
            self.prefetcher.cancel_and_wait().await;
            self.prefetcher.swap_caches();
        }

        let block = self.build(parent, message).await?;
        let committed = self.tree.commit(block)?;

        if let Some(next) = message_for_prefetch.filter(|_| self.config.prefetch) {
            let factory = self.evm_factory.clone();
            self.prefetcher.prefetch_block(committed.clone(), next.clone(), factory);
        }
        Ok(message_result(&committed))
    }

    /// Hands the block to the processing pipeline and waits for its verdict.
    async fn produce_and_wait(
        &self,
        parent: Arc<ExecutedBlock>,
        message: &InboundMessage,
        timeout: Duration,
    ) -> Result<MessageResult, EngineError> {
        let block = self.build(parent, message).await?;
        self.process_and_wait(block, timeout).await
    }

    async fn process_and_wait(
        &self,
        block: ExecutedBlock,
        timeout: Duration,
    ) -> Result<MessageResult, EngineError> {
        let queue = self.processing.as_ref().ok_or(EngineError::PipelineClosed)?;
        let hash = block.hash();
        let result = message_result(&block);

        let mut waiter = queue.register(hash);
        queue.enqueue(block).map_err(|_| EngineError::PipelineClosed)?;

        match tokio::time::timeout(timeout, waiter.wait()).await {
            Err(_) => {
                warn!(
                    target: "arb::engine",
                    block = %hash,
                    ?timeout,
                    "timed out waiting for block processing"
                );
                Err(EngineError::ProcessingTimeout)
            }
            Ok(None) => Err(EngineError::PipelineClosed),
            Ok(Some(ProcessingResult::Success)) => Ok(result),
            Ok(Some(ProcessingResult::ProcessingError(message))) => {
                Err(EngineError::ProcessingFailed { hash, message })
            }
            Ok(Some(ProcessingResult::Exception(message))) => {
                error!(target: "arb::engine", block = %hash, %message, "block processing failed");
                Err(EngineError::ProcessingException { hash, message })
            }
        }
    }

    /// Builds on a blocking thread. The build slot stays held for the duration.
    async fn build(
        &self,
        parent: Arc<ExecutedBlock>,
        message: &InboundMessage,
    ) -> Result<ExecutedBlock, EngineError> {
        let message = message.clone();
        let factory = self.evm_factory.clone();
        let prewarm = self.config.prefetch.then(|| self.prefetcher.caches().front());

        let block = tokio::task::spawn_blocking(move || {
            let mut evm = factory.create_evm();
            let builder = BlockBuilder::new(&parent, &message, &mut evm);
            match &prewarm {
                Some(cache) => builder.with_prewarm(cache).build(),
                None => builder.build(),
            }
        })
        .await??;

        Ok(block)
    }
}

fn message_result(block: &ExecutedBlock) -> MessageResult {
    let info = HeaderInfo::extract(&block.header).unwrap_or_else(|| {
        warn!(target: "arb::engine", block = %block.hash(), "block carries no header info");
        HeaderInfo::default()
    });
    MessageResult { block_hash: block.hash(), send_root: info.send_root }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
}
