//! Reconciles the finality checkpoints and sync status reported by consensus with the local chain.

use crate::{chain::BlockTree, error::EngineError, sync_history::SyncHistory};
use alloy_eips::BlockNumHash;
use arb_chain_primitives::{ConsensusSyncData, FinalityRecord, MessageBlockConverter};
use parking_lot::Mutex;
use serde_json::Value;
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use tracing::{debug, error};

/// Checkpoints reported by consensus. Absent records leave the current pointer alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FinalityData {
    pub safe: Option<FinalityRecord>,
    pub finalized: Option<FinalityRecord>,
    pub validated: Option<FinalityRecord>,
}

#[derive(Debug)]
struct ConsensusState {
    data: Option<ConsensusSyncData>,
    history: SyncHistory,
}

#[derive(Debug)]
pub struct SyncMonitor {
    tree: Arc<BlockTree>,
    converter: MessageBlockConverter,
    safe_block_wait_for_validator: bool,
    finalized_block_wait_for_validator: bool,
    finality_lock: Mutex<()>,
    consensus: Mutex<ConsensusState>,
}

impl SyncMonitor {
    pub fn new(
        tree: Arc<BlockTree>,
        converter: MessageBlockConverter,
        safe_block_wait_for_validator: bool,
        finalized_block_wait_for_validator: bool,
        msg_lag: Duration,
    ) -> Result<Self, EngineError> {
        let history = SyncHistory::new(msg_lag)?;
        Ok(Self {
            tree,
            converter,
            safe_block_wait_for_validator,
            finalized_block_wait_for_validator,
            finality_lock: Mutex::new(()),
            consensus: Mutex::new(ConsensusState { data: None, history }),
        })
    }

    /// Moves the safe and finalized pointers.
    ///
    /// Every record whose block exists locally must carry the local hash. A mismatch is fatal.
    /// Records for blocks not built yet are skipped and leave the pointer where it is.
    pub fn set_finality_data(&self, data: &FinalityData) -> Result<(), EngineError> {
        let _guard = self.finality_lock.lock();

        let safe = self.validate("safe", data.safe)?;
        let finalized = self.validate("finalized", data.finalized)?;
        let validated = self.validate("validated", data.validated)?;

        let safe = wait_for_validator(
            self.safe_block_wait_for_validator,
            data.safe,
            safe,
            data.validated,
            validated,
        )?;
        let finalized = wait_for_validator(
            self.finalized_block_wait_for_validator,
            data.finalized,
            finalized,
            data.validated,
            validated,
        )?;

        let current_safe = self.tree.safe();
        let current_finalized = self.tree.finalized();
        let new_safe = safe.or(current_safe);
        let new_finalized = finalized.or(current_finalized);

        if new_safe == current_safe && new_finalized == current_finalized {
            return Ok(());
        }

        debug!(
            target: "arb::sync",
            safe = ?new_safe.map(|block| block.number),
            finalized = ?new_finalized.map(|block| block.number),
            "applying finality data"
        );
        self.tree.fork_choice_updated(new_finalized, new_safe);
        Ok(())
    }

    /// The local block `record` points at, if it was built already.
    fn validate(
        &self,
        kind: &'static str,
        record: Option<FinalityRecord>,
    ) -> Result<Option<BlockNumHash>, EngineError> {
        let Some(record) = record else { return Ok(None) };
        let number = self.converter.message_index_to_block_number(record.message_index)?;

        let Some(actual) = self.tree.canonical_hash(number) else {
            debug!(target: "arb::sync", kind, number, "finality block not found locally");
            return Ok(None);
        };
        if actual != record.block_hash {
            error!(
                target: "arb::sync",
                kind,
                number,
                expected = %record.block_hash,
                %actual,
                "finality block hash mismatch"
            );
            return Err(EngineError::FinalityMismatch {
                kind,
                number,
                expected: record.block_hash,
                actual,
            });
        }
        Ok(Some(BlockNumHash::new(number, actual)))
    }

    pub fn set_consensus_sync_data(&self, data: ConsensusSyncData) {
        let mut consensus = self.consensus.lock();
        consensus.history.add(data.max_message_count, data.updated_at);
        debug!(
            target: "arb::sync",
            synced = data.synced,
            max_message_count = data.max_message_count,
            "consensus sync data updated"
        );
        consensus.data = Some(data);
    }

    /// Whether consensus reports synced and execution has built up to the message count consensus
    /// had one message lag ago.
    pub fn synced(&self, built_message_count: u64, now_ms: u64) -> bool {
        let consensus = self.consensus.lock();
        let Some(data) = &consensus.data else { return false };
        data.synced && built_message_count >= consensus.history.sync_target(now_ms)
    }

    /// The consensus progress map extended with the execution side.
    pub fn full_sync_progress_map(
        &self,
        built_message_count: u64,
        now_ms: u64,
    ) -> BTreeMap<String, Value> {
        let consensus = self.consensus.lock();
        let mut map = consensus
            .data
            .as_ref()
            .map(|data| data.sync_progress_map.clone())
            .unwrap_or_default();

        if let Some(data) = &consensus.data {
            map.insert("consensusMaxMessageCount".into(), data.max_message_count.into());
        }
        map.insert(
            "executionSyncTarget".into(),
            consensus.history.sync_target(now_ms).into(),
        );
        map.insert("executionMessageCount".into(), built_message_count.into());
        map
    }
}

/// Holds `block` back to the validated block when `record` is ahead of the validator.
///
/// The comparison uses the reported message indices. A validated block that is not known
/// locally yields no pointer.
fn wait_for_validator(
    enabled: bool,
    record: Option<FinalityRecord>,
    block: Option<BlockNumHash>,
    validated: Option<FinalityRecord>,
    validated_block: Option<BlockNumHash>,
) -> Result<Option<BlockNumHash>, EngineError> {
    let Some(record) = record else { return Ok(None) };
    if !enabled {
        return Ok(block);
    }

    let validated = validated.ok_or(EngineError::ValidatorNotSet)?;
    if record.message_index > validated.message_index {
        return Ok(validated_block);
    }
    Ok(block)
}
