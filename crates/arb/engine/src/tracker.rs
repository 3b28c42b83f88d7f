use crate::{chain::BlockTree, error::EngineError};
use alloy_eips::BlockNumHash;
use alloy_primitives::B256;
use arb_chain_primitives::MessageBlockConverter;
use parking_lot::Mutex;
use std::{sync::Arc, time::Duration};
use tracing::{debug, error, trace, warn};

/// How long [`DigestMessageTracker::ensure_consistency`] waits by default.
pub const CONSISTENCY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DigestResponse {
    message_index: u64,
    block_hash: B256,
}

/// Remembers the last digest response handed out and checks that the chain tip agrees with it.
///
/// Assumes consensus sends one digest at a time and never the next before the previous answer.
#[derive(Debug)]
pub struct DigestMessageTracker {
    tree: Arc<BlockTree>,
    converter: MessageBlockConverter,
    last: Mutex<Option<DigestResponse>>,
}

impl DigestMessageTracker {
    pub fn new(tree: Arc<BlockTree>, converter: MessageBlockConverter) -> Self {
        Self { tree, converter, last: Mutex::new(None) }
    }

    pub fn record(&self, message_index: u64, block_hash: B256) {
        trace!(target: "arb::engine", message_index, %block_hash, "recorded digest response");
        *self.last.lock() = Some(DigestResponse { message_index, block_hash });
    }

    /// Waits until the tip is the block last handed out for `message_index - 1`.
    ///
    /// Returns `true` right away when nothing was recorded for that index, and `false` if the
    /// tip does not catch up within `timeout`.
    pub async fn ensure_consistency(&self, message_index: u64, timeout: Duration) -> bool {
        let Some(previous) = message_index.checked_sub(1) else { return true };
        let Some(response) = *self.last.lock() else { return true };
        if response.message_index != previous {
            debug!(
                target: "arb::engine",
                message_index = previous,
                "no recorded response, skipping consistency check"
            );
            return true;
        }
        let Ok(number) = self.converter.message_index_to_block_number(previous) else {
            return true;
        };
        let expected = BlockNumHash::new(number, response.block_hash);

        let mut head = self.tree.subscribe_head();
        let reached = head.wait_for(|tip| *tip == Some(expected));
        let outcome = tokio::time::timeout(timeout, reached).await;
        match outcome {
            Ok(Ok(_)) => true,
            Ok(Err(_)) => false,
            Err(_) => {
                warn!(
                    target: "arb::engine",
                    message_index,
                    timeout = ?timeout,
                    "tip did not reach the last digest response"
                );
                false
            }
        }
    }

    /// Fails if the tip is already past the block `message_index` is about to produce.
    pub fn validate_tip_advancement(&self, message_index: u64) -> Result<(), EngineError> {
        let expected = self.converter.message_index_to_block_number(message_index)?;
        let Some(tip) = self.tree.head_num_hash() else { return Ok(()) };
        if tip.number > expected {
            error!(
                target: "arb::engine",
                tip = tip.number,
                expected,
                message_index,
                "tip has advanced beyond the message being digested"
            );
            let tip = tip.number;
            return Err(EngineError::TipAdvanced { index: message_index, expected, tip });
        }
        Ok(())
    }
}
