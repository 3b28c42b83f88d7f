//! Cross-checks produced blocks against a trusted reference node.
//!
//! Every `interval`-th block is digested while the same block is fetched from the reference. On a
//! mismatch the first diverging block since the last verified one is located by binary search,
//! logged, and the engine's shutdown token is cancelled. The node does not try to heal itself.

use crate::{
    engine::{EvmFactory, ExecutionEngine},
    error::{ComparisonError, EngineError},
};
use alloy_primitives::B256;
use arb_chain_primitives::{InboundMessage, MessageResult};
use jsonrpsee::{
    core::client::ClientT,
    http_client::{HttpClient, HttpClientBuilder},
    rpc_params,
};
use parking_lot::Mutex;
use serde::Deserialize;
use std::{future::Future, sync::Arc, time::Duration};
use tracing::{debug, error, info, trace, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Source of the block results the local chain is compared against.
pub trait ReferenceSource: Send + Sync {
    fn block_result(
        &self,
        number: u64,
    ) -> impl Future<Output = Result<MessageResult, ComparisonError>> + Send;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcBlock {
    hash: B256,
    #[serde(default)]
    send_root: B256,
}

/// Fetches reference blocks over `eth_getBlockByNumber`.
#[derive(Debug, Clone)]
pub struct ComparisonRpcClient {
    client: HttpClient,
    max_retries: u32,
}

impl ComparisonRpcClient {
    pub fn new(url: &str, max_retries: u32) -> Result<Self, ComparisonError> {
        let client = HttpClientBuilder::default().request_timeout(REQUEST_TIMEOUT).build(url)?;
        Ok(Self { client, max_retries })
    }

    async fn fetch(&self, number: u64) -> Result<MessageResult, ComparisonError> {
        trace!(target: "arb::comparison", number, "fetching reference block");
        let block: Option<RpcBlock> = self
            .client
            .request("eth_getBlockByNumber", rpc_params![format!("0x{number:x}"), false])
            .await?;
        let block = block.ok_or(ComparisonError::MissingBlock(number))?;

        debug!(
            target: "arb::comparison",
            number,
            hash = %block.hash,
            send_root = %block.send_root,
            "reference block"
        );
        Ok(MessageResult { block_hash: block.hash, send_root: block.send_root })
    }
}

impl ReferenceSource for ComparisonRpcClient {
    async fn block_result(&self, number: u64) -> Result<MessageResult, ComparisonError> {
        for attempt in 0..self.max_retries {
            match self.fetch(number).await {
                Ok(result) => return Ok(result),
                Err(err) => {
                    debug!(
                        target: "arb::comparison",
                        number,
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        %err,
                        "failed to fetch reference block"
                    );
                    if attempt + 1 < self.max_retries {
                        tokio::time::sleep(retry_delay(attempt)).await;
                    }
                }
            }
        }

        error!(
            target: "arb::comparison",
            number,
            attempts = self.max_retries,
            "giving up on reference block"
        );
        Err(ComparisonError::Exhausted { number, attempts: self.max_retries })
    }
}

/// Backoff before the attempt following `attempt`.
const fn retry_delay(attempt: u32) -> Duration {
    Duration::from_secs(5 + attempt as u64)
}

/// Wraps an [`ExecutionEngine`] and compares its blocks with a [`ReferenceSource`].
#[derive(Debug)]
pub struct ComparisonGuard<F, S> {
    engine: Arc<ExecutionEngine<F>>,
    source: S,
    interval: u64,
    last_verified: Mutex<u64>,
}

impl<F: EvmFactory, S: ReferenceSource> ComparisonGuard<F, S> {
    /// `interval` must be positive.
    pub fn new(engine: Arc<ExecutionEngine<F>>, source: S, interval: u64) -> Self {
        let genesis = engine.config().genesis_block_num;
        Self { engine, source, interval: interval.max(1), last_verified: Mutex::new(genesis) }
    }

    pub fn engine(&self) -> &Arc<ExecutionEngine<F>> {
        &self.engine
    }

    /// Highest block number that matched the reference.
    pub fn last_verified(&self) -> u64 {
        *self.last_verified.lock()
    }

    /// [`ExecutionEngine::digest_message`], compared against the reference on every
    /// `interval`-th block.
    pub async fn digest_message(
        &self,
        index: u64,
        message: &InboundMessage,
        message_for_prefetch: Option<&InboundMessage>,
    ) -> Result<MessageResult, EngineError> {
        let number = self.engine.message_index_to_block_number(index)?;
        if number % self.interval != 0 {
            return self.engine.digest_message(index, message, message_for_prefetch).await;
        }

        let (digested, reference) = tokio::join!(
            self.engine.digest_message(index, message, message_for_prefetch),
            self.source.block_result(number),
        );
        let digested = digested?;
        let reference = match reference {
            Ok(reference) => reference,
            Err(err) => {
                warn!(
                    target: "arb::comparison",
                    number,
                    %err,
                    "skipping comparison, reference unavailable"
                );
                return Ok(digested);
            }
        };

        if digested == reference {
            *self.last_verified.lock() = number;
            info!(
                target: "arb::comparison",
                number,
                hash = %digested.block_hash,
                "block matches reference"
            );
            return Ok(digested);
        }

        let start = self.last_verified() + 1;
        let first_mismatch = self.find_first_mismatch(start, number).await;
        error!(
            target: "arb::comparison",
            first_mismatch,
            detected_at = number,
            searched_from = start,
            local_hash = %digested.block_hash,
            local_send_root = %digested.send_root,
            reference_hash = %reference.block_hash,
            reference_send_root = %reference.send_root,
            "block comparison mismatch detected, shutting down"
        );
        self.engine.shutdown_token().cancel();
        Err(EngineError::ComparisonMismatch { first_mismatch, detected_at: number })
    }

    /// First block in `low..=high` that disagrees with the reference. `high` is known to disagree.
    async fn find_first_mismatch(&self, mut low: u64, mut high: u64) -> u64 {
        while low < high {
            let mid = low + (high - low) / 2;
            if self.is_mismatch(mid).await {
                high = mid;
            } else {
                low = mid + 1;
            }
        }
        high
    }

    async fn is_mismatch(&self, number: u64) -> bool {
        let local = self
            .engine
            .block_number_to_message_index(number)
            .and_then(|index| self.engine.result_at_message_index(index));
        let Ok(local) = local else { return true };
        match self.source.block_result(number).await {
            Ok(reference) => reference != local,
            Err(err) => {
                debug!(
                    target: "arb::comparison",
                    number,
                    %err,
                    "reference lookup failed during search"
                );
                true
            }
        }
    }
}
