//! L1-originated messages and the results handed back for them.

use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};

/// Kind byte of an L1 message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum MessageKind {
    L2Message,
    EndOfBlock,
    L2FundedByL1,
    RollupEvent,
    SubmitRetryable,
    BatchForGasEstimation,
    Initialize,
    EthDeposit,
    BatchPostingReport,
    Invalid,
}

impl From<u8> for MessageKind {
    fn from(kind: u8) -> Self {
        match kind {
            3 => Self::L2Message,
            6 => Self::EndOfBlock,
            7 => Self::L2FundedByL1,
            8 => Self::RollupEvent,
            9 => Self::SubmitRetryable,
            10 => Self::BatchForGasEstimation,
            11 => Self::Initialize,
            12 => Self::EthDeposit,
            13 => Self::BatchPostingReport,
            _ => Self::Invalid,
        }
    }
}

impl From<MessageKind> for u8 {
    fn from(kind: MessageKind) -> Self {
        match kind {
            MessageKind::L2Message => 3,
            MessageKind::EndOfBlock => 6,
            MessageKind::L2FundedByL1 => 7,
            MessageKind::RollupEvent => 8,
            MessageKind::SubmitRetryable => 9,
            MessageKind::BatchForGasEstimation => 10,
            MessageKind::Initialize => 11,
            MessageKind::EthDeposit => 12,
            MessageKind::BatchPostingReport => 13,
            MessageKind::Invalid => 0xff,
        }
    }
}

/// Header of a message delivered by the L1 inbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct L1IncomingMessageHeader {
    pub kind: MessageKind,
    pub sender: Address,
    pub block_number: u64,
    pub timestamp: u64,
    pub request_id: Option<B256>,
    pub l1_base_fee: U256,
}

/// A message accepted from the consensus layer. Ordering is total by message index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub header: L1IncomingMessageHeader,
    pub payload: Bytes,
    /// Gas the batch carrying a posting report cost on L1, filled in by the consensus layer.
    #[serde(default)]
    pub batch_gas_cost: Option<u64>,
    /// Number of delayed inbox messages consumed once this message is applied.
    #[serde(default)]
    pub delayed_messages_read: u64,
}

impl InboundMessage {
    pub fn kind(&self) -> MessageKind {
        self.header.kind
    }
}

/// Outcome of digesting one message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageResult {
    pub block_hash: B256,
    pub send_root: B256,
}

/// Checkpoint reported by the consensus layer for safe, finalized or validated blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalityRecord {
    pub message_index: u64,
    pub block_hash: B256,
}

/// Sync status pushed by the consensus layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsensusSyncData {
    pub synced: bool,
    pub max_message_count: u64,
    #[serde(default)]
    pub sync_progress_map: std::collections::BTreeMap<String, serde_json::Value>,
    /// Unix timestamp in milliseconds.
    pub updated_at: u64,
}
