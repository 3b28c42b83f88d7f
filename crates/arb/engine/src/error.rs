use crate::chain::ChainError;
use alloy_primitives::B256;
use arb_chain_arbos::{ArbosError, TxError};
use arb_chain_primitives::ConversionError;

/// How a caller should treat an [`EngineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The request was malformed. Nothing changed.
    Validation,
    /// Another build holds the build slot. Retry later.
    Contention,
    /// The node can no longer trust its own chain and must stop.
    Fatal,
    /// Downstream processing did not answer in time. The block may still land.
    Timeout,
    NotFound,
    Internal,
}

/// Errors surfaced by the [`ExecutionEngine`](crate::ExecutionEngine).
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("CreateBlock mutex held")]
    BuildInProgress,
    #[error("wrong block number in digest: got {got}, expected {expected}")]
    WrongBlockNumber { got: u64, expected: u64 },
    #[error("cannot reorg to genesis")]
    ReorgToGenesis,
    #[error("reorg target block {0} not found")]
    ReorgTargetNotFound(u64),
    #[error("no block found for message index {0}")]
    MessageNotFound(u64),
    #[error("block {0} not found")]
    BlockNotFound(u64),
    #[error("genesis block not found")]
    MissingGenesis,
    #[error("initial L1 base fee must be greater than zero")]
    ZeroInitialL1BaseFee,
    #[error("serialized chain config must not be empty")]
    EmptyChainConfig,
    #[error("failed to deserialize chain config: {0}")]
    InvalidChainConfig(#[source] serde_json::Error),
    #[error("chain config genesis block {chain_config} differs from the configured {configured}")]
    GenesisBlockMismatch { configured: u64, chain_config: u64 },
    #[error("timeout waiting for block processing result")]
    ProcessingTimeout,
    #[error("block {hash} failed processing: {message}")]
    ProcessingFailed { hash: B256, message: String },
    #[error("block {hash} processing raised an exception: {message}")]
    ProcessingException { hash: B256, message: String },
    #[error("block processing pipeline is closed")]
    PipelineClosed,
    #[error("block validator not set")]
    ValidatorNotSet,
    #[error("msg lag must be positive")]
    ZeroMsgLag,
    #[error("block hash mismatch for {kind} block {number}: expected={expected}, actual={actual}")]
    FinalityMismatch { kind: &'static str, number: u64, expected: B256, actual: B256 },
    #[error("chain tip {tip} is past block {expected} of message {index}")]
    TipAdvanced { index: u64, expected: u64, tip: u64 },
    #[error("block comparison mismatch at block {first_mismatch} (detected at {detected_at})")]
    ComparisonMismatch { first_mismatch: u64, detected_at: u64 },
    #[error(transparent)]
    Conversion(#[from] ConversionError),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error("block build task failed: {0}")]
    BuildTask(#[from] tokio::task::JoinError),
    #[error(transparent)]
    Arbos(#[from] ArbosError),
}

impl EngineError {
    pub fn code(&self) -> ErrorKind {
        match self {
            Self::BuildInProgress => ErrorKind::Contention,
            Self::WrongBlockNumber { .. }
            | Self::ReorgToGenesis
            | Self::ReorgTargetNotFound(_)
            | Self::ZeroInitialL1BaseFee
            | Self::EmptyChainConfig
            | Self::InvalidChainConfig(_)
            | Self::GenesisBlockMismatch { .. }
            | Self::ValidatorNotSet
            | Self::ZeroMsgLag
            | Self::Conversion(_) => ErrorKind::Validation,
            Self::MessageNotFound(_) | Self::BlockNotFound(_) => ErrorKind::NotFound,
            Self::ProcessingTimeout => ErrorKind::Timeout,
            Self::FinalityMismatch { .. }
            | Self::TipAdvanced { .. }
            | Self::ComparisonMismatch { .. } => ErrorKind::Fatal,
            Self::Build(err) => err.code(),
            Self::MissingGenesis
            | Self::ProcessingFailed { .. }
            | Self::ProcessingException { .. }
            | Self::PipelineClosed
            | Self::Chain(_)
            | Self::BuildTask(_)
            | Self::Arbos(_) => ErrorKind::Internal,
        }
    }

    /// Whether processing must stop.
    pub fn is_fatal(&self) -> bool {
        self.code() == ErrorKind::Fatal
    }
}

/// Failures assembling a block.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("start block transaction failed: {0}")]
    StartBlock(#[source] TxError),
    #[error("transaction {hash} broke an execution invariant: {source}")]
    Invariant { hash: B256, source: TxError },
    #[error("block gas used {gas_used} exceeds the gas limit {gas_limit}")]
    GasLimitExceeded { gas_used: u64, gas_limit: u64 },
    #[error("prefetch cancelled")]
    Cancelled,
    #[error(transparent)]
    Arbos(#[from] ArbosError),
}

impl BuildError {
    pub fn code(&self) -> ErrorKind {
        match self {
            Self::StartBlock(_) | Self::Invariant { .. } | Self::GasLimitExceeded { .. } => {
                ErrorKind::Fatal
            }
            Self::Cancelled | Self::Arbos(_) => ErrorKind::Internal,
        }
    }
}

/// Failures of the block comparison against a reference node.
#[derive(Debug, thiserror::Error)]
pub enum ComparisonError {
    #[error("block {number} not found after {attempts} attempts")]
    Exhausted { number: u64, attempts: u32 },
    #[error("reference node has no block {0}")]
    MissingBlock(u64),
    #[error(transparent)]
    Rpc(#[from] jsonrpsee::core::ClientError),
}
