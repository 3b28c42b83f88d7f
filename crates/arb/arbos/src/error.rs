use alloy_primitives::{Address, B256, U256};

/// Failures of ArbOS state operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArbosError {
    #[error("ArbOS state is not initialized")]
    Uninitialized,
    #[error("ArbOS state is already initialized at version {0}")]
    AlreadyInitialized(u64),
    #[error("unsupported ArbOS version {0}")]
    UnsupportedVersion(u64),
    #[error("invalid brotli compression level {0}")]
    InvalidCompressionLevel(u64),
    #[error("insufficient balance for {address}: have {have}, want {want}")]
    InsufficientBalance { address: Address, have: U256, want: U256 },
    #[error("L1 block number {number} is out of range for block hash lookup")]
    BlockHashOutOfRange { number: u64 },
    #[error("invalid batch poster update time {update_time} (last update {last_update}, now {now})")]
    InvalidUpdateTime { update_time: u64, last_update: u64, now: u64 },
    #[error("{0} is not a batch poster")]
    NotABatchPoster(Address),
    #[error("no retryable with id {0}")]
    RetryableNotFound(B256),
    #[error("timeout too far into the future")]
    TimeoutTooFarIntoFuture,
    #[error("out of gas")]
    OutOfGas,
    #[error("evm failure: {0}")]
    Evm(String),
}
