//! Execution engine for an Arbitrum-style rollup.
//!
//! The consensus layer feeds ordered L1 messages into the [`ExecutionEngine`], which turns each
//! into exactly one L2 block, keeps the canonical chain in a [`BlockTree`](chain::BlockTree) and
//! tracks the safe and finalized checkpoints consensus reports. A [`ComparisonGuard`] can wrap the
//! engine to cross-check its blocks against a reference node.

#![warn(unused_crate_dependencies)]

pub mod args;
pub mod builder;
pub mod chain;
pub mod comparison;
pub mod engine;
pub mod error;
pub mod prefetch;
pub mod processing;
pub mod sync_history;
pub mod sync_monitor;
pub mod tracker;

pub use args::{ArbEngineArgs, BuildMode, ComparisonConfig, EngineConfig};
pub use comparison::{ComparisonGuard, ComparisonRpcClient, ReferenceSource};
pub use engine::{EvmFactory, ExecutionEngine};
pub use error::{BuildError, ComparisonError, EngineError, ErrorKind};
pub use sync_monitor::FinalityData;
