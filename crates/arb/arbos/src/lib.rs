//! ArbOS: the protocol state machine behind every L2 block.
//!
//! State lives in storage slots of reserved accounts in the [`WorldState`]. [`ArbosState`]
//! opens the pricing models, the retryable tickets and the block hash history on top of it, and
//! [`apply_transaction`] runs one transaction against them.

#![warn(unused_crate_dependencies)]

pub mod address_set;
pub mod arbos_state;
pub mod batch_posters;
pub mod blockhashes;
pub mod burn;
pub mod error;
pub mod evm;
pub mod l1_pricing;
pub mod l2_pricing;
pub mod precompiles;
pub mod processor;
pub mod queue;
pub mod retryables;
pub mod state;
pub mod storage;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use arbos_state::{ArbosState, MAX_ARBOS_VERSION};
pub use error::ArbosError;
pub use evm::{BlockEnv, CallOutcome, CallRequest, ChainRules, Evm};
pub use processor::{
    apply_transaction, apply_transaction_from, TxContext, TxError, TxOutcome, TxReceipt,
};
pub use state::{InMemoryWorldState, WorldState, WorldStateExt};
