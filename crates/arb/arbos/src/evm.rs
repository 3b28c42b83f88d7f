//! The seam between the state transition and the EVM interpreter.

use crate::{state::WorldState, ArbosError};
use alloy_primitives::{Address, Bytes, Log, B256, U256};
use auto_impl::auto_impl;

/// Fork rules that change how gas is refunded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainRules {
    /// London refund quotient of 5 instead of 2.
    pub eip3529: bool,
    /// Prague calldata floor gas.
    pub eip7623: bool,
}

impl Default for ChainRules {
    fn default() -> Self {
        Self { eip3529: true, eip7623: false }
    }
}

impl ChainRules {
    pub const fn max_refund_quotient(&self) -> u64 {
        if self.eip3529 {
            5
        } else {
            2
        }
    }
}

/// Block-level values every transaction in the block executes against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockEnv {
    pub number: u64,
    pub timestamp: u64,
    /// The poster of the message the block was built from.
    pub coinbase: Address,
    pub base_fee: U256,
    pub gas_limit: u64,
    pub chain_id: u64,
    pub parent_hash: B256,
    pub rules: ChainRules,
}

/// A top-level message call handed to the interpreter. Value moves from `caller` to `to`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    pub caller: Address,
    /// `None` creates a contract.
    pub to: Option<Address>,
    pub value: U256,
    pub input: Bytes,
    pub gas_limit: u64,
    pub gas_price: U256,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallOutcome {
    pub success: bool,
    pub gas_left: u64,
    /// Accumulated SSTORE clearing refund.
    pub gas_refund: u64,
    /// Refund owed for code-insertion authorizations; survives reverts.
    pub code_insertion_refund: u64,
    pub output: Bytes,
    pub logs: Vec<Log>,
    pub created_address: Option<Address>,
}

/// Executes message calls against a world state.
///
/// An `Err` is a failure of the interpreter itself, not a reverted call.
#[auto_impl(&mut, Box)]
pub trait Evm {
    fn call(
        &mut self,
        state: &mut dyn WorldState,
        env: &BlockEnv,
        request: &CallRequest,
    ) -> Result<CallOutcome, ArbosError>;
}
