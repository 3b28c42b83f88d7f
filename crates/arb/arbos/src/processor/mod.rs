//! The per-transaction state transition.
//!
//! Each kind gets its own pre-processing: deposits mint, internal transactions drive ArbOS,
//! submissions create retryables and retries redeem them. Calls that reach the interpreter then
//! pay for their L1 calldata in L2 gas, and the fees are split between the network, the
//! infrastructure account and the L1 poster pool once the call returns.

use crate::{
    arbos_state::ArbosState,
    evm::{BlockEnv, CallOutcome, CallRequest, Evm},
    l2_pricing::saturating_i64,
    precompiles::{self, PrecompileContext},
    state::{WorldState, WorldStateExt},
    ArbosError,
};
use alloy_primitives::{Address, Bytes, Log, B256, U256};
use arb_chain_primitives::{
    addresses::{ARB_RETRYABLE_TX_ADDRESS, L1_PRICER_FUNDS_POOL_ADDRESS},
    ArbTransaction, DepositTx, RetryTx,
};
use tracing::{error, trace};

pub mod gas;
mod internal;
mod retryable;

/// Per-transaction bookkeeping. Reset for every transaction and never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxContext {
    /// L1 calldata cost expressed in L2 gas.
    pub poster_gas: u64,
    pub poster_fee: U256,
    /// Gas above the per-block limit, withheld from the call and always refunded.
    pub compute_hold_gas: u64,
    pub current_retryable: Option<B256>,
    pub current_refund_to: Option<Address>,
    pub top_level_tx_type: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: B256,
    pub tx_type: u8,
    pub success: bool,
    pub gas_used: u64,
    pub gas_used_for_l1: u64,
    /// Filled in by the block builder.
    pub cumulative_gas_used: u64,
    pub effective_gas_price: U256,
    pub contract_address: Option<Address>,
    pub logs: Vec<Log>,
    pub output: Bytes,
}

impl TxReceipt {
    fn new(tx: &ArbTransaction, success: bool, gas_used: u64, effective_gas_price: U256) -> Self {
        Self {
            tx_hash: tx.hash(),
            tx_type: tx.tx_type(),
            success,
            gas_used,
            gas_used_for_l1: 0,
            cumulative_gas_used: 0,
            effective_gas_price,
            contract_address: None,
            logs: Vec::new(),
            output: Bytes::new(),
        }
    }
}

/// Result of a transaction that made it into the block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutcome {
    pub receipt: TxReceipt,
    /// Retries scheduled by this transaction, to run right after it.
    pub scheduled: Vec<RetryTx>,
    /// Why the transaction failed, when it ended before reaching the interpreter.
    pub failure: Option<TxError>,
}

impl TxOutcome {
    fn success(receipt: TxReceipt) -> Self {
        Self { receipt, scheduled: Vec::new(), failure: None }
    }

    fn failed(tx: &ArbTransaction, failure: TxError) -> Self {
        trace!(
            target: "arb::stf",
            tx = %tx.hash(),
            %failure,
            "transaction failed before execution"
        );
        Self {
            receipt: TxReceipt::new(tx, false, 0, U256::ZERO),
            scheduled: Vec::new(),
            failure: Some(failure),
        }
    }
}

/// Transaction-level failures.
///
/// Returned as `Err` from [`apply_transaction`] the transaction is invalid and leaves no trace in
/// the state. Carried in [`TxOutcome::failure`] it was included with a failed receipt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TxError {
    #[error("internal tx not from ArbOS")]
    InternalNotFromArbos,
    #[error("sender {got} does not match transaction sender {expected}")]
    SenderMismatch { expected: Address, got: Address },
    #[error("malformed internal tx: {0}")]
    MalformedInternal(String),
    #[error("nonce mismatch for {address}: state {expected}, tx {got}")]
    NonceMismatch { address: Address, expected: u64, got: u64 },
    #[error("max fee per gas {fee_cap} less than block base fee {base_fee}")]
    FeeCapTooLow { fee_cap: U256, base_fee: U256 },
    #[error("insufficient funds for gas * price + value: address {address} have {have} want {want}")]
    InsufficientFunds { address: Address, have: U256, want: U256 },
    #[error("intrinsic gas too low: have {have}, want {want}")]
    IntrinsicGas { have: u64, want: u64 },
    #[error("insufficient gas for L1 costs: have {have}, want {want}")]
    InsufficientGasForL1Cost { have: u64, want: u64 },
    #[error("insufficient funds for max submission fee: address {address} have {have} want {want}")]
    InsufficientSubmissionFunds { address: Address, have: U256, want: U256 },
    #[error("max submission fee {max} is less than the actual submission fee {fee}")]
    SubmissionFeeTooLow { max: U256, fee: U256 },
    #[error("gas left {gas_left} exceeds gas given {gas_given} after execution")]
    GasRefundExceedsLimit { gas_left: u64, gas_given: u64 },
    #[error(transparent)]
    Arbos(#[from] ArbosError),
}

impl TxError {
    /// Whether the error means the node itself is broken rather than the transaction.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Self::GasRefundExceedsLimit { .. } | Self::Arbos(ArbosError::Evm(_)))
    }
}

/// Applies `tx` to `state`. An `Err` leaves `state` as it was.
pub fn apply_transaction(
    state: &mut dyn WorldState,
    evm: &mut dyn Evm,
    env: &BlockEnv,
    tx: &ArbTransaction,
) -> Result<TxOutcome, TxError> {
    apply_transaction_from(state, evm, env, tx, tx.sender())
}

/// Applies `tx` on behalf of `sender`, rejecting it if `sender` is not the account it executes as.
pub fn apply_transaction_from(
    state: &mut dyn WorldState,
    evm: &mut dyn Evm,
    env: &BlockEnv,
    tx: &ArbTransaction,
    sender: Address,
) -> Result<TxOutcome, TxError> {
    if sender != tx.sender() {
        return Err(match tx {
            ArbTransaction::Internal(_) => TxError::InternalNotFromArbos,
            _ => TxError::SenderMismatch { expected: tx.sender(), got: sender },
        });
    }

    let checkpoint = state.checkpoint();
    match run(state, evm, env, tx) {
        Ok(outcome) => {
            state.discard(checkpoint);
            Ok(outcome)
        }
        Err(err) => {
            state.revert_to(checkpoint);
            Err(err)
        }
    }
}

fn run(
    state: &mut dyn WorldState,
    evm: &mut dyn Evm,
    env: &BlockEnv,
    tx: &ArbTransaction,
) -> Result<TxOutcome, TxError> {
    let arbos = ArbosState::open(&*state)?;
    let ctx = TxContext { top_level_tx_type: Some(tx.tx_type()), ..Default::default() };
    TxProcessor { state, evm, env, arbos, ctx }.process(tx)
}

/// A call that went through gas purchase, the interpreter and the gas refund.
#[derive(Debug)]
struct Execution {
    outcome: CallOutcome,
    gas_used: u64,
    gas_left: u64,
    gas_price: U256,
    scheduled: Vec<RetryTx>,
}

pub(crate) struct TxProcessor<'a> {
    state: &'a mut dyn WorldState,
    evm: &'a mut dyn Evm,
    env: &'a BlockEnv,
    arbos: ArbosState,
    ctx: TxContext,
}

impl TxProcessor<'_> {
    fn process(mut self, tx: &ArbTransaction) -> Result<TxOutcome, TxError> {
        match tx {
            ArbTransaction::Deposit(deposit) => self.apply_deposit(tx, deposit),
            ArbTransaction::Internal(internal) => self.apply_internal(tx, internal),
            ArbTransaction::SubmitRetryable(submit) => self.submit_retryable(tx, submit),
            ArbTransaction::Retry(retry) => self.apply_retry(tx, retry),
            ArbTransaction::Unsigned(_)
            | ArbTransaction::Contract(_)
            | ArbTransaction::Signed(_) => {
                let execution = self.execute_message(tx)?;
                self.settle_fees(execution.gas_used, execution.gas_price)?;
                Ok(self.outcome(tx, execution))
            }
        }
    }

    /// Mints the deposit and moves it to the recipient. The transfer is the transaction itself,
    /// so no call is made.
    fn apply_deposit(
        &mut self,
        tx: &ArbTransaction,
        deposit: &DepositTx,
    ) -> Result<TxOutcome, TxError> {
        self.state.add_balance(deposit.from, deposit.value);
        self.state.transfer(deposit.from, deposit.to, deposit.value)?;
        Ok(TxOutcome::success(TxReceipt::new(tx, true, 0, U256::ZERO)))
    }

    fn outcome(&self, tx: &ArbTransaction, execution: Execution) -> TxOutcome {
        let Execution { outcome, gas_used, gas_price, scheduled, .. } = execution;
        let mut receipt = TxReceipt::new(tx, outcome.success, gas_used, gas_price);
        receipt.gas_used_for_l1 = self.ctx.poster_gas;
        receipt.contract_address = outcome.created_address;
        receipt.output = outcome.output;
        if outcome.success {
            receipt.logs = outcome.logs;
        }
        TxOutcome { receipt, scheduled, failure: None }
    }

    /// Buys gas, charges L1 costs, runs the call and refunds what is left.
    fn execute_message(&mut self, tx: &ArbTransaction) -> Result<Execution, TxError> {
        let from = tx.sender();
        let gas_limit = tx.gas_limit();
        let base_fee = self.env.base_fee;

        if let Some(nonce) = tx.checked_nonce() {
            let expected = self.state.nonce(from);
            if nonce != expected {
                return Err(TxError::NonceMismatch { address: from, expected, got: nonce });
            }
        }

        let fee_cap = tx.gas_fee_cap();
        if fee_cap < base_fee {
            return Err(TxError::FeeCapTooLow { fee_cap, base_fee });
        }
        let drop_tip = gas::drops_tip(self.arbos.version(), self.env.coinbase);
        let gas_price = gas::effective_gas_price(fee_cap, tx.gas_tip_cap(), base_fee, drop_tip);

        let want = U256::from(gas_limit).saturating_mul(fee_cap).saturating_add(tx.value());
        let have = self.state.balance(from);
        if have < want {
            return Err(TxError::InsufficientFunds { address: from, have, want });
        }
        self.state.sub_balance(from, U256::from(gas_limit) * gas_price)?;

        let (access_addresses, access_keys) = match tx {
            ArbTransaction::Signed(signed) => {
                (signed.access_list_addresses, signed.access_list_storage_keys)
            }
            _ => (0, 0),
        };
        let input = tx.input();
        let intrinsic = gas::intrinsic_gas(input, tx.to().is_none(), access_addresses, access_keys);
        if gas_limit < intrinsic {
            return Err(TxError::IntrinsicGas { have: gas_limit, want: intrinsic });
        }
        let floor = gas::floor_data_gas(input);
        if self.env.rules.eip7623 && gas_limit < floor {
            return Err(TxError::IntrinsicGas { have: gas_limit, want: floor });
        }

        let mut gas_remaining = gas_limit - intrinsic;
        self.charge_gas(tx, &mut gas_remaining)?;

        if let Some(nonce) = tx.checked_nonce() {
            self.state.set_nonce(from, nonce + 1);
        }

        let request = CallRequest {
            caller: from,
            to: tx.to(),
            value: tx.value(),
            input: input.clone(),
            gas_limit: gas_remaining,
            gas_price,
        };
        let (outcome, scheduled) = if request.to == Some(ARB_RETRYABLE_TX_ADDRESS) {
            self.call_precompile(&request)
        } else {
            (self.evm.call(&mut *self.state, self.env, &request)?, Vec::new())
        };
        if outcome.gas_left > gas_remaining {
            return Err(TxError::GasRefundExceedsLimit {
                gas_left: outcome.gas_left,
                gas_given: gas_remaining,
            });
        }

        let mut gas_left = outcome.gas_left + self.ctx.compute_hold_gas;
        let spent = gas_limit - gas_left;
        let mut refund_counter = outcome.code_insertion_refund;
        if outcome.success {
            refund_counter = refund_counter.saturating_add(outcome.gas_refund);
        }
        if self.ctx.poster_gas < spent {
            let quotient = self.env.rules.max_refund_quotient();
            gas_left += ((spent - self.ctx.poster_gas) / quotient).min(refund_counter);
        }
        if self.env.rules.eip7623 && gas_limit - gas_left < floor {
            gas_left = gas_limit - floor;
        }

        self.state.add_balance(from, U256::from(gas_left) * gas_price);
        let gas_used = gas_limit - gas_left;

        if gas_price > base_fee {
            let tip = (gas_price - base_fee) * U256::from(gas_used);
            let network = self.arbos.network_fee_account(&*self.state);
            self.state.add_balance(network, tip);
        }

        trace!(
            target: "arb::stf",
            tx = %tx.hash(),
            success = outcome.success,
            gas_used,
            poster_gas = self.ctx.poster_gas,
            "executed message"
        );
        Ok(Execution { outcome, gas_used, gas_left, gas_price, scheduled })
    }

    /// Reserves gas for the L1 calldata cost and holds back gas above the per-block limit.
    fn charge_gas(&mut self, tx: &ArbTransaction, gas_remaining: &mut u64) -> Result<(), TxError> {
        let base_fee = self.env.base_fee;
        if tx.pays_l1_cost() && !base_fee.is_zero() {
            let l1_pricing = self.arbos.l1_pricing();
            let (poster_cost, units) =
                l1_pricing.poster_data_cost(&*self.state, tx.encoded().len(), self.env.coinbase);
            if units > 0 {
                l1_pricing.add_to_units_since_update(&mut *self.state, units);
            }
            self.ctx.poster_gas = gas::poster_gas(poster_cost, base_fee);
            self.ctx.poster_fee = base_fee * U256::from(self.ctx.poster_gas);
        }

        if *gas_remaining < self.ctx.poster_gas {
            return Err(TxError::InsufficientGasForL1Cost {
                have: *gas_remaining,
                want: self.ctx.poster_gas,
            });
        }
        *gas_remaining -= self.ctx.poster_gas;

        let max = self.arbos.l2_pricing().per_block_gas_limit(&*self.state);
        if *gas_remaining > max {
            self.ctx.compute_hold_gas = *gas_remaining - max;
            *gas_remaining = max;
        }
        Ok(())
    }

    fn call_precompile(&mut self, request: &CallRequest) -> (CallOutcome, Vec<RetryTx>) {
        let checkpoint = self.state.checkpoint();
        let mut ctx = PrecompileContext::new(
            &mut *self.state,
            &self.arbos,
            self.env,
            &self.ctx,
            request.caller,
            request.gas_limit,
        );
        let result = precompiles::run_arb_retryable_tx(&mut ctx, request);
        let gas_left = ctx.gas.gas_left();
        let PrecompileContext { logs, scheduled, .. } = ctx;
        match result {
            Ok(output) => {
                self.state.discard(checkpoint);
                let outcome =
                    CallOutcome { success: true, gas_left, output, logs, ..Default::default() };
                (outcome, scheduled)
            }
            Err(err) => {
                self.state.revert_to(checkpoint);
                trace!(target: "arb::stf", %err, "precompile call reverted");
                let gas_left = if err.consumes_all_gas() { 0 } else { gas_left };
                let outcome =
                    CallOutcome { gas_left, output: err.revert_data(), ..Default::default() };
                (outcome, Vec::new())
            }
        }
    }

    /// Splits the fee of a completed call between the fee accounts and debits the gas pool.
    fn settle_fees(&mut self, gas_used: u64, gas_price: U256) -> Result<(), TxError> {
        let state = &mut *self.state;
        let version = self.arbos.version();
        let base_fee = self.env.base_fee;
        let poster_fee = self.ctx.poster_fee;
        let poster_gas = self.ctx.poster_gas;

        let total_cost = base_fee * U256::from(gas_used);
        let mut compute_cost = total_cost.checked_sub(poster_fee).unwrap_or_else(|| {
            error!(
                target: "arb::stf",
                gas_used,
                %base_fee,
                %poster_fee,
                "total cost < poster cost"
            );
            U256::ZERO
        });

        if version > 4 {
            let infra_account = self.arbos.infra_fee_account(&*state);
            if !infra_account.is_zero() {
                let min_base_fee = self.arbos.l2_pricing().min_base_fee_wei(&*state);
                let infra_fee = min_base_fee.min(base_fee);
                let compute_gas = gas_used.saturating_sub(poster_gas);
                let infra_cost = infra_fee * U256::from(compute_gas);
                state.add_balance(infra_account, infra_cost);
                compute_cost = compute_cost.saturating_sub(infra_cost);
            }
        }
        if !compute_cost.is_zero() {
            let network = self.arbos.network_fee_account(&*state);
            state.add_balance(network, compute_cost);
        }

        let poster_fee_destination =
            if version < 2 { self.env.coinbase } else { L1_PRICER_FUNDS_POOL_ADDRESS };
        state.add_balance(poster_fee_destination, poster_fee);
        if version >= 10 {
            self.arbos.l1_pricing().add_to_l1_fees_available(state, poster_fee);
        }

        if !gas_price.is_zero() {
            let compute_gas = if gas_used > poster_gas {
                gas_used - poster_gas
            } else {
                error!(
                    target: "arb::stf",
                    gas_used,
                    poster_gas,
                    "total gas used < poster gas component"
                );
                0
            };
            self.arbos.l2_pricing().add_to_gas_pool(state, -saturating_i64(compute_gas));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
