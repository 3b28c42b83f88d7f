//! Submission and redemption of retryable tickets.

use super::{gas, Execution, TxError, TxOutcome, TxProcessor, TxReceipt};
use crate::{
    l2_pricing::saturating_i64,
    retryables::RETRYABLE_LIFETIME_SECONDS,
    state::{WorldState, WorldStateExt},
    ArbosError,
};
use alloy_primitives::{Address, Log, U256};
use alloy_sol_types::SolEvent;
use arb_chain_primitives::{
    abi::ArbRetryableTx::{RedeemScheduled, TicketCreated},
    addresses::{retryable_escrow_address, ARB_RETRYABLE_TX_ADDRESS},
    ArbTransaction, RetryTx, SubmitRetryableTx,
};
use tracing::{debug, error};

fn retryable_log(event: &impl SolEvent) -> Log {
    Log { address: ARB_RETRYABLE_TX_ADDRESS, data: event.encode_log_data() }
}

/// Transfers that must not fail once the preceding checks passed. A failure is logged and the
/// transaction carries on.
fn transfer_or_log(
    state: &mut dyn WorldState,
    from: Address,
    to: Address,
    amount: U256,
    what: &str,
) -> bool {
    match state.transfer(from, to, amount) {
        Ok(()) => true,
        Err(err) => {
            error!(target: "arb::retryables", %err, what, "retryable transfer failed");
            false
        }
    }
}

impl TxProcessor<'_> {
    /// Creates the ticket funded by an L1 deposit and schedules its first redeem when the
    /// submission also paid for gas.
    pub(super) fn submit_retryable(
        &mut self,
        tx: &ArbTransaction,
        submit: &SubmitRetryableTx,
    ) -> Result<TxOutcome, TxError> {
        let ticket_id = tx.hash();
        let escrow = retryable_escrow_address(ticket_id);
        let network = self.arbos.network_fee_account(&*self.state);
        let from = submit.from;

        // the deposit pays for everything, the retry value leaves through escrow
        let mut available_refund = submit.deposit_value;
        gas::take_funds(&mut available_refund, submit.retry_value);
        self.state.add_balance(from, submit.deposit_value);

        let balance = self.state.balance(from);
        if balance < submit.max_submission_fee {
            return Ok(TxOutcome::failed(
                tx,
                TxError::InsufficientSubmissionFunds {
                    address: from,
                    have: balance,
                    want: submit.max_submission_fee,
                },
            ));
        }

        let submission_fee = crate::retryables::retryable_submission_fee(
            submit.retry_data.len(),
            submit.l1_base_fee,
        );
        if submit.max_submission_fee < submission_fee {
            return Ok(TxOutcome::failed(
                tx,
                TxError::SubmissionFeeTooLow {
                    max: submit.max_submission_fee,
                    fee: submission_fee,
                },
            ));
        }

        if let Err(err) = self.state.transfer(from, network, submission_fee) {
            return Ok(TxOutcome::failed(tx, err.into()));
        }
        let withheld_submission_fee = gas::take_funds(&mut available_refund, submission_fee);

        let submission_fee_refund =
            gas::take_funds(&mut available_refund, submit.max_submission_fee - submission_fee);
        transfer_or_log(
            self.state,
            from,
            submit.fee_refund_addr,
            submission_fee_refund,
            "submission fee refund",
        );

        if let Err(err) = self.state.transfer(from, escrow, submit.retry_value) {
            // the ticket cannot be funded, hand the submission fee back
            transfer_or_log(self.state, network, from, submission_fee, "submission fee return");
            transfer_or_log(
                self.state,
                from,
                submit.fee_refund_addr,
                withheld_submission_fee,
                "withheld submission fee refund",
            );
            return Ok(TxOutcome::failed(tx, err.into()));
        }

        let now = self.env.timestamp;
        let retryable = self.arbos.retryables().create_retryable(
            &mut *self.state,
            ticket_id,
            now.saturating_add(RETRYABLE_LIFETIME_SECONDS),
            from,
            submit.retry_to,
            submit.retry_value,
            submit.beneficiary,
            &submit.retry_data,
        );

        let mut receipt = TxReceipt::new(tx, true, 0, self.env.base_fee);
        receipt.output = ticket_id.0.to_vec().into();
        receipt.logs.push(retryable_log(&TicketCreated { ticketId: ticket_id }));
        debug!(
            target: "arb::retryables",
            ticket = %ticket_id,
            timeout = now.saturating_add(RETRYABLE_LIFETIME_SECONDS),
            "created retryable"
        );

        let base_fee = self.env.base_fee;
        let user_gas = submit.gas;
        let max_gas_cost = submit.gas_fee_cap.saturating_mul(U256::from(user_gas));
        let balance = self.state.balance(from);
        if balance < max_gas_cost || user_gas < gas::TX_GAS || submit.gas_fee_cap < base_fee {
            // no auto-redeem, return what the deposit set aside for gas
            let gas_cost_refund = gas::take_funds(&mut available_refund, max_gas_cost);
            let refund_to = submit.fee_refund_addr;
            transfer_or_log(self.state, from, refund_to, gas_cost_refund, "gas cost refund");
            return Ok(TxOutcome::success(receipt));
        }

        let gas_cost = base_fee * U256::from(user_gas);
        let mut network_cost = gas_cost;
        if self.arbos.version() >= 11 {
            let infra_account = self.arbos.infra_fee_account(&*self.state);
            if !infra_account.is_zero() {
                let min_base_fee = self.arbos.l2_pricing().min_base_fee_wei(&*self.state);
                let infra_cost = min_base_fee.min(base_fee) * U256::from(user_gas);
                let infra_cost = gas::take_funds(&mut network_cost, infra_cost);
                if !transfer_or_log(self.state, from, infra_account, infra_cost, "infra fee") {
                    return Ok(TxOutcome::success(receipt));
                }
            }
        }
        if !network_cost.is_zero() &&
            !transfer_or_log(self.state, from, network, network_cost, "network fee")
        {
            return Ok(TxOutcome::success(receipt));
        }

        let withheld_gas_funds = gas::take_funds(&mut available_refund, gas_cost);
        let gas_price_refund =
            submit.gas_fee_cap.saturating_sub(base_fee).saturating_mul(U256::from(user_gas));
        let refund_to = submit.fee_refund_addr;
        transfer_or_log(self.state, from, refund_to, gas_price_refund, "gas price refund");
        available_refund = available_refund
            .saturating_add(withheld_gas_funds)
            .saturating_add(withheld_submission_fee);

        let retry = retryable.make_tx(
            &*self.state,
            submit.chain_id,
            0,
            base_fee,
            user_gas,
            submit.fee_refund_addr,
            available_refund,
            submission_fee,
        );
        retryable.increment_num_tries(&mut *self.state);

        receipt.logs.push(retryable_log(&RedeemScheduled {
            ticketId: ticket_id,
            retryTxHash: retry.hash(),
            sequenceNum: retry.nonce,
            donatedGas: user_gas,
            gasDonor: submit.fee_refund_addr,
            maxRefund: available_refund,
            submissionFeeRefund: submission_fee,
        }));
        receipt.gas_used = user_gas;

        Ok(TxOutcome { receipt, scheduled: vec![retry], failure: None })
    }

    /// Redeems a ticket: the escrowed value and the prepaid gas move to the ticket's sender, the
    /// call runs, and the outcome decides between deleting the ticket and re-escrowing its value.
    pub(super) fn apply_retry(
        &mut self,
        tx: &ArbTransaction,
        retry: &RetryTx,
    ) -> Result<TxOutcome, TxError> {
        let now = self.env.timestamp;
        if self.arbos.retryables().open_retryable(&*self.state, retry.ticket_id, now).is_none() {
            return Ok(TxOutcome::failed(tx, ArbosError::RetryableNotFound(retry.ticket_id).into()));
        }

        let escrow = retryable_escrow_address(retry.ticket_id);
        if let Err(err) = self.state.transfer(escrow, retry.from, retry.value) {
            return Ok(TxOutcome::failed(tx, err.into()));
        }
        let prepaid = self.env.base_fee * U256::from(retry.gas);
        self.state.add_balance(retry.from, prepaid);

        self.ctx.current_retryable = Some(retry.ticket_id);
        self.ctx.current_refund_to = Some(retry.refund_to);

        let execution = self.execute_message(tx)?;
        self.end_retry(retry, &execution)?;
        Ok(self.outcome(tx, execution))
    }

    fn end_retry(&mut self, retry: &RetryTx, execution: &Execution) -> Result<(), TxError> {
        let Execution { gas_used, gas_left, .. } = *execution;
        let success = execution.outcome.success;

        let mut effective_base_fee = retry.gas_fee_cap;
        if effective_base_fee != self.env.base_fee {
            error!(
                target: "arb::retryables",
                gas_fee_cap = %retry.gas_fee_cap,
                base_fee = %self.env.base_fee,
                "retry gas fee cap does not match the block base fee"
            );
            effective_base_fee = self.env.base_fee;
        }

        // the sender's gas refund belongs to the refund pools below
        let gas_refund = effective_base_fee * U256::from(gas_left);
        if let Err(err) = self.state.sub_balance(retry.from, gas_refund) {
            error!(target: "arb::retryables", %err, "failed to undo retry gas refund");
        }

        let network = self.arbos.network_fee_account(&*self.state);
        let mut max_refund = retry.max_refund;
        if success {
            self.refund_from(network, retry.submission_fee_refund, &mut max_refund, retry);
        } else {
            gas::take_funds(&mut max_refund, retry.submission_fee_refund);
        }
        gas::take_funds(&mut max_refund, effective_base_fee * U256::from(gas_used));

        let mut network_refund = gas_refund;
        if self.arbos.version() >= 11 {
            let infra_account = self.arbos.infra_fee_account(&*self.state);
            if !infra_account.is_zero() {
                let min_base_fee = self.arbos.l2_pricing().min_base_fee_wei(&*self.state);
                let infra_refund = min_base_fee.min(effective_base_fee) * U256::from(gas_left);
                let infra_refund = gas::take_funds(&mut network_refund, infra_refund);
                self.refund_from(infra_account, infra_refund, &mut max_refund, retry);
            }
        }
        self.refund_from(network, network_refund, &mut max_refund, retry);

        if success {
            let retryables = self.arbos.retryables();
            let deleted = retryables.delete_retryable(&mut *self.state, retry.ticket_id);
            if let Err(err) = deleted {
                error!(
                    target: "arb::retryables",
                    %err,
                    ticket = %retry.ticket_id,
                    "failed to delete redeemed retryable"
                );
            }
        } else {
            let escrow = retryable_escrow_address(retry.ticket_id);
            self.state.transfer(retry.from, escrow, retry.value)?;
        }

        self.arbos.l2_pricing().add_to_gas_pool(&mut *self.state, -saturating_i64(gas_used));
        Ok(())
    }

    /// Pays `amount` out of `refund_from`: the part still covered by `max_refund` to the refund
    /// address, the rest back to the ticket's sender.
    fn refund_from(
        &mut self,
        refund_from: Address,
        amount: U256,
        max_refund: &mut U256,
        retry: &RetryTx,
    ) {
        let to_refund_address = gas::take_funds(max_refund, amount);
        transfer_or_log(self.state, refund_from, retry.refund_to, to_refund_address, "refund");
        let excess = amount - to_refund_address;
        transfer_or_log(self.state, refund_from, retry.from, excess, "excess refund");
    }
}
