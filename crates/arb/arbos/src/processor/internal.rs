//! Internal transactions: ArbOS bookkeeping driven by the block builder and the L1 inbox.

use super::{TxError, TxOutcome, TxProcessor, TxReceipt};
use alloy_primitives::{B256, U256};
use alloy_sol_types::SolCall;
use arb_chain_primitives::{
    abi::ArbosActs::{batchPostingReportCall, startBlockCall},
    addresses::{HISTORY_SERVE_WINDOW, HISTORY_STORAGE_ADDRESS},
    ArbTransaction, InternalTx,
};
use tracing::{debug, warn};

/// Expired retryables examined per block.
pub const REAPS_PER_BLOCK: usize = 2;

impl TxProcessor<'_> {
    pub(super) fn apply_internal(
        &mut self,
        tx: &ArbTransaction,
        internal: &InternalTx,
    ) -> Result<TxOutcome, TxError> {
        let data = internal.data.as_ref();
        let Some(selector) = data.get(..4) else {
            return Err(TxError::MalformedInternal(format!(
                "data is too short ({} bytes, at least 4 required)",
                data.len()
            )));
        };

        if selector == startBlockCall::SELECTOR {
            let call = startBlockCall::abi_decode(data)
                .map_err(|err| TxError::MalformedInternal(err.to_string()))?;
            self.start_block(call)?;
        } else if selector == batchPostingReportCall::SELECTOR {
            let call = batchPostingReportCall::abi_decode(data)
                .map_err(|err| TxError::MalformedInternal(err.to_string()))?;
            self.batch_posting_report(call);
        } else {
            return Err(TxError::MalformedInternal(format!(
                "unknown method {}",
                alloy_primitives::hex::encode_prefixed(selector)
            )));
        }
        Ok(TxOutcome::success(TxReceipt::new(tx, true, 0, U256::ZERO)))
    }

    fn start_block(&mut self, call: startBlockCall) -> Result<(), TxError> {
        let version = self.arbos.version();
        let now = self.env.timestamp;
        let prev_hash = if self.env.number > 0 { self.env.parent_hash } else { B256::ZERO };

        if version >= 40 {
            self.record_parent_block_hash(prev_hash);
        }

        let mut l1_block_number = call.l1BlockNumber;
        let mut time_passed = call.timePassed;
        if version < 3 {
            // early versions used the L2 block number here and an L1 number one too high
            time_passed = call.l2BlockNumber;
            l1_block_number += 1;
        }

        let blockhashes = self.arbos.blockhashes();
        if l1_block_number > blockhashes.l1_block_number(&*self.state) {
            let number = l1_block_number - 1;
            blockhashes.record_new_l1_block(&mut *self.state, number, prev_hash, version);
        }

        for _ in 0..REAPS_PER_BLOCK {
            let reaped = self.arbos.retryables().try_to_reap_one_retryable(&mut *self.state, now);
            if let Err(err) = reaped {
                warn!(target: "arb::retryables", %err, "failed to reap retryable");
            }
        }

        self.arbos.l2_pricing().update_pricing_model(&mut *self.state, time_passed);

        if self.arbos.upgrade_if_necessary(&mut *self.state, now)? {
            debug!(
                target: "arb::stf",
                version = self.arbos.version(),
                "ran scheduled ArbOS upgrade"
            );
        }
        Ok(())
    }

    fn record_parent_block_hash(&mut self, parent_hash: B256) {
        if self.env.number == 0 {
            return;
        }
        let slot = B256::from(U256::from((self.env.number - 1) % HISTORY_SERVE_WINDOW));
        self.state.set_storage(HISTORY_STORAGE_ADDRESS, slot, parent_hash);
    }

    fn batch_posting_report(&mut self, call: batchPostingReportCall) {
        let l1_pricing = self.arbos.l1_pricing();
        let per_batch_gas = l1_pricing.per_batch_gas_cost(&*self.state);
        let gas_spent = per_batch_gas.saturating_add(call.batchDataGas);
        let wei_spent = call.l1BaseFeeWei.saturating_mul(U256::from(gas_spent));

        if let Err(err) = l1_pricing.update_for_batch_poster_spending(
            &mut *self.state,
            self.arbos.version(),
            call.batchTimestamp.saturating_to(),
            self.env.timestamp,
            call.batchPosterAddress,
            wei_spent,
            call.l1BaseFeeWei,
        ) {
            warn!(
                target: "arb::pricing",
                %err,
                poster = %call.batchPosterAddress,
                batch = call.batchNumber,
                "L1 pricing update for batch poster spending failed"
            );
        }
    }
}
