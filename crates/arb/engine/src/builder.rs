//! Turns one inbound message into a block on top of its parent.
//!
//! Every block opens with the start-block internal transaction, followed by the transactions the
//! message carries. Retries scheduled by a transaction run right after it.

use crate::{chain::ExecutedBlock, error::BuildError, prefetch::PrewarmCache};
use alloy_consensus::Header;
use alloy_primitives::{keccak256, Sealable, B256, B64, U256};
use alloy_sol_types::SolCall;
use arb_chain_arbos::{
    apply_transaction, l2_pricing::GETH_BLOCK_GAS_LIMIT, ArbosState, BlockEnv, ChainRules, Evm,
    InMemoryWorldState, TxReceipt, WorldState,
};
use arb_chain_primitives::{
    abi::ArbosActs::startBlockCall, parse_l2_transactions, ArbTransaction, ChainConfig,
    HeaderInfo, InboundMessage, InternalTx,
};
use std::{collections::VecDeque, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Header and body of a block whose state root is not yet known.
#[derive(Debug, Clone)]
pub struct BlockExecution {
    pub header: Header,
    pub transactions: Vec<ArbTransaction>,
    pub receipts: Vec<TxReceipt>,
}

/// Builds the block for one message on top of `parent`.
pub struct BlockBuilder<'a> {
    parent: &'a ExecutedBlock,
    message: &'a InboundMessage,
    evm: &'a mut dyn Evm,
    rules: ChainRules,
    cancel: Option<&'a CancellationToken>,
    prewarm: Option<&'a PrewarmCache>,
}

impl<'a> BlockBuilder<'a> {
    pub fn new(
        parent: &'a ExecutedBlock,
        message: &'a InboundMessage,
        evm: &'a mut dyn Evm,
    ) -> Self {
        Self { parent, message, evm, rules: ChainRules::default(), cancel: None, prewarm: None }
    }

    pub fn with_rules(mut self, rules: ChainRules) -> Self {
        self.rules = rules;
        self
    }

    /// Stops between transactions once `token` is cancelled.
    pub fn with_cancellation(mut self, token: &'a CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Warms the state with slots a speculative run of this message touched.
    pub fn with_prewarm(mut self, cache: &'a PrewarmCache) -> Self {
        self.prewarm = Some(cache);
        self
    }

    /// Executes on a copy of the parent state and seals the result.
    pub fn build(self) -> Result<ExecutedBlock, BuildError> {
        let mut state = InMemoryWorldState::clone(&self.parent.state);
        if let Some(cache) = self.prewarm {
            cache.apply(&mut state);
        }

        let BlockExecution { mut header, transactions, receipts } = self.execute(&mut state)?;
        header.state_root = state.state_root();

        let header = header.seal_slow();
        debug!(
            target: "arb::builder",
            number = header.number,
            hash = %header.hash(),
            txs = transactions.len(),
            gas_used = header.gas_used,
            "built block"
        );
        Ok(ExecutedBlock { header, transactions, receipts, state: Arc::new(state) })
    }

    /// Executes the block against `state`, which must hold the parent's post-state.
    pub fn execute(self, state: &mut dyn WorldState) -> Result<BlockExecution, BuildError> {
        let parent = &self.parent.header;
        let message = self.message;
        let number = parent.number + 1;
        let timestamp = message.header.timestamp.max(parent.timestamp);

        let arbos = ArbosState::open(&*state)?;
        let base_fee = arbos.l2_pricing().base_fee_wei(&*state);
        let per_block_gas_limit = arbos.l2_pricing().per_block_gas_limit(&*state);
        let chain_id: u64 = arbos.chain_id(&*state).saturating_to();

        let env = BlockEnv {
            number,
            timestamp,
            coinbase: message.header.sender,
            base_fee,
            gas_limit: GETH_BLOCK_GAS_LIMIT,
            chain_id,
            parent_hash: self.parent.hash(),
            rules: self.rules,
        };

        let start_block = ArbTransaction::from(InternalTx {
            chain_id,
            data: startBlockCall {
                l1BaseFee: message.header.l1_base_fee,
                l1BlockNumber: message.header.block_number,
                l2BlockNumber: number,
                timePassed: timestamp.saturating_sub(parent.timestamp),
            }
            .abi_encode()
            .into(),
        });

        let user_txs = match parse_l2_transactions(message, chain_id) {
            Ok(txs) => txs,
            Err(err) => {
                warn!(
                    target: "arb::builder",
                    %err,
                    kind = ?message.kind(),
                    "failed to parse message, building empty block"
                );
                Vec::new()
            }
        };

        let mut body = BodyBuilder {
            state,
            evm: self.evm,
            env: &env,
            transactions: Vec::with_capacity(user_txs.len() + 1),
            receipts: Vec::with_capacity(user_txs.len() + 1),
            cumulative_gas_used: 0,
        };

        let outcome = apply_transaction(&mut *body.state, &mut *body.evm, &env, &start_block)
            .map_err(BuildError::StartBlock)?;
        body.push(start_block, outcome.receipt);

        let mut block_gas_left = per_block_gas_limit;
        let mut user_txs_processed = 0usize;
        for tx in user_txs {
            if self.cancel.is_some_and(CancellationToken::is_cancelled) {
                return Err(BuildError::Cancelled);
            }

            if user_txs_processed > 0 && tx.gas_limit() > block_gas_left {
                debug!(
                    target: "arb::builder",
                    tx = %tx.hash(),
                    gas = tx.gas_limit(),
                    block_gas_left,
                    "block gas limit reached, skipping transaction"
                );
                continue;
            }

            let Some(receipt) = body.apply(tx)? else { continue };
            let compute_used = receipt.gas_used.saturating_sub(receipt.gas_used_for_l1);
            block_gas_left = block_gas_left.saturating_sub(compute_used);
            user_txs_processed += 1;
        }

        let gas_used = body.cumulative_gas_used;
        if gas_used > env.gas_limit {
            return Err(BuildError::GasLimitExceeded { gas_used, gas_limit: env.gas_limit });
        }
        let BodyBuilder { state, transactions, receipts, .. } = body;

        // ArbOS may have upgraded and moved its L1 block number during the block
        let arbos = ArbosState::open(&*state)?;
        let parent_info = HeaderInfo::extract_or_default(parent);
        let info = HeaderInfo {
            send_root: parent_info.send_root,
            send_count: parent_info.send_count,
            l1_block_number: arbos.blockhashes().l1_block_number(&*state),
            arbos_format_version: arbos.version(),
        };

        let mut header = Header {
            parent_hash: self.parent.hash(),
            beneficiary: env.coinbase,
            transactions_root: transactions_root(&transactions),
            difficulty: U256::from(1),
            number,
            gas_limit: env.gas_limit,
            gas_used,
            timestamp,
            nonce: B64::new(message.delayed_messages_read.to_be_bytes()),
            base_fee_per_gas: Some(base_fee.saturating_to()),
            ..Default::default()
        };
        info.apply(&mut header);

        Ok(BlockExecution { header, transactions, receipts })
    }
}

struct BodyBuilder<'a> {
    state: &'a mut dyn WorldState,
    evm: &'a mut dyn Evm,
    env: &'a BlockEnv,
    transactions: Vec<ArbTransaction>,
    receipts: Vec<TxReceipt>,
    cumulative_gas_used: u64,
}

impl BodyBuilder<'_> {
    fn push(&mut self, tx: ArbTransaction, mut receipt: TxReceipt) -> TxReceipt {
        self.cumulative_gas_used = self.cumulative_gas_used.saturating_add(receipt.gas_used);
        receipt.cumulative_gas_used = self.cumulative_gas_used;
        self.transactions.push(tx);
        self.receipts.push(receipt.clone());
        receipt
    }

    /// Applies `tx` and the retries it schedules. Returns the receipt of `tx` itself, or `None`
    /// when it was invalid and left out of the block.
    fn apply(&mut self, tx: ArbTransaction) -> Result<Option<TxReceipt>, BuildError> {
        let mut queue = VecDeque::from([tx]);
        let mut first = None;

        while let Some(tx) = queue.pop_front() {
            let hash = tx.hash();
            match apply_transaction(&mut *self.state, &mut *self.evm, self.env, &tx) {
                Ok(outcome) => {
                    trace!(
                        target: "arb::builder",
                        tx = %hash,
                        success = outcome.receipt.success,
                        gas_used = outcome.receipt.gas_used,
                        "applied transaction"
                    );
                    for (i, retry) in outcome.scheduled.into_iter().enumerate() {
                        queue.insert(i, retry.into());
                    }
                    let receipt = self.push(tx, outcome.receipt);
                    first.get_or_insert(receipt);
                }
                Err(source) if source.is_invariant_violation() => {
                    return Err(BuildError::Invariant { hash, source });
                }
                Err(err) => {
                    debug!(
                        target: "arb::builder",
                        tx = %hash,
                        %err,
                        "dropping invalid transaction"
                    );
                }
            }
        }
        Ok(first)
    }
}

/// Commitment over the transaction hashes in block order.
pub fn transactions_root(transactions: &[ArbTransaction]) -> B256 {
    let mut hashes = Vec::with_capacity(transactions.len() * 32);
    for tx in transactions {
        hashes.extend_from_slice(tx.hash().as_slice());
    }
    keccak256(hashes)
}

/// The block for message index zero: freshly initialized ArbOS and no transactions.
pub fn genesis_block(
    config: &ChainConfig,
    serialized_config: &[u8],
    initial_l1_base_fee: U256,
) -> Result<ExecutedBlock, BuildError> {
    let mut state = InMemoryWorldState::default();
    let arbos = ArbosState::initialize(&mut state, config, serialized_config, initial_l1_base_fee)?;
    let base_fee = arbos.l2_pricing().base_fee_wei(&state);

    let mut header = Header {
        difficulty: U256::from(1),
        number: config.arbitrum.genesis_block_num,
        gas_limit: GETH_BLOCK_GAS_LIMIT,
        nonce: B64::new(1u64.to_be_bytes()),
        base_fee_per_gas: Some(base_fee.saturating_to()),
        transactions_root: transactions_root(&[]),
        state_root: state.state_root(),
        ..Default::default()
    };
    HeaderInfo { arbos_format_version: arbos.version(), ..Default::default() }.apply(&mut header);

    Ok(ExecutedBlock {
        header: header.seal_slow(),
        transactions: Vec::new(),
        receipts: Vec::new(),
        state: Arc::new(state),
    })
}
