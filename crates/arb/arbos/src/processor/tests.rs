use super::*;
use crate::{
    evm::ChainRules,
    retryables::RETRYABLE_LIFETIME_SECONDS,
    state::InMemoryWorldState,
    test_utils::{self, ScriptedCall, ScriptedEvm, CHAIN_OWNER, L1_SENDER, TEST_CHAIN_ID},
};
use alloy_primitives::{address, Bytes};
use alloy_sol_types::SolCall;
use arb_chain_primitives::{
    abi::ArbosActs::startBlockCall,
    addresses::{retryable_escrow_address, HISTORY_STORAGE_ADDRESS},
    InternalTx, SubmitRetryableTx, UnsignedTx,
};
use test_case::test_case;

const ALICE: Address = address!("0x00000000000000000000000000000000000000a1");
const BOB: Address = address!("0x00000000000000000000000000000000000000b0");
const REFUND: Address = address!("0x00000000000000000000000000000000000000fe");
const ONE_ETHER: u64 = 1_000_000_000_000_000_000;
const GWEI: u64 = 1_000_000_000;

/// An environment for delayed-inbox transactions, which post no calldata of their own.
fn delayed_env(number: u64) -> BlockEnv {
    BlockEnv { coinbase: L1_SENDER, ..test_utils::block_env(number) }
}

fn unsigned(nonce: u64, gas: u64, value: u64) -> ArbTransaction {
    UnsignedTx {
        chain_id: TEST_CHAIN_ID,
        from: ALICE,
        nonce,
        gas_fee_cap: U256::from(test_utils::block_env(1).base_fee),
        gas,
        to: Some(BOB),
        value: U256::from(value),
        data: Bytes::new(),
    }
    .into()
}

fn start_block(env: &BlockEnv, l1_block_number: u64, time_passed: u64) -> ArbTransaction {
    let data = startBlockCall {
        l1BaseFee: U256::from(test_utils::INITIAL_L1_BASE_FEE),
        l1BlockNumber: l1_block_number,
        l2BlockNumber: env.number,
        timePassed: time_passed,
    }
    .abi_encode();
    InternalTx { chain_id: TEST_CHAIN_ID, data: data.into() }.into()
}

/// A submission whose deposit covers the submission fee, the call value and the full gas budget.
fn funded_submission(gas_fee_cap: U256) -> SubmitRetryableTx {
    let gas = 100_000u64;
    let max_submission_fee = U256::from(2_000 * GWEI);
    let retry_value = U256::from(1_000);
    SubmitRetryableTx {
        chain_id: TEST_CHAIN_ID,
        request_id: B256::with_last_byte(1),
        from: L1_SENDER,
        l1_base_fee: U256::from(GWEI),
        deposit_value: max_submission_fee + retry_value + gas_fee_cap * U256::from(gas),
        gas_fee_cap,
        gas,
        retry_to: Some(BOB),
        retry_value,
        beneficiary: ALICE,
        max_submission_fee,
        fee_refund_addr: REFUND,
        retry_data: Bytes::from_static(&[0xca, 0xfe, 0x01, 0x02]),
    }
}

#[test]
fn deposit_mints_and_transfers() {
    let (mut state, _) = test_utils::genesis_state();
    let tx = ArbTransaction::from(DepositTx {
        chain_id: TEST_CHAIN_ID,
        l1_request_id: B256::with_last_byte(1),
        from: L1_SENDER,
        to: ALICE,
        value: U256::from(100),
    });

    let outcome =
        apply_transaction(&mut state, &mut ScriptedEvm::new(), &test_utils::block_env(1), &tx)
            .unwrap();
    assert!(outcome.receipt.success);
    assert_eq!(outcome.receipt.gas_used, 0);
    assert_eq!(state.balance(ALICE), U256::from(100));
    assert_eq!(state.balance(L1_SENDER), U256::ZERO);
}

#[test]
fn internal_tx_must_come_from_arbos() {
    let (mut state, _) = test_utils::genesis_state();
    let env = test_utils::block_env(1);
    let tx = start_block(&env, 10, 1);

    let err = apply_transaction_from(&mut state, &mut ScriptedEvm::new(), &env, &tx, ALICE)
        .unwrap_err();
    assert_eq!(err, TxError::InternalNotFromArbos);
}

#[test]
fn malformed_internal_tx_is_rejected() {
    let (mut state, _) = test_utils::genesis_state();
    let env = test_utils::block_env(1);
    let root = state.state_root();

    for data in [vec![0x01, 0x02], vec![0xde, 0xad, 0xbe, 0xef, 0x00]] {
        let tx = ArbTransaction::from(InternalTx { chain_id: TEST_CHAIN_ID, data: data.into() });
        let err = apply_transaction(&mut state, &mut ScriptedEvm::new(), &env, &tx).unwrap_err();
        assert!(matches!(err, TxError::MalformedInternal(_)), "{err}");
    }
    assert_eq!(state.state_root(), root);
}

#[test]
fn start_block_reaps_two_expired_tickets_at_most() {
    test_utils::init_tracing();
    let (mut state, arbos) = test_utils::genesis_state();
    let env = test_utils::block_env(1);
    let beneficiary = address!("0x00000000000000000000000000000000000000be");

    let ids: Vec<B256> = (1..=3u8).map(B256::with_last_byte).collect();
    for id in &ids {
        arbos.retryables().create_retryable(
            &mut state,
            *id,
            env.timestamp - 1,
            L1_SENDER,
            Some(BOB),
            U256::from(10),
            beneficiary,
            &[],
        );
        state.add_balance(retryable_escrow_address(*id), U256::from(10));
    }

    let outcome =
        apply_transaction(&mut state, &mut ScriptedEvm::new(), &env, &start_block(&env, 100, 1))
            .unwrap();
    assert!(outcome.receipt.success);

    let retryables = arbos.retryables();
    assert!(retryables.open_retryable(&state, ids[0], 0).is_none());
    assert!(retryables.open_retryable(&state, ids[1], 0).is_none());
    assert!(retryables.open_retryable(&state, ids[2], 0).is_some());
    assert_eq!(retryables.timeout_queue().size(&state), 1);
    assert_eq!(state.balance(beneficiary), U256::from(20));
    assert_eq!(arbos.blockhashes().l1_block_number(&state), 100);
}

#[test]
fn start_block_drains_backlog_and_reprices() {
    let (mut state, arbos) = test_utils::genesis_state();
    let env = test_utils::block_env(1);
    let l2_pricing = arbos.l2_pricing();
    let min_base_fee = l2_pricing.min_base_fee_wei(&state);

    l2_pricing.set_gas_backlog(&mut state, 500_000_000);
    apply_transaction(&mut state, &mut ScriptedEvm::new(), &env, &start_block(&env, 1, 1)).unwrap();
    let speed_limit = l2_pricing.speed_limit_per_second(&state);
    assert_eq!(l2_pricing.gas_backlog(&state), 500_000_000 - speed_limit);
    assert!(l2_pricing.base_fee_wei(&state) > min_base_fee);

    l2_pricing.set_gas_backlog(&mut state, 0);
    apply_transaction(&mut state, &mut ScriptedEvm::new(), &env, &start_block(&env, 1, 1)).unwrap();
    assert_eq!(l2_pricing.base_fee_wei(&state), min_base_fee);
}

#[test]
fn start_block_records_parent_hash_from_v40() {
    let env = test_utils::block_env(5);

    let (mut state, _) = test_utils::genesis_state_at(40);
    apply_transaction(&mut state, &mut ScriptedEvm::new(), &env, &start_block(&env, 1, 1)).unwrap();
    let slot = B256::from(U256::from(4));
    assert_eq!(state.storage(HISTORY_STORAGE_ADDRESS, slot), env.parent_hash);

    let (mut state, _) = test_utils::genesis_state_at(32);
    apply_transaction(&mut state, &mut ScriptedEvm::new(), &env, &start_block(&env, 1, 1)).unwrap();
    assert_eq!(state.storage(HISTORY_STORAGE_ADDRESS, slot), B256::ZERO);
}

#[test]
fn scheduled_upgrade_runs_at_its_timestamp() {
    let (mut state, arbos) = test_utils::genesis_state();
    let env = test_utils::block_env(3);
    arbos.schedule_arbos_upgrade(&mut state, 40, env.timestamp + 1);

    apply_transaction(&mut state, &mut ScriptedEvm::new(), &env, &start_block(&env, 1, 1)).unwrap();
    assert_eq!(ArbosState::open(&state).unwrap().version(), 32);

    let env = test_utils::block_env(4);
    apply_transaction(&mut state, &mut ScriptedEvm::new(), &env, &start_block(&env, 1, 1)).unwrap();
    assert_eq!(ArbosState::open(&state).unwrap().version(), 40);
}

#[test_case(21_000, 5_000 ; "poster fee below total cost")]
#[test_case(21_000, 0 ; "no poster fee")]
fn settle_fees_mints_base_fee_times_gas_used(gas_used: u64, poster_fee: u64) {
    let (mut state, arbos) = test_utils::genesis_state();
    let env = BlockEnv { base_fee: U256::from(10 * GWEI), ..test_utils::block_env(1) };
    let network = arbos.network_fee_account(&state);
    assert_eq!(network, CHAIN_OWNER);
    assert!(arbos.infra_fee_account(&state).is_zero());
    let fees_available = arbos.l1_pricing().l1_fees_available(&state);

    let mut evm = ScriptedEvm::new();
    let ctx = TxContext { poster_fee: U256::from(poster_fee), ..Default::default() };
    let mut processor = TxProcessor { state: &mut state, evm: &mut evm, env: &env, arbos, ctx };
    processor.settle_fees(gas_used, env.base_fee).unwrap();

    let total = env.base_fee * U256::from(gas_used);
    let compute_cost = total - U256::from(poster_fee);
    assert_eq!(state.balance(network), compute_cost);
    assert_eq!(state.balance(L1_PRICER_FUNDS_POOL_ADDRESS), U256::from(poster_fee));
    assert_eq!(state.balance(network) + state.balance(L1_PRICER_FUNDS_POOL_ADDRESS), total);

    let arbos = ArbosState::open(&state).unwrap();
    assert_eq!(
        arbos.l1_pricing().l1_fees_available(&state),
        fees_available + U256::from(poster_fee)
    );
    assert_eq!(arbos.l2_pricing().gas_backlog(&state), gas_used);
}

#[test]
fn settle_fees_clamps_compute_cost_when_poster_fee_exceeds_total() {
    let (mut state, arbos) = test_utils::genesis_state();
    let env = test_utils::block_env(1);
    let network = arbos.network_fee_account(&state);

    let mut evm = ScriptedEvm::new();
    let ctx =
        TxContext { poster_gas: 30_000, poster_fee: U256::from(ONE_ETHER), ..Default::default() };
    let mut processor = TxProcessor { state: &mut state, evm: &mut evm, env: &env, arbos, ctx };
    processor.settle_fees(21_000, env.base_fee).unwrap();

    assert_eq!(state.balance(network), U256::ZERO);
    assert_eq!(state.balance(L1_PRICER_FUNDS_POOL_ADDRESS), U256::from(ONE_ETHER));
    assert_eq!(ArbosState::open(&state).unwrap().l2_pricing().gas_backlog(&state), 0);
}

#[test]
fn infra_fee_account_takes_min_base_fee_share() {
    let (mut state, arbos) = test_utils::genesis_state();
    let infra = address!("0x00000000000000000000000000000000000000cc");
    arbos.set_infra_fee_account(&mut state, infra);
    let env = BlockEnv { base_fee: U256::from(10 * GWEI), ..test_utils::block_env(1) };
    let min_base_fee = arbos.l2_pricing().min_base_fee_wei(&state);

    let mut evm = ScriptedEvm::new();
    let ctx = TxContext::default();
    let mut processor = TxProcessor { state: &mut state, evm: &mut evm, env: &env, arbos, ctx };
    processor.settle_fees(21_000, env.base_fee).unwrap();

    let infra_cost = min_base_fee * U256::from(21_000);
    assert_eq!(state.balance(infra), infra_cost);
    assert_eq!(state.balance(CHAIN_OWNER), env.base_fee * U256::from(21_000) - infra_cost);
}

#[test]
fn unsigned_tx_pays_for_gas_used() {
    let (mut state, _) = test_utils::genesis_state();
    state.add_balance(ALICE, U256::from(ONE_ETHER));
    let env = delayed_env(1);
    let mut evm = ScriptedEvm::new().with(ScriptedCall::success(9_000));

    let outcome = apply_transaction(&mut state, &mut evm, &env, &unsigned(0, 100_000, 5)).unwrap();
    let receipt = outcome.receipt;
    assert!(receipt.success);
    assert_eq!(receipt.gas_used, 30_000);
    assert_eq!(receipt.gas_used_for_l1, 0);
    assert_eq!(receipt.effective_gas_price, env.base_fee);

    assert_eq!(evm.requests.len(), 1);
    assert_eq!(evm.requests[0].gas_limit, 79_000);
    let fee = env.base_fee * U256::from(30_000);
    assert_eq!(state.balance(ALICE), U256::from(ONE_ETHER) - fee - U256::from(5));
    assert_eq!(state.balance(BOB), U256::from(5));
    assert_eq!(state.balance(CHAIN_OWNER), fee);
    assert_eq!(state.nonce(ALICE), 1);
}

#[test]
fn refund_is_capped_by_quotient() {
    let (mut state, _) = test_utils::genesis_state();
    state.add_balance(ALICE, U256::from(ONE_ETHER));
    let env = delayed_env(1);
    let mut evm = ScriptedEvm::new().with(ScriptedCall::success(50_000).with_refund(40_000));

    let outcome = apply_transaction(&mut state, &mut evm, &env, &unsigned(0, 100_000, 0)).unwrap();
    // 71_000 spent, a fifth of it comes back
    assert_eq!(outcome.receipt.gas_used, 71_000 - 14_200);
}

#[test]
fn reverted_call_forfeits_refund_but_keeps_hold_gas() {
    let (mut state, arbos) = test_utils::genesis_state();
    arbos.l2_pricing().set_per_block_gas_limit(&mut state, 50_000);
    state.add_balance(ALICE, U256::from(ONE_ETHER));
    let env = delayed_env(1);
    let mut evm = ScriptedEvm::new().with(ScriptedCall::revert(50_000).with_refund(40_000));

    let outcome = apply_transaction(&mut state, &mut evm, &env, &unsigned(0, 100_000, 5)).unwrap();
    assert_eq!(evm.requests[0].gas_limit, 50_000);
    assert!(!outcome.receipt.success);
    assert_eq!(outcome.receipt.gas_used, 71_000);
    assert_eq!(state.balance(BOB), U256::ZERO);
    assert_eq!(state.nonce(ALICE), 1);
}

#[test]
fn nonce_mismatch_leaves_state_untouched() {
    let (mut state, _) = test_utils::genesis_state();
    state.add_balance(ALICE, U256::from(ONE_ETHER));
    let root = state.state_root();

    let err = apply_transaction(
        &mut state,
        &mut ScriptedEvm::new(),
        &delayed_env(1),
        &unsigned(3, 100_000, 0),
    )
    .unwrap_err();
    assert_eq!(err, TxError::NonceMismatch { address: ALICE, expected: 0, got: 3 });
    assert_eq!(state.state_root(), root);
}

#[test]
fn batch_posted_tx_must_cover_l1_cost() {
    let (mut state, _) = test_utils::genesis_state();
    state.add_balance(ALICE, U256::from(ONE_ETHER));
    let root = state.state_root();

    let err = apply_transaction(
        &mut state,
        &mut ScriptedEvm::new(),
        &test_utils::block_env(1),
        &unsigned(0, 25_000, 0),
    )
    .unwrap_err();
    assert!(matches!(err, TxError::InsufficientGasForL1Cost { have: 4_000, .. }), "{err}");
    assert_eq!(state.state_root(), root);
}

#[test]
fn fee_cap_below_base_fee_is_invalid() {
    let (mut state, _) = test_utils::genesis_state();
    state.add_balance(ALICE, U256::from(ONE_ETHER));
    let env = BlockEnv { base_fee: U256::from(10 * GWEI), ..delayed_env(1) };

    let err = apply_transaction(&mut state, &mut ScriptedEvm::new(), &env, &unsigned(0, 100_000, 0))
        .unwrap_err();
    assert!(matches!(err, TxError::FeeCapTooLow { .. }));
}

#[test]
fn submit_retryable_schedules_auto_redeem() {
    let (mut state, arbos) = test_utils::genesis_state();
    let env = test_utils::block_env(1);
    let base_fee = env.base_fee;
    let submit = funded_submission(base_fee * U256::from(2));
    let tx = ArbTransaction::from(submit.clone());
    let ticket_id = tx.hash();

    let outcome = apply_transaction(&mut state, &mut ScriptedEvm::new(), &env, &tx).unwrap();
    assert!(outcome.receipt.success);
    assert_eq!(outcome.receipt.gas_used, 100_000);
    assert_eq!(outcome.receipt.logs.len(), 2);
    assert_eq!(outcome.scheduled.len(), 1);

    let submission_fee = U256::from(GWEI) * U256::from(1_400 + 6 * 4);
    let excess_submission_fee = submit.max_submission_fee - submission_fee;
    let gas_cost = base_fee * U256::from(100_000);
    let retry = &outcome.scheduled[0];
    let expected = RetryTx {
        chain_id: TEST_CHAIN_ID,
        nonce: 0,
        from: L1_SENDER,
        gas_fee_cap: base_fee,
        gas: 100_000,
        to: Some(BOB),
        value: U256::from(1_000),
        data: submit.retry_data.clone(),
        ticket_id,
        refund_to: REFUND,
        max_refund: gas_cost * U256::from(2) + submission_fee,
        submission_fee_refund: submission_fee,
    };
    assert_eq!(retry, &expected);
    assert_eq!(outcome.receipt.logs[1].topics()[2], expected.hash());

    let ticket = arbos.retryables().open_retryable(&state, ticket_id, env.timestamp).unwrap();
    assert_eq!(ticket.timeout(&state), env.timestamp + RETRYABLE_LIFETIME_SECONDS);
    assert_eq!(ticket.num_tries(&state), 1);
    assert_eq!(state.balance(retryable_escrow_address(ticket_id)), U256::from(1_000));
    assert_eq!(state.balance(L1_SENDER), U256::ZERO);
    assert_eq!(state.balance(CHAIN_OWNER), submission_fee + gas_cost);
    assert_eq!(state.balance(REFUND), excess_submission_fee + gas_cost);
}

#[test]
fn ticket_timeout_saturates_at_the_end_of_time() {
    let (mut state, arbos) = test_utils::genesis_state();
    let mut env = test_utils::block_env(1);
    env.timestamp = u64::MAX - 1;
    let tx = ArbTransaction::from(funded_submission(env.base_fee * U256::from(2)));

    let outcome = apply_transaction(&mut state, &mut ScriptedEvm::new(), &env, &tx).unwrap();

    assert!(outcome.receipt.success);
    let ticket = arbos.retryables().open_retryable(&state, tx.hash(), env.timestamp).unwrap();
    assert_eq!(ticket.timeout(&state), u64::MAX);
}

fn submitted_retry(state: &mut InMemoryWorldState, env: &BlockEnv) -> RetryTx {
    let submit = funded_submission(env.base_fee);
    let outcome =
        apply_transaction(state, &mut ScriptedEvm::new(), env, &submit.into()).unwrap();
    outcome.scheduled.into_iter().next().unwrap()
}

#[test]
fn successful_retry_deletes_ticket_and_refunds() {
    let (mut state, arbos) = test_utils::genesis_state();
    let env = test_utils::block_env(1);
    let retry = submitted_retry(&mut state, &env);
    let network_before = state.balance(CHAIN_OWNER);
    let refund_before = state.balance(REFUND);

    let mut evm = ScriptedEvm::new().with(ScriptedCall::success(30_000));
    let outcome = apply_transaction(&mut state, &mut evm, &env, &retry.clone().into()).unwrap();
    assert!(outcome.receipt.success);
    let gas_used = 100_000 - (78_936 - 30_000);
    assert_eq!(outcome.receipt.gas_used, gas_used);

    let gas_left_refund = env.base_fee * U256::from(100_000 - gas_used);
    assert!(arbos.retryables().open_retryable(&state, retry.ticket_id, 0).is_none());
    assert_eq!(state.balance(BOB), U256::from(1_000));
    assert_eq!(state.balance(L1_SENDER), U256::ZERO);
    assert_eq!(
        state.balance(CHAIN_OWNER),
        network_before - retry.submission_fee_refund - gas_left_refund
    );
    assert_eq!(
        state.balance(REFUND),
        refund_before + retry.submission_fee_refund + gas_left_refund
    );

    // the ticket is gone, a second redeem finds nothing
    let outcome = apply_transaction(&mut state, &mut evm, &env, &retry.clone().into()).unwrap();
    assert!(!outcome.receipt.success);
    assert_eq!(
        outcome.failure,
        Some(TxError::Arbos(ArbosError::RetryableNotFound(retry.ticket_id)))
    );
}

#[test]
fn failed_retry_re_escrows_value() {
    let (mut state, arbos) = test_utils::genesis_state();
    let env = test_utils::block_env(1);
    let retry = submitted_retry(&mut state, &env);

    let mut evm = ScriptedEvm::new().with(ScriptedCall::revert(30_000));
    let outcome = apply_transaction(&mut state, &mut evm, &env, &retry.clone().into()).unwrap();
    assert!(!outcome.receipt.success);
    assert!(outcome.failure.is_none());

    let escrow = retryable_escrow_address(retry.ticket_id);
    assert_eq!(state.balance(escrow), U256::from(1_000));
    assert_eq!(state.balance(L1_SENDER), U256::ZERO);
    assert_eq!(state.balance(BOB), U256::ZERO);
    assert!(arbos.retryables().open_retryable(&state, retry.ticket_id, env.timestamp).is_some());
}

#[test]
fn low_fee_cap_skips_auto_redeem() {
    let (mut state, arbos) = test_utils::genesis_state();
    let env = test_utils::block_env(1);
    let submit = funded_submission(env.base_fee / U256::from(2));
    let tx = ArbTransaction::from(submit.clone());

    let outcome = apply_transaction(&mut state, &mut ScriptedEvm::new(), &env, &tx).unwrap();
    assert!(outcome.receipt.success);
    assert_eq!(outcome.receipt.logs.len(), 1);
    assert!(outcome.scheduled.is_empty());
    assert_eq!(outcome.receipt.gas_used, 0);

    let gas_budget = submit.gas_fee_cap * U256::from(submit.gas);
    let submission_fee = U256::from(GWEI) * U256::from(1_424);
    assert_eq!(
        state.balance(REFUND),
        submit.max_submission_fee - submission_fee + gas_budget
    );
    assert_eq!(state.balance(L1_SENDER), U256::ZERO);
    assert!(arbos.retryables().open_retryable(&state, tx.hash(), env.timestamp).is_some());
}

#[test]
fn underfunded_submission_fails_in_block() {
    let (mut state, _) = test_utils::genesis_state();
    let env = test_utils::block_env(1);
    let submit = SubmitRetryableTx {
        deposit_value: U256::ZERO,
        ..funded_submission(env.base_fee)
    };
    let max_submission_fee = submit.max_submission_fee;

    let outcome =
        apply_transaction(&mut state, &mut ScriptedEvm::new(), &env, &submit.into()).unwrap();
    assert!(!outcome.receipt.success);
    assert_eq!(
        outcome.failure,
        Some(TxError::InsufficientSubmissionFunds {
            address: L1_SENDER,
            have: U256::ZERO,
            want: max_submission_fee,
        })
    );
}

#[test]
fn london_rules_use_tighter_refund_quotient() {
    assert_eq!(ChainRules::default().max_refund_quotient(), 5);
    assert_eq!(ChainRules { eip3529: false, eip7623: false }.max_refund_quotient(), 2);
}
