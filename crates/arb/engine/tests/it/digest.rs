use crate::common::{digest_ticks, engine, initialized, tick};
use alloy_primitives::{address, Address, B256, U256};
use arb_chain_arbos::{
    test_utils::{
        chain_config, eth_deposit, serialized_chain_config, unsigned_tx, INITIAL_L1_BASE_FEE,
        TEST_ARBOS_VERSION,
    },
    ArbosError, BlockEnv, CallOutcome, CallRequest, Evm, WorldState,
};
use arb_chain_engine::{BuildError, EngineConfig, EngineError, ErrorKind, ExecutionEngine};
use futures::future::join_all;
use tokio_util::sync::CancellationToken;

const ALICE: Address = address!("0x00000000000000000000000000000000000a11ce");

#[tokio::test]
async fn digests_messages_in_order() {
    let engine = initialized(EngineConfig::default());
    assert_eq!(engine.head_message_index().unwrap(), 0);

    let results = digest_ticks(&engine, 1..=3).await;

    assert_eq!(engine.head_message_index().unwrap(), 3);
    for (index, result) in (1..).zip(&results) {
        assert_eq!(engine.result_at_message_index(index).unwrap(), *result);
    }
    let head = engine.tree().head().unwrap();
    assert_eq!(head.hash(), results[2].block_hash);
    assert_eq!(head.header.parent_hash, results[1].block_hash);
    assert_eq!(engine.arbos_version_for_message_index(3).unwrap(), TEST_ARBOS_VERSION);
}

#[tokio::test]
async fn digest_is_idempotent() {
    let engine = initialized(EngineConfig::default());
    let first = digest_ticks(&engine, [1]).await[0];

    // a different message for the same index returns the stored block
    let again = engine.digest_message(1, &tick(7), None).await.unwrap();

    assert_eq!(again, first);
    assert_eq!(engine.head_message_index().unwrap(), 1);
}

#[tokio::test]
async fn gap_in_message_indices_is_rejected() {
    let engine = initialized(EngineConfig::default());

    let err = engine.digest_message(2, &tick(2), None).await.unwrap_err();

    assert!(matches!(err, EngineError::WrongBlockNumber { got: 2, expected: 1 }));
    assert_eq!(err.code(), ErrorKind::Validation);
    assert_eq!(engine.head_message_index().unwrap(), 0);
}

#[tokio::test]
async fn digest_before_init_fails() {
    let engine = engine(EngineConfig::default());
    assert_eq!(engine.head_message_index().unwrap(), 0);

    let err = engine.digest_message(1, &tick(1), None).await.unwrap_err();
    assert!(matches!(err, EngineError::MissingGenesis));
}

#[tokio::test]
async fn concurrent_digests_contend_for_the_build_slot() {
    let engine = initialized(EngineConfig::default());
    let (first, second) = (tick(1), tick(2));

    let (first, second) = tokio::join!(
        engine.digest_message(1, &first, None),
        engine.digest_message(2, &second, None),
    );

    assert!(first.is_ok());
    let err = second.unwrap_err();
    assert!(matches!(err, EngineError::BuildInProgress));
    assert_eq!(err.code(), ErrorKind::Contention);
    assert_eq!(engine.head_message_index().unwrap(), 1);

    // the slot is free again
    engine.digest_message(2, &tick(2), None).await.unwrap();
}

#[tokio::test]
async fn racing_digests_build_a_single_block() {
    let engine = initialized(EngineConfig::default());
    let message = tick(1);

    let results = join_all((0..8).map(|_| engine.digest_message(1, &message, None))).await;

    let built = results.iter().filter(|result| result.is_ok()).count();
    assert!(built >= 1);
    for result in &results {
        match result {
            Ok(result) => assert_eq!(engine.result_at_message_index(1).unwrap(), *result),
            Err(err) => assert!(matches!(err, EngineError::BuildInProgress)),
        }
    }
    assert_eq!(engine.head_message_index().unwrap(), 1);
}

#[tokio::test]
async fn deposit_credits_recipient() {
    let engine = initialized(EngineConfig::default());
    let amount = U256::from(1_000_000_000u64);

    engine.digest_message(1, &eth_deposit(1, ALICE, amount), None).await.unwrap();

    let head = engine.tree().head().unwrap();
    assert_eq!(head.transactions.len(), 2);
    assert!(head.receipts[1].success);
    assert_eq!(head.state.balance(ALICE), amount);
}

#[tokio::test]
async fn prefetching_does_not_change_results() {
    let plain = initialized(EngineConfig::default());
    let prefetching = initialized(EngineConfig { prefetch: true, ..Default::default() });
    let messages: Vec<_> =
        (1..=4u8).map(|request| eth_deposit(request, ALICE, U256::from(request))).collect();

    for (index, message) in (1..).zip(&messages) {
        let next = messages.get(index as usize);
        let expected = plain.digest_message(index, message, None).await.unwrap();
        let actual = prefetching.digest_message(index, message, next).await.unwrap();
        assert_eq!(actual, expected);
    }
}

#[test]
fn init_message_is_validated() {
    let engine = engine(EngineConfig::default());
    let config = chain_config().to_json().unwrap();

    let err = engine.digest_init_message(U256::ZERO, &config).unwrap_err();
    assert!(matches!(err, EngineError::ZeroInitialL1BaseFee));

    let fee = U256::from(INITIAL_L1_BASE_FEE);
    assert!(matches!(engine.digest_init_message(fee, &[]), Err(EngineError::EmptyChainConfig)));
    assert!(matches!(
        engine.digest_init_message(fee, b"{not json"),
        Err(EngineError::InvalidChainConfig(_))
    ));
    assert!(engine.tree().genesis().is_none());

    let genesis = engine.digest_init_message(fee, &config).unwrap();
    assert_eq!(genesis.send_root, B256::ZERO);

    // once genesis exists the arguments no longer matter
    assert_eq!(engine.digest_init_message(U256::ZERO, &[]).unwrap(), genesis);
}

#[tokio::test]
async fn genesis_offset_maps_indices_to_block_numbers() {
    let engine = engine(EngineConfig { genesis_block_num: 100, ..Default::default() });
    let mut config = chain_config();

    let err = engine
        .digest_init_message(U256::from(INITIAL_L1_BASE_FEE), &config.to_json().unwrap())
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::GenesisBlockMismatch { configured: 100, chain_config: 0 }
    ));

    config.arbitrum.genesis_block_num = 100;
    engine
        .digest_init_message(U256::from(INITIAL_L1_BASE_FEE), &config.to_json().unwrap())
        .unwrap();
    digest_ticks(&engine, [1]).await;

    assert_eq!(engine.tree().head().unwrap().number(), 101);
    assert_eq!(engine.head_message_index().unwrap(), 1);
    assert_eq!(engine.message_index_to_block_number(1).unwrap(), 101);
    assert_eq!(engine.block_number_to_message_index(101).unwrap(), 1);
    let below_genesis = engine.block_number_to_message_index(99).unwrap_err();
    assert_eq!(below_genesis.code(), ErrorKind::Validation);
}

/// An interpreter that breaks on every call.
#[derive(Debug)]
struct FaultyEvm;

impl Evm for FaultyEvm {
    fn call(
        &mut self,
        _state: &mut dyn WorldState,
        _env: &BlockEnv,
        _request: &CallRequest,
    ) -> Result<CallOutcome, ArbosError> {
        Err(ArbosError::Evm("interpreter fault".into()))
    }
}

#[tokio::test]
async fn fatal_build_error_shuts_the_engine_down() {
    let engine =
        ExecutionEngine::new(EngineConfig::default(), || FaultyEvm, CancellationToken::new())
            .unwrap();
    engine
        .digest_init_message(U256::from(INITIAL_L1_BASE_FEE), &serialized_chain_config())
        .unwrap();
    let funds = U256::from(10u64).pow(U256::from(18));
    engine.digest_message(1, &eth_deposit(1, ALICE, funds), None).await.unwrap();
    assert!(!engine.shutdown_token().is_cancelled());

    let bob = address!("0x0000000000000000000000000000000000000b0b");
    let call = unsigned_tx(ALICE, 0, bob, U256::ZERO, 100_000);
    let err = engine.digest_message(2, &call, None).await.unwrap_err();

    assert!(matches!(err, EngineError::Build(BuildError::Invariant { .. })));
    assert_eq!(err.code(), ErrorKind::Fatal);
    assert!(engine.shutdown_token().is_cancelled());
    assert_eq!(engine.head_message_index().unwrap(), 1);
}
