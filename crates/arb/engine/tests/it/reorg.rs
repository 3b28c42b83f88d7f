use crate::common::{digest_ticks, initialized, tick};
use alloy_eips::BlockNumHash;
use alloy_primitives::{address, U256};
use arb_chain_arbos::{test_utils::eth_deposit, WorldState};
use arb_chain_engine::{EngineConfig, EngineError, FinalityData};
use arb_chain_primitives::{FinalityRecord, MessageResult};

fn record(index: u64, result: MessageResult) -> Option<FinalityRecord> {
    Some(FinalityRecord { message_index: index, block_hash: result.block_hash })
}

#[tokio::test]
async fn reorg_to_genesis_is_rejected() {
    let engine = initialized(EngineConfig::default());
    digest_ticks(&engine, 1..=2).await;

    let err = engine.reorg(0, &[tick(1)]).await.unwrap_err();

    assert!(matches!(err, EngineError::ReorgToGenesis));
    assert_eq!(engine.head_message_index().unwrap(), 2);
}

#[tokio::test]
async fn reorg_beyond_head_is_rejected() {
    let engine = initialized(EngineConfig::default());
    digest_ticks(&engine, 1..=2).await;

    let err = engine.reorg(5, &[]).await.unwrap_err();
    assert!(matches!(err, EngineError::ReorgTargetNotFound(4)));
}

#[tokio::test]
async fn reorg_replaces_the_tail() {
    let engine = initialized(EngineConfig::default());
    let old = digest_ticks(&engine, 1..=4).await;
    let bob = address!("0x0000000000000000000000000000000000000b0b");

    let results = engine
        .reorg(3, &[eth_deposit(1, bob, U256::from(9)), tick(4)])
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(engine.head_message_index().unwrap(), 4);
    assert_eq!(engine.result_at_message_index(2).unwrap(), old[1]);
    assert_ne!(results[0], old[2]);
    assert_eq!(engine.result_at_message_index(3).unwrap(), results[0]);
    assert_eq!(engine.result_at_message_index(4).unwrap(), results[1]);
    assert_eq!(engine.tree().head().unwrap().state.balance(bob), U256::from(9));

    // digesting continues on the new branch
    let next = engine.digest_message(5, &tick(5), None).await.unwrap();
    assert_eq!(engine.tree().head().unwrap().header.parent_hash, results[1].block_hash);
    assert_eq!(engine.result_at_message_index(5).unwrap(), next);
}

#[tokio::test]
async fn reorg_without_messages_rewinds_head() {
    let engine = initialized(EngineConfig::default());
    let old = digest_ticks(&engine, 1..=3).await;

    assert!(engine.reorg(2, &[]).await.unwrap().is_empty());

    assert_eq!(engine.head_message_index().unwrap(), 1);
    assert_eq!(engine.tree().head().unwrap().hash(), old[0].block_hash);
    assert!(matches!(engine.result_at_message_index(2), Err(EngineError::MessageNotFound(2))));
}

#[tokio::test]
async fn reorg_below_finality_clears_pointers() {
    let engine = initialized(EngineConfig::default());
    let old = digest_ticks(&engine, 1..=4).await;
    engine
        .set_finality_data(&FinalityData {
            safe: record(4, old[3]),
            finalized: record(3, old[2]),
            validated: None,
        })
        .unwrap();

    engine.reorg(3, &[tick(30)]).await.unwrap();

    assert_eq!(engine.tree().safe(), None);
    assert_eq!(engine.tree().finalized(), None);
}

#[tokio::test]
async fn reorg_keeps_pointers_at_or_below_the_kept_block() {
    let engine = initialized(EngineConfig::default());
    let old = digest_ticks(&engine, 1..=4).await;
    engine
        .set_finality_data(&FinalityData {
            safe: record(3, old[2]),
            finalized: record(2, old[1]),
            validated: None,
        })
        .unwrap();

    engine.reorg(3, &[tick(30)]).await.unwrap();

    assert_eq!(engine.tree().safe(), None);
    assert_eq!(engine.tree().finalized(), Some(BlockNumHash::new(2, old[1].block_hash)));
}
