use crate::common::{digest_ticks, initialized};
use alloy_eips::BlockNumHash;
use alloy_primitives::B256;
use arb_chain_engine::{EngineConfig, EngineError, FinalityData};
use arb_chain_primitives::{ConsensusSyncData, FinalityRecord};
use serde_json::Value;
use std::{
    collections::BTreeMap,
    time::{SystemTime, UNIX_EPOCH},
};

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis() as u64
}

#[tokio::test]
async fn finality_moves_safe_and_finalized() {
    let engine = initialized(EngineConfig::default());
    let results = digest_ticks(&engine, 1..=3).await;

    engine
        .set_finality_data(&FinalityData {
            safe: Some(FinalityRecord { message_index: 3, block_hash: results[2].block_hash }),
            finalized: Some(FinalityRecord {
                message_index: 2,
                block_hash: results[1].block_hash,
            }),
            validated: None,
        })
        .unwrap();

    assert_eq!(engine.tree().safe(), Some(BlockNumHash::new(3, results[2].block_hash)));
    assert_eq!(engine.tree().finalized(), Some(BlockNumHash::new(2, results[1].block_hash)));
}

#[tokio::test]
async fn finality_hash_mismatch_is_fatal() {
    let engine = initialized(EngineConfig::default());
    digest_ticks(&engine, 1..=2).await;

    let err = engine
        .set_finality_data(&FinalityData {
            finalized: Some(FinalityRecord {
                message_index: 2,
                block_hash: B256::repeat_byte(7),
            }),
            ..Default::default()
        })
        .unwrap_err();

    assert!(matches!(err, EngineError::FinalityMismatch { kind: "finalized", number: 2, .. }));
    assert!(err.is_fatal());
    assert!(engine.shutdown_token().is_cancelled());
    assert_eq!(engine.tree().finalized(), None);
}

#[tokio::test]
async fn validator_wait_holds_back_safe_block() {
    let engine = initialized(EngineConfig {
        safe_block_wait_for_validator: true,
        ..Default::default()
    });
    let results = digest_ticks(&engine, 1..=3).await;
    let record = |index: u64| {
        let block_hash = results[index as usize - 1].block_hash;
        Some(FinalityRecord { message_index: index, block_hash })
    };

    engine
        .set_finality_data(&FinalityData { safe: record(3), finalized: None, validated: record(1) })
        .unwrap();

    assert_eq!(engine.tree().safe(), Some(BlockNumHash::new(1, results[0].block_hash)));
}

#[tokio::test]
async fn synced_tracks_consensus_message_count() {
    let engine = initialized(EngineConfig::default());
    digest_ticks(&engine, 1..=3).await;
    assert!(!engine.synced());

    let sync_data = |max_message_count| ConsensusSyncData {
        synced: true,
        max_message_count,
        sync_progress_map: BTreeMap::from([("feedPending".to_string(), Value::from(0))]),
        updated_at: now_ms(),
    };

    engine.set_consensus_sync_data(sync_data(4));
    assert!(engine.synced());

    let progress = engine.full_sync_progress_map();
    assert_eq!(progress["feedPending"], Value::from(0));
    assert_eq!(progress["consensusMaxMessageCount"], Value::from(4));
    assert_eq!(progress["executionMessageCount"], Value::from(4));

    // the target is the oldest report still inside the lag window
    engine.set_consensus_sync_data(sync_data(6));
    assert!(engine.synced());
}
