use crate::common::{engine, initialized, tick};
use arb_chain_engine::{
    processing::{ProcessingEvent, ProcessingResult},
    BuildMode, EngineConfig, EngineError, ErrorKind,
};
use std::time::Duration;

fn wait_for_processing() -> EngineConfig {
    EngineConfig {
        build_mode: BuildMode::WaitForProcessing { timeout: Duration::from_secs(5) },
        ..Default::default()
    }
}

#[tokio::test]
async fn block_is_committed_by_the_pipeline() {
    let engine = initialized(wait_for_processing());
    let mut events = engine.processing_queue().unwrap().subscribe();

    let result = engine.digest_message(1, &tick(1), None).await.unwrap();

    assert_eq!(engine.tree().head().unwrap().hash(), result.block_hash);
    assert_eq!(engine.result_at_message_index(1).unwrap(), result);
    assert_eq!(events.recv().await.unwrap(), ProcessingEvent::NewBestBlock(result.block_hash));
    assert_eq!(
        events.recv().await.unwrap(),
        ProcessingEvent::BlockRemoved { hash: result.block_hash, result: ProcessingResult::Success }
    );
}

#[tokio::test]
async fn consecutive_digests_wait_for_each_block() {
    let engine = initialized(wait_for_processing());

    let mut parent = engine.tree().head().unwrap().hash();
    for index in 1..=3 {
        let result = engine.digest_message(index, &tick(index), None).await.unwrap();
        let block = engine.tree().head().unwrap();
        assert_eq!(block.hash(), result.block_hash);
        assert_eq!(block.header.parent_hash, parent);
        parent = result.block_hash;
    }
    assert_eq!(engine.head_message_index().unwrap(), 3);
}

#[tokio::test]
async fn timed_out_block_still_lands_and_frees_the_build_slot() {
    let engine = initialized(EngineConfig {
        build_mode: BuildMode::WaitForProcessing { timeout: Duration::ZERO },
        ..Default::default()
    });
    let mut events = engine.processing_queue().unwrap().subscribe();

    let err = engine.digest_message(1, &tick(1), None).await.unwrap_err();
    assert!(matches!(err, EngineError::ProcessingTimeout));
    assert_eq!(err.code(), ErrorKind::Timeout);
    assert!(!engine.shutdown_token().is_cancelled());

    let landed = loop {
        match events.recv().await.unwrap() {
            ProcessingEvent::BlockRemoved { hash, result } => {
                assert_eq!(result, ProcessingResult::Success);
                break hash;
            }
            ProcessingEvent::NewBestBlock(_) => {}
        }
    };
    assert_eq!(engine.result_at_message_index(1).unwrap().block_hash, landed);

    // the next message builds on the landed block instead of finding the slot taken
    let err = engine.digest_message(2, &tick(2), None).await.unwrap_err();
    assert!(matches!(err, EngineError::ProcessingTimeout));
}

#[tokio::test]
async fn main_state_mode_has_no_pipeline() {
    assert!(engine(EngineConfig::default()).processing_queue().is_none());
}
