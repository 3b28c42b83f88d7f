use alloy_primitives::U256;
use arb_chain_arbos::test_utils::{
    heartbeat, init_tracing, serialized_chain_config, ScriptedEvm, GENESIS_TIMESTAMP,
    INITIAL_L1_BASE_FEE,
};
use arb_chain_engine::{EngineConfig, ExecutionEngine};
use arb_chain_primitives::{InboundMessage, MessageResult};
use tokio_util::sync::CancellationToken;

pub type TestEngine = ExecutionEngine<fn() -> ScriptedEvm>;

pub fn engine(config: EngineConfig) -> TestEngine {
    init_tracing();
    ExecutionEngine::new(config, ScriptedEvm::new as fn() -> ScriptedEvm, CancellationToken::new())
        .unwrap()
}

/// An engine on a freshly initialized genesis block.
pub fn initialized(config: EngineConfig) -> TestEngine {
    let engine = engine(config);
    engine
        .digest_init_message(U256::from(INITIAL_L1_BASE_FEE), &serialized_chain_config())
        .unwrap();
    engine
}

pub fn tick(index: u64) -> InboundMessage {
    heartbeat(GENESIS_TIMESTAMP + index * 2)
}

/// Digests heartbeats for `indices` in order.
pub async fn digest_ticks(
    engine: &TestEngine,
    indices: impl IntoIterator<Item = u64>,
) -> Vec<MessageResult> {
    let mut results = Vec::new();
    for index in indices {
        results.push(engine.digest_message(index, &tick(index), None).await.unwrap());
    }
    results
}
