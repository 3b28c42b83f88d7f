//! Fixtures shared by the unit tests and by downstream crates through the `test-utils` feature.

use crate::{
    arbos_state::ArbosState,
    evm::{BlockEnv, CallOutcome, CallRequest, ChainRules, Evm},
    l2_pricing::{GETH_BLOCK_GAS_LIMIT, INITIAL_BASE_FEE_WEI},
    retryables::RETRYABLE_LIFETIME_SECONDS,
    state::{InMemoryWorldState, WorldState, WorldStateExt},
    ArbosError,
};
use alloy_primitives::{address, Address, Bytes, Log, B256, U256};
use arb_chain_primitives::{
    addresses::{retryable_escrow_address, BATCH_POSTER_ADDRESS},
    ArbitrumChainParams, ChainConfig, InboundMessage, L1IncomingMessageHeader, MessageKind,
};
use std::collections::VecDeque;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub const TEST_CHAIN_ID: u64 = 412346;
pub const TEST_ARBOS_VERSION: u64 = 32;
pub const GENESIS_TIMESTAMP: u64 = 1_700_000_000;
pub const CHAIN_OWNER: Address = address!("0x5E1497dD1f08C87b2d8FE23e9AAB6c1De833D927");
pub const L1_SENDER: Address = address!("0x00000000000000000000000000000000000011a1");
/// 30 gwei.
pub const INITIAL_L1_BASE_FEE: u64 = 30_000_000_000;

/// Installs a test-writer subscriber filtered by `RUST_LOG`. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_test_writer()
                .with_target(true)
                .with_level(true)
                .with_filter(EnvFilter::from_default_env()),
        )
        .try_init();
}

pub fn chain_config() -> ChainConfig {
    chain_config_with_version(TEST_ARBOS_VERSION)
}

pub fn chain_config_with_version(version: u64) -> ChainConfig {
    ChainConfig {
        chain_id: TEST_CHAIN_ID,
        arbitrum: ArbitrumChainParams {
            enable_arbos: true,
            initial_arbos_version: version,
            initial_chain_owner: CHAIN_OWNER,
            genesis_block_num: 0,
        },
    }
}

pub fn serialized_chain_config() -> Vec<u8> {
    chain_config().to_json().expect("chain config serializes")
}

/// A freshly initialized ArbOS at [`TEST_ARBOS_VERSION`].
pub fn genesis_state() -> (InMemoryWorldState, ArbosState) {
    genesis_state_at(TEST_ARBOS_VERSION)
}

pub fn genesis_state_at(version: u64) -> (InMemoryWorldState, ArbosState) {
    let config = chain_config_with_version(version);
    let mut state = InMemoryWorldState::default();
    let serialized = config.to_json().expect("chain config serializes");
    let arbos = ArbosState::initialize(
        &mut state,
        &config,
        &serialized,
        U256::from(INITIAL_L1_BASE_FEE),
    )
    .expect("genesis initializes");
    (state, arbos)
}

/// Environment of block `number`, one second after its predecessor.
pub fn block_env(number: u64) -> BlockEnv {
    BlockEnv {
        number,
        timestamp: GENESIS_TIMESTAMP + number,
        coinbase: BATCH_POSTER_ADDRESS,
        base_fee: U256::from(INITIAL_BASE_FEE_WEI),
        gas_limit: GETH_BLOCK_GAS_LIMIT,
        chain_id: TEST_CHAIN_ID,
        parent_hash: B256::with_last_byte(number as u8),
        rules: ChainRules::default(),
    }
}

/// Creates a funded ticket calling `beneficiary` with 1000 wei that expires one lifetime after
/// `now`.
pub fn create_ticket(
    state: &mut InMemoryWorldState,
    arbos: &ArbosState,
    now: u64,
    beneficiary: Address,
) -> B256 {
    let id = B256::with_last_byte(0x7e);
    let value = U256::from(1_000);
    arbos.retryables().create_retryable(
        state,
        id,
        now + RETRYABLE_LIFETIME_SECONDS,
        L1_SENDER,
        Some(beneficiary),
        value,
        beneficiary,
        &[0xca, 0xfe],
    );
    state.add_balance(retryable_escrow_address(id), value);
    id
}

/// One scripted interpreter response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptedCall {
    pub success: bool,
    /// Gas consumed out of the gas handed to the call.
    pub gas_used: u64,
    pub gas_refund: u64,
    pub output: Bytes,
    pub logs: Vec<Log>,
}

impl ScriptedCall {
    pub fn success(gas_used: u64) -> Self {
        Self { success: true, gas_used, gas_refund: 0, output: Bytes::new(), logs: Vec::new() }
    }

    pub fn revert(gas_used: u64) -> Self {
        Self { success: false, ..Self::success(gas_used) }
    }

    pub fn with_refund(mut self, gas_refund: u64) -> Self {
        self.gas_refund = gas_refund;
        self
    }

    pub fn with_log(mut self, log: Log) -> Self {
        self.logs.push(log);
        self
    }
}

/// An [`Evm`] that plays back queued responses and records every request it sees.
///
/// Successful calls move the call value. Once the script runs dry every call succeeds without
/// using gas.
#[derive(Debug, Clone, Default)]
pub struct ScriptedEvm {
    pub requests: Vec<CallRequest>,
    script: VecDeque<ScriptedCall>,
}

impl ScriptedEvm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, call: ScriptedCall) -> &mut Self {
        self.script.push_back(call);
        self
    }

    pub fn with(mut self, call: ScriptedCall) -> Self {
        self.push(call);
        self
    }
}

impl Evm for ScriptedEvm {
    fn call(
        &mut self,
        state: &mut dyn WorldState,
        _env: &BlockEnv,
        request: &CallRequest,
    ) -> Result<CallOutcome, ArbosError> {
        self.requests.push(request.clone());
        let step = self.script.pop_front().unwrap_or_else(|| ScriptedCall::success(0));
        let gas_left = request.gas_limit.saturating_sub(step.gas_used);

        let created_address =
            request.to.is_none().then(|| request.caller.create(state.nonce(request.caller)));
        let target = request.to.or(created_address).unwrap_or_default();
        let success = step.success && state.transfer(request.caller, target, request.value).is_ok();

        Ok(CallOutcome {
            success,
            gas_left,
            gas_refund: step.gas_refund,
            code_insertion_refund: 0,
            output: step.output,
            logs: if success { step.logs } else { Vec::new() },
            created_address: created_address.filter(|_| success),
        })
    }
}

pub fn message(kind: MessageKind, sender: Address, payload: impl Into<Bytes>) -> InboundMessage {
    InboundMessage {
        header: L1IncomingMessageHeader {
            kind,
            sender,
            block_number: 100,
            timestamp: GENESIS_TIMESTAMP,
            request_id: None,
            l1_base_fee: U256::from(INITIAL_L1_BASE_FEE),
        },
        payload: payload.into(),
        batch_gas_cost: None,
        delayed_messages_read: 0,
    }
}

/// An `EthDeposit` crediting `value` to `to`.
pub fn eth_deposit(request: u8, to: Address, value: U256) -> InboundMessage {
    let mut payload = to.to_vec();
    payload.extend_from_slice(&value.to_be_bytes::<32>());
    let mut message = message(MessageKind::EthDeposit, L1_SENDER, payload);
    message.header.request_id = Some(B256::with_last_byte(request));
    message
}

/// An `L2Message` carrying one unsigned user transaction from `from`.
pub fn unsigned_tx(
    from: Address,
    nonce: u64,
    to: Address,
    value: U256,
    gas: u64,
) -> InboundMessage {
    let mut payload = vec![0u8];
    payload.extend_from_slice(&U256::from(gas).to_be_bytes::<32>());
    payload.extend_from_slice(&U256::from(INITIAL_BASE_FEE_WEI).to_be_bytes::<32>());
    payload.extend_from_slice(&U256::from(nonce).to_be_bytes::<32>());
    payload.extend_from_slice(to.into_word().as_slice());
    payload.extend_from_slice(&value.to_be_bytes::<32>());
    message(MessageKind::L2Message, from, payload)
}

/// An `L2Message` heartbeat, which yields a block with only the start-block transaction.
pub fn heartbeat(timestamp: u64) -> InboundMessage {
    let mut message = message(MessageKind::L2Message, L1_SENDER, vec![6u8]);
    message.header.timestamp = timestamp;
    message
}
