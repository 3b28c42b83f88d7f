//! The ArbRetryableTx precompile, dispatched natively by method selector.

use crate::{
    arbos_state::ArbosState,
    burn::{Burner, GasMeter},
    evm::{BlockEnv, CallRequest},
    l2_pricing::saturating_i64,
    processor::{gas::TX_GAS, TxContext},
    retryables::RETRYABLE_LIFETIME_SECONDS,
    state::WorldState,
    ArbosError,
};
use alloy_primitives::{Address, Bytes, Log, B256, U256};
use alloy_sol_types::{Revert, SolCall, SolError, SolEvent, SolValue};
use arb_chain_primitives::{
    abi::ArbRetryableTx::{
        cancelCall, getBeneficiaryCall, getCurrentRedeemerCall, getLifetimeCall, getTimeoutCall,
        keepaliveCall, redeemCall, Canceled, LifetimeExtended, NoTicketWithID, RedeemScheduled,
    },
    addresses::ARB_RETRYABLE_TX_ADDRESS,
    RetryTx,
};

const STORAGE_READ_COST: u64 = 800;
const STORAGE_WRITE_COST: u64 = 20_000;
const SSTORE_SET_GAS: u64 = 20_000;
const COPY_GAS: u64 = 3;
const LOG_GAS: u64 = 375;
const LOG_TOPIC_GAS: u64 = 375;
const LOG_DATA_GAS: u64 = 8;

/// Cost of emitting `RedeemScheduled`: four topics and four data words.
const REDEEM_SCHEDULED_EVENT_GAS: u64 = LOG_GAS + 4 * LOG_TOPIC_GAS + 4 * 32 * LOG_DATA_GAS;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PrecompileError {
    #[error("no ticket with id {0}")]
    NoTicketWithId(B256),
    #[error("retryable cannot modify itself")]
    SelfModifyingRetryable,
    #[error("only the beneficiary may cancel a retryable")]
    NotBeneficiary,
    #[error("not enough gas to run redeem attempt")]
    NotEnoughGasForRedeem,
    #[error("method does not accept value")]
    NotPayable,
    #[error("unknown method selector {0:?}")]
    UnknownSelector(Bytes),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Arbos(#[from] ArbosError),
}

impl PrecompileError {
    /// Return data of the reverted call.
    pub fn revert_data(&self) -> Bytes {
        match self {
            Self::NoTicketWithId(_) | Self::Arbos(ArbosError::RetryableNotFound(_)) => {
                NoTicketWithID {}.abi_encode().into()
            }
            Self::Arbos(ArbosError::OutOfGas) => Bytes::new(),
            _ => Revert { reason: self.to_string() }.abi_encode().into(),
        }
    }

    pub fn consumes_all_gas(&self) -> bool {
        matches!(self, Self::Arbos(ArbosError::OutOfGas) | Self::UnknownSelector(_))
    }
}

/// Everything a precompile method can see and touch.
pub struct PrecompileContext<'a> {
    pub state: &'a mut dyn WorldState,
    pub arbos: &'a ArbosState,
    pub env: &'a BlockEnv,
    pub tx: &'a TxContext,
    pub caller: Address,
    pub gas: GasMeter,
    pub logs: Vec<Log>,
    pub scheduled: Vec<RetryTx>,
}

impl<'a> PrecompileContext<'a> {
    pub fn new(
        state: &'a mut dyn WorldState,
        arbos: &'a ArbosState,
        env: &'a BlockEnv,
        tx: &'a TxContext,
        caller: Address,
        gas_limit: u64,
    ) -> Self {
        Self {
            state,
            arbos,
            env,
            tx,
            caller,
            gas: GasMeter::new(gas_limit),
            logs: Vec::new(),
            scheduled: Vec::new(),
        }
    }

    fn emit(&mut self, event: &impl SolEvent) {
        self.logs.push(Log { address: ARB_RETRYABLE_TX_ADDRESS, data: event.encode_log_data() });
    }

    fn ensure_not_current(&self, ticket_id: B256) -> Result<(), PrecompileError> {
        if self.tx.current_retryable == Some(ticket_id) {
            return Err(PrecompileError::SelfModifyingRetryable);
        }
        Ok(())
    }
}

type Method = fn(&mut PrecompileContext<'_>, &[u8]) -> Result<Bytes, PrecompileError>;

static ARB_RETRYABLE_TX_METHODS: [([u8; 4], Method); 7] = [
    (redeemCall::SELECTOR, redeem),
    (getLifetimeCall::SELECTOR, get_lifetime),
    (getTimeoutCall::SELECTOR, get_timeout),
    (keepaliveCall::SELECTOR, keepalive),
    (getBeneficiaryCall::SELECTOR, get_beneficiary),
    (cancelCall::SELECTOR, cancel),
    (getCurrentRedeemerCall::SELECTOR, get_current_redeemer),
];

/// Runs a call to ArbRetryableTx. State changes of a failed call must be reverted by the caller.
pub fn run_arb_retryable_tx(
    ctx: &mut PrecompileContext<'_>,
    request: &CallRequest,
) -> Result<Bytes, PrecompileError> {
    if !request.value.is_zero() {
        return Err(PrecompileError::NotPayable);
    }
    let input = request.input.as_ref();
    let method = input.get(..4).and_then(|selector| {
        ARB_RETRYABLE_TX_METHODS
            .iter()
            .find(|(known, _)| known.as_slice() == selector)
            .map(|(_, method)| *method)
    });
    let Some(method) = method else {
        return Err(PrecompileError::UnknownSelector(request.input.clone()));
    };
    ctx.gas.burn(COPY_GAS * (input.len() as u64).div_ceil(32))?;
    method(ctx, input)
}

fn decode<C: SolCall>(input: &[u8]) -> Result<C, PrecompileError> {
    C::abi_decode(input).map_err(|err| PrecompileError::InvalidInput(err.to_string()))
}

fn redeem(ctx: &mut PrecompileContext<'_>, input: &[u8]) -> Result<Bytes, PrecompileError> {
    let ticket_id = decode::<redeemCall>(input)?.ticketId;
    ctx.ensure_not_current(ticket_id)?;

    let now = ctx.env.timestamp;
    let retryables = ctx.arbos.retryables();
    let size = retryables.retryable_size_bytes(&*ctx.state, ticket_id, now);
    ctx.gas.burn(STORAGE_READ_COST * size.div_ceil(32))?;
    let retryable = retryables
        .open_retryable(&*ctx.state, ticket_id, now)
        .ok_or(PrecompileError::NoTicketWithId(ticket_id))?;
    let sequence_num = retryable.increment_num_tries(&mut *ctx.state);

    let future_gas_costs =
        REDEEM_SCHEDULED_EVENT_GAS + COPY_GAS + STORAGE_READ_COST + STORAGE_WRITE_COST;
    if ctx.gas.gas_left() < future_gas_costs {
        ctx.gas.burn(future_gas_costs)?;
    }
    let donated_gas = ctx.gas.gas_left() - future_gas_costs;
    if donated_gas < TX_GAS {
        return Err(PrecompileError::NotEnoughGasForRedeem);
    }

    let retry = retryable.make_tx(
        &*ctx.state,
        ctx.env.chain_id,
        sequence_num,
        ctx.env.base_fee,
        donated_gas,
        ctx.caller,
        U256::MAX,
        U256::ZERO,
    );
    let retry_tx_hash = retry.hash();
    ctx.emit(&RedeemScheduled {
        ticketId: ticket_id,
        retryTxHash: retry_tx_hash,
        sequenceNum: sequence_num,
        donatedGas: donated_gas,
        gasDonor: ctx.caller,
        maxRefund: U256::MAX,
        submissionFeeRefund: U256::ZERO,
    });

    // the donated gas is burnt here and returned to the pool for the retry to consume
    ctx.gas.burn(donated_gas)?;
    ctx.arbos.l2_pricing().add_to_gas_pool(&mut *ctx.state, saturating_i64(donated_gas));
    ctx.scheduled.push(retry);
    Ok(retry_tx_hash.abi_encode().into())
}

fn get_lifetime(ctx: &mut PrecompileContext<'_>, input: &[u8]) -> Result<Bytes, PrecompileError> {
    decode::<getLifetimeCall>(input)?;
    ctx.gas.burn(STORAGE_READ_COST)?;
    Ok(U256::from(RETRYABLE_LIFETIME_SECONDS).abi_encode().into())
}

fn get_timeout(ctx: &mut PrecompileContext<'_>, input: &[u8]) -> Result<Bytes, PrecompileError> {
    let ticket_id = decode::<getTimeoutCall>(input)?.ticketId;
    ctx.gas.burn(STORAGE_READ_COST)?;
    let retryable = ctx
        .arbos
        .retryables()
        .open_retryable(&*ctx.state, ticket_id, ctx.env.timestamp)
        .ok_or(PrecompileError::NoTicketWithId(ticket_id))?;
    Ok(U256::from(retryable.calculate_timeout(&*ctx.state)).abi_encode().into())
}

fn keepalive(ctx: &mut PrecompileContext<'_>, input: &[u8]) -> Result<Bytes, PrecompileError> {
    let ticket_id = decode::<keepaliveCall>(input)?.ticketId;
    let now = ctx.env.timestamp;
    let retryables = ctx.arbos.retryables();
    let size = retryables.retryable_size_bytes(&*ctx.state, ticket_id, now);
    if size == 0 {
        return Err(PrecompileError::NoTicketWithId(ticket_id));
    }
    ctx.gas.burn(size.div_ceil(32) * SSTORE_SET_GAS / 100)?;

    let limit = now.saturating_add(RETRYABLE_LIFETIME_SECONDS);
    let new_timeout = retryables.keep_alive(&mut *ctx.state, ticket_id, now, limit, &mut ctx.gas)?;
    ctx.emit(&LifetimeExtended { ticketId: ticket_id, newTimeout: U256::from(new_timeout) });
    Ok(U256::from(new_timeout).abi_encode().into())
}

fn get_beneficiary(
    ctx: &mut PrecompileContext<'_>,
    input: &[u8],
) -> Result<Bytes, PrecompileError> {
    let ticket_id = decode::<getBeneficiaryCall>(input)?.ticketId;
    ctx.gas.burn(STORAGE_READ_COST)?;
    let retryable = ctx
        .arbos
        .retryables()
        .open_retryable(&*ctx.state, ticket_id, ctx.env.timestamp)
        .ok_or(PrecompileError::NoTicketWithId(ticket_id))?;
    Ok(retryable.beneficiary(&*ctx.state).abi_encode().into())
}

fn cancel(ctx: &mut PrecompileContext<'_>, input: &[u8]) -> Result<Bytes, PrecompileError> {
    let ticket_id = decode::<cancelCall>(input)?.ticketId;
    ctx.ensure_not_current(ticket_id)?;
    ctx.gas.burn(STORAGE_READ_COST)?;

    let retryables = ctx.arbos.retryables();
    let retryable = retryables
        .open_retryable(&*ctx.state, ticket_id, ctx.env.timestamp)
        .ok_or(PrecompileError::NoTicketWithId(ticket_id))?;
    if retryable.beneficiary(&*ctx.state) != ctx.caller {
        return Err(PrecompileError::NotBeneficiary);
    }
    retryables.delete_retryable(&mut *ctx.state, ticket_id)?;
    ctx.emit(&Canceled { ticketId: ticket_id });
    Ok(Bytes::new())
}

fn get_current_redeemer(
    ctx: &mut PrecompileContext<'_>,
    input: &[u8],
) -> Result<Bytes, PrecompileError> {
    decode::<getCurrentRedeemerCall>(input)?;
    let redeemer = ctx.tx.current_refund_to.unwrap_or_default();
    Ok(redeemer.abi_encode().into())
}
