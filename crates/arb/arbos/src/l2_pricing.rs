//! L2 congestion pricing: a gas backlog drained at the speed limit drives an exponential base fee.

use crate::{state::WorldState, storage::ArbosStorage};
use alloy_primitives::U256;
use tracing::trace;

const SPEED_LIMIT_PER_SECOND_OFFSET: u64 = 0;
const PER_BLOCK_GAS_LIMIT_OFFSET: u64 = 1;
const BASE_FEE_WEI_OFFSET: u64 = 2;
const MIN_BASE_FEE_WEI_OFFSET: u64 = 3;
const GAS_BACKLOG_OFFSET: u64 = 4;
const PRICING_INERTIA_OFFSET: u64 = 5;
const BACKLOG_TOLERANCE_OFFSET: u64 = 6;

pub const INITIAL_SPEED_LIMIT_PER_SECOND_V0: u64 = 1_000_000;
pub const INITIAL_PER_BLOCK_GAS_LIMIT_V0: u64 = 20_000_000;
pub const INITIAL_SPEED_LIMIT_PER_SECOND_V6: u64 = 7_000_000;
pub const INITIAL_PER_BLOCK_GAS_LIMIT_V6: u64 = 32_000_000;
pub const INITIAL_MINIMUM_BASE_FEE_WEI: u64 = 100_000_000;
pub const INITIAL_BASE_FEE_WEI: u64 = INITIAL_MINIMUM_BASE_FEE_WEI;
pub const INITIAL_PRICING_INERTIA: u64 = 102;
pub const INITIAL_BACKLOG_TOLERANCE: u64 = 10;

/// Gas limit advertised in block headers. The real per-block budget is the pricing state's.
pub const GETH_BLOCK_GAS_LIMIT: u64 = 1 << 50;

const BIPS: u64 = 10_000;

#[derive(Debug, Clone)]
pub struct L2PricingState {
    storage: ArbosStorage,
}

impl L2PricingState {
    pub fn initialize<S: WorldState + ?Sized>(storage: &ArbosStorage, state: &mut S) {
        storage.set_u64(state, SPEED_LIMIT_PER_SECOND_OFFSET, INITIAL_SPEED_LIMIT_PER_SECOND_V0);
        storage.set_u64(state, PER_BLOCK_GAS_LIMIT_OFFSET, INITIAL_PER_BLOCK_GAS_LIMIT_V0);
        storage.set_u256(state, BASE_FEE_WEI_OFFSET, U256::from(INITIAL_BASE_FEE_WEI));
        storage.set_u256(state, MIN_BASE_FEE_WEI_OFFSET, U256::from(INITIAL_MINIMUM_BASE_FEE_WEI));
        storage.set_u64(state, GAS_BACKLOG_OFFSET, 0);
        storage.set_u64(state, PRICING_INERTIA_OFFSET, INITIAL_PRICING_INERTIA);
        storage.set_u64(state, BACKLOG_TOLERANCE_OFFSET, INITIAL_BACKLOG_TOLERANCE);
    }

    pub fn open(storage: ArbosStorage) -> Self {
        Self { storage }
    }

    pub fn speed_limit_per_second<S: WorldState + ?Sized>(&self, state: &S) -> u64 {
        self.storage.get_u64(state, SPEED_LIMIT_PER_SECOND_OFFSET)
    }

    pub fn set_speed_limit_per_second<S: WorldState + ?Sized>(&self, state: &mut S, limit: u64) {
        self.storage.set_u64(state, SPEED_LIMIT_PER_SECOND_OFFSET, limit);
    }

    pub fn per_block_gas_limit<S: WorldState + ?Sized>(&self, state: &S) -> u64 {
        self.storage.get_u64(state, PER_BLOCK_GAS_LIMIT_OFFSET)
    }

    pub fn set_per_block_gas_limit<S: WorldState + ?Sized>(&self, state: &mut S, limit: u64) {
        self.storage.set_u64(state, PER_BLOCK_GAS_LIMIT_OFFSET, limit);
    }

    pub fn base_fee_wei<S: WorldState + ?Sized>(&self, state: &S) -> U256 {
        self.storage.get_u256(state, BASE_FEE_WEI_OFFSET)
    }

    pub fn set_base_fee_wei<S: WorldState + ?Sized>(&self, state: &mut S, fee: U256) {
        self.storage.set_u256(state, BASE_FEE_WEI_OFFSET, fee);
    }

    pub fn min_base_fee_wei<S: WorldState + ?Sized>(&self, state: &S) -> U256 {
        self.storage.get_u256(state, MIN_BASE_FEE_WEI_OFFSET)
    }

    pub fn set_min_base_fee_wei<S: WorldState + ?Sized>(&self, state: &mut S, fee: U256) {
        self.storage.set_u256(state, MIN_BASE_FEE_WEI_OFFSET, fee);
    }

    pub fn gas_backlog<S: WorldState + ?Sized>(&self, state: &S) -> u64 {
        self.storage.get_u64(state, GAS_BACKLOG_OFFSET)
    }

    pub fn set_gas_backlog<S: WorldState + ?Sized>(&self, state: &mut S, backlog: u64) {
        self.storage.set_u64(state, GAS_BACKLOG_OFFSET, backlog);
    }

    pub fn pricing_inertia<S: WorldState + ?Sized>(&self, state: &S) -> u64 {
        self.storage.get_u64(state, PRICING_INERTIA_OFFSET)
    }

    pub fn set_pricing_inertia<S: WorldState + ?Sized>(&self, state: &mut S, inertia: u64) {
        self.storage.set_u64(state, PRICING_INERTIA_OFFSET, inertia);
    }

    pub fn backlog_tolerance<S: WorldState + ?Sized>(&self, state: &S) -> u64 {
        self.storage.get_u64(state, BACKLOG_TOLERANCE_OFFSET)
    }

    pub fn set_backlog_tolerance<S: WorldState + ?Sized>(&self, state: &mut S, tolerance: u64) {
        self.storage.set_u64(state, BACKLOG_TOLERANCE_OFFSET, tolerance);
    }

    /// Returns gas to the pool (positive) or draws from it (negative). Drawing grows the backlog.
    pub fn add_to_gas_pool<S: WorldState + ?Sized>(&self, state: &mut S, gas: i64) {
        let backlog = self.gas_backlog(state);
        let backlog = if gas > 0 {
            backlog.saturating_sub(gas.unsigned_abs())
        } else {
            backlog.saturating_add(gas.unsigned_abs())
        };
        self.set_gas_backlog(state, backlog);
    }

    /// Drains the backlog for `time_passed` seconds and recomputes the base fee.
    pub fn update_pricing_model<S: WorldState + ?Sized>(&self, state: &mut S, time_passed: u64) {
        let speed_limit = self.speed_limit_per_second(state);
        self.add_to_gas_pool(state, saturating_i64(time_passed.saturating_mul(speed_limit)));

        let inertia = self.pricing_inertia(state);
        let tolerance = self.backlog_tolerance(state);
        let backlog = self.gas_backlog(state);
        let min_base_fee = self.min_base_fee_wei(state);

        let mut base_fee = min_base_fee;
        let tolerated = tolerance.saturating_mul(speed_limit);
        let divisor = saturating_i64(inertia.saturating_mul(speed_limit));
        if backlog > tolerated && divisor > 0 {
            let excess = saturating_i64(backlog - tolerated);
            let exponent_bips = excess.saturating_mul(BIPS as i64) / divisor;
            base_fee = min_base_fee
                .saturating_mul(U256::from(approx_exp_basis_points(exponent_bips, 4)))
                / U256::from(BIPS);
        }
        trace!(target: "arb::pricing", time_passed, backlog, %base_fee, "updated L2 pricing model");
        self.set_base_fee_wei(state, base_fee);
    }
}

/// Approximates `e^(bips / 10000)` in basis points with a Taylor series of `accuracy` terms.
pub fn approx_exp_basis_points(bips: i64, accuracy: u64) -> u64 {
    let one = BIPS as u128;
    if accuracy == 0 {
        return BIPS;
    }
    let x = bips.unsigned_abs() as u128;
    let accuracy = accuracy as u128;

    let mut res = one + x / accuracy;
    for i in (1..accuracy).rev() {
        res = one + res.saturating_mul(x) / (i * one);
    }

    if bips < 0 {
        (one * one / res) as u64
    } else {
        u64::try_from(res).unwrap_or(u64::MAX)
    }
}

pub(crate) fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
