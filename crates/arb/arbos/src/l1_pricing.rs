//! L1 calldata pricing.
//!
//! Transactions are charged `price_per_unit` for every calldata unit they would occupy in a batch.
//! Batch posting reports tell ArbOS what posting actually cost; the price then moves to drive the
//! surplus of collected fees over owed funds towards zero.

use crate::{
    batch_posters::BatchPostersTable,
    state::{WorldState, WorldStateExt},
    storage::ArbosStorage,
    ArbosError,
};
use alloy_primitives::{Address, I256, U256};
use arb_chain_primitives::addresses::{
    BATCH_POSTER_ADDRESS, BATCH_POSTER_PAY_TO_ADDRESS, L1_PRICER_FUNDS_POOL_ADDRESS,
};
use tracing::debug;

const PAY_REWARDS_TO_OFFSET: u64 = 0;
const EQUILIBRATION_UNITS_OFFSET: u64 = 1;
const INERTIA_OFFSET: u64 = 2;
const PER_UNIT_REWARD_OFFSET: u64 = 3;
const LAST_UPDATE_TIME_OFFSET: u64 = 4;
const FUNDS_DUE_FOR_REWARDS_OFFSET: u64 = 5;
const UNITS_SINCE_OFFSET: u64 = 6;
const PRICE_PER_UNIT_OFFSET: u64 = 7;
const LAST_SURPLUS_OFFSET: u64 = 8;
const PER_BATCH_GAS_COST_OFFSET: u64 = 9;
const AMORTIZED_COST_CAP_BIPS_OFFSET: u64 = 10;
const L1_FEES_AVAILABLE_OFFSET: u64 = 11;

const BATCH_POSTER_TABLE_KEY: &[u8] = &[0];

/// Calldata gas charged per non-zero byte.
pub const TX_DATA_NON_ZERO_GAS: u64 = 16;
pub const INITIAL_INERTIA: u64 = 10;
pub const INITIAL_PER_UNIT_REWARD: u64 = 10;
pub const INITIAL_EQUILIBRATION_UNITS_V0: u64 = 60 * TX_DATA_NON_ZERO_GAS * 100_000;
pub const INITIAL_EQUILIBRATION_UNITS_V6: u64 = TX_DATA_NON_ZERO_GAS * 10_000_000;
pub const INITIAL_PER_BATCH_GAS_COST_V6: u64 = 100_000;
pub const INITIAL_PER_BATCH_GAS_COST_V12: u64 = 210_000;

const BIPS: u64 = 10_000;

#[derive(Debug, Clone)]
pub struct L1PricingState {
    storage: ArbosStorage,
    batch_posters: BatchPostersTable,
}

impl L1PricingState {
    pub fn initialize<S: WorldState + ?Sized>(
        storage: &ArbosStorage,
        state: &mut S,
        rewards_recipient: Address,
        initial_l1_base_fee: U256,
    ) {
        let table_storage = storage.open_sub_storage(BATCH_POSTER_TABLE_KEY);
        BatchPostersTable::initialize(&table_storage, state);
        BatchPostersTable::open(table_storage).add_poster(
            state,
            BATCH_POSTER_ADDRESS,
            BATCH_POSTER_PAY_TO_ADDRESS,
        );

        storage.set_address(state, PAY_REWARDS_TO_OFFSET, rewards_recipient);
        let equilibration_units = U256::from(INITIAL_EQUILIBRATION_UNITS_V0);
        storage.set_u256(state, EQUILIBRATION_UNITS_OFFSET, equilibration_units);
        storage.set_u64(state, INERTIA_OFFSET, INITIAL_INERTIA);
        storage.set_u64(state, PER_UNIT_REWARD_OFFSET, INITIAL_PER_UNIT_REWARD);
        storage.set_u256(state, PRICE_PER_UNIT_OFFSET, initial_l1_base_fee);
    }

    pub fn open(storage: ArbosStorage) -> Self {
        let batch_posters =
            BatchPostersTable::open(storage.open_sub_storage(BATCH_POSTER_TABLE_KEY));
        Self { storage, batch_posters }
    }

    pub fn batch_posters(&self) -> &BatchPostersTable {
        &self.batch_posters
    }

    pub fn pay_rewards_to<S: WorldState + ?Sized>(&self, state: &S) -> Address {
        self.storage.get_address(state, PAY_REWARDS_TO_OFFSET)
    }

    pub fn set_pay_rewards_to<S: WorldState + ?Sized>(&self, state: &mut S, recipient: Address) {
        self.storage.set_address(state, PAY_REWARDS_TO_OFFSET, recipient);
    }

    pub fn equilibration_units<S: WorldState + ?Sized>(&self, state: &S) -> U256 {
        self.storage.get_u256(state, EQUILIBRATION_UNITS_OFFSET)
    }

    pub fn set_equilibration_units<S: WorldState + ?Sized>(&self, state: &mut S, units: U256) {
        self.storage.set_u256(state, EQUILIBRATION_UNITS_OFFSET, units);
    }

    pub fn inertia<S: WorldState + ?Sized>(&self, state: &S) -> u64 {
        self.storage.get_u64(state, INERTIA_OFFSET)
    }

    pub fn set_inertia<S: WorldState + ?Sized>(&self, state: &mut S, inertia: u64) {
        self.storage.set_u64(state, INERTIA_OFFSET, inertia);
    }

    pub fn per_unit_reward<S: WorldState + ?Sized>(&self, state: &S) -> u64 {
        self.storage.get_u64(state, PER_UNIT_REWARD_OFFSET)
    }

    pub fn set_per_unit_reward<S: WorldState + ?Sized>(&self, state: &mut S, reward: u64) {
        self.storage.set_u64(state, PER_UNIT_REWARD_OFFSET, reward);
    }

    pub fn last_update_time<S: WorldState + ?Sized>(&self, state: &S) -> u64 {
        self.storage.get_u64(state, LAST_UPDATE_TIME_OFFSET)
    }

    pub fn set_last_update_time<S: WorldState + ?Sized>(&self, state: &mut S, time: u64) {
        self.storage.set_u64(state, LAST_UPDATE_TIME_OFFSET, time);
    }

    pub fn funds_due_for_rewards<S: WorldState + ?Sized>(&self, state: &S) -> U256 {
        self.storage.get_u256(state, FUNDS_DUE_FOR_REWARDS_OFFSET)
    }

    pub fn set_funds_due_for_rewards<S: WorldState + ?Sized>(&self, state: &mut S, funds: U256) {
        self.storage.set_u256(state, FUNDS_DUE_FOR_REWARDS_OFFSET, funds);
    }

    pub fn units_since_update<S: WorldState + ?Sized>(&self, state: &S) -> u64 {
        self.storage.get_u64(state, UNITS_SINCE_OFFSET)
    }

    pub fn set_units_since_update<S: WorldState + ?Sized>(&self, state: &mut S, units: u64) {
        self.storage.set_u64(state, UNITS_SINCE_OFFSET, units);
    }

    pub fn add_to_units_since_update<S: WorldState + ?Sized>(&self, state: &mut S, units: u64) {
        let total = self.units_since_update(state).saturating_add(units);
        self.set_units_since_update(state, total);
    }

    pub fn price_per_unit<S: WorldState + ?Sized>(&self, state: &S) -> U256 {
        self.storage.get_u256(state, PRICE_PER_UNIT_OFFSET)
    }

    pub fn set_price_per_unit<S: WorldState + ?Sized>(&self, state: &mut S, price: U256) {
        self.storage.set_u256(state, PRICE_PER_UNIT_OFFSET, price);
    }

    pub fn last_surplus<S: WorldState + ?Sized>(&self, state: &S) -> I256 {
        self.storage.get_i256(state, LAST_SURPLUS_OFFSET)
    }

    pub fn set_last_surplus<S: WorldState + ?Sized>(&self, state: &mut S, surplus: I256) {
        self.storage.set_i256(state, LAST_SURPLUS_OFFSET, surplus);
    }

    pub fn per_batch_gas_cost<S: WorldState + ?Sized>(&self, state: &S) -> u64 {
        self.storage.get_u64(state, PER_BATCH_GAS_COST_OFFSET)
    }

    pub fn set_per_batch_gas_cost<S: WorldState + ?Sized>(&self, state: &mut S, cost: u64) {
        self.storage.set_u64(state, PER_BATCH_GAS_COST_OFFSET, cost);
    }

    pub fn amortized_cost_cap_bips<S: WorldState + ?Sized>(&self, state: &S) -> u64 {
        self.storage.get_u64(state, AMORTIZED_COST_CAP_BIPS_OFFSET)
    }

    pub fn set_amortized_cost_cap_bips<S: WorldState + ?Sized>(&self, state: &mut S, bips: u64) {
        self.storage.set_u64(state, AMORTIZED_COST_CAP_BIPS_OFFSET, bips);
    }

    pub fn l1_fees_available<S: WorldState + ?Sized>(&self, state: &S) -> U256 {
        self.storage.get_u256(state, L1_FEES_AVAILABLE_OFFSET)
    }

    pub fn set_l1_fees_available<S: WorldState + ?Sized>(&self, state: &mut S, fees: U256) {
        self.storage.set_u256(state, L1_FEES_AVAILABLE_OFFSET, fees);
    }

    pub fn add_to_l1_fees_available<S: WorldState + ?Sized>(&self, state: &mut S, fees: U256) {
        let total = self.l1_fees_available(state).saturating_add(fees);
        self.set_l1_fees_available(state, total);
    }

    /// Calldata units a transaction of `tx_len` encoded bytes occupies in a batch.
    ///
    /// Only transactions sequenced by the batch poster pay for calldata.
    pub fn poster_units(tx_len: usize, poster: Address) -> u64 {
        if poster != BATCH_POSTER_ADDRESS {
            return 0;
        }
        TX_DATA_NON_ZERO_GAS.saturating_mul(tx_len as u64)
    }

    /// Returns the poster cost in wei and the calldata units it covers.
    pub fn poster_data_cost<S: WorldState + ?Sized>(
        &self,
        state: &S,
        tx_len: usize,
        poster: Address,
    ) -> (U256, u64) {
        let units = Self::poster_units(tx_len, poster);
        (self.price_per_unit(state).saturating_mul(U256::from(units)), units)
    }

    fn available_funds<S: WorldState + ?Sized>(&self, state: &S, arbos_version: u64) -> U256 {
        if arbos_version >= 10 {
            self.l1_fees_available(state)
        } else {
            state.balance(L1_PRICER_FUNDS_POOL_ADDRESS)
        }
    }

    /// Settles a batch posting report and moves the unit price.
    ///
    /// The units sold since the last update are allocated to this batch in proportion to the
    /// time elapsed up to `update_time`. The poster and the rewards recipient are paid from the
    /// fees collected so far, and the price adjusts by the derivative of the surplus.
    #[allow(clippy::too_many_arguments)]
    pub fn update_for_batch_poster_spending<S: WorldState + ?Sized>(
        &self,
        state: &mut S,
        arbos_version: u64,
        update_time: u64,
        current_time: u64,
        batch_poster: Address,
        wei_spent: U256,
        l1_base_fee: U256,
    ) -> Result<(), ArbosError> {
        let poster = self.batch_posters.open_poster(state, batch_poster, true)?;

        let mut last_update_time = self.last_update_time(state);
        if last_update_time == 0 && update_time > 0 {
            last_update_time = update_time - 1;
        }
        if update_time > current_time || update_time < last_update_time {
            return Err(ArbosError::InvalidUpdateTime {
                update_time,
                last_update: last_update_time,
                now: current_time,
            });
        }

        let (mut alloc_numerator, mut alloc_denominator) =
            (update_time - last_update_time, current_time - last_update_time);
        if alloc_denominator == 0 {
            alloc_numerator = 1;
            alloc_denominator = 1;
        }

        let units_since = self.units_since_update(state);
        let units_allocated = (units_since as u128 * alloc_numerator as u128
            / alloc_denominator as u128) as u64;
        self.set_units_since_update(state, units_since - units_allocated);

        let mut wei_spent = wei_spent;
        if arbos_version >= 3 {
            let cap_bips = self.amortized_cost_cap_bips(state);
            if cap_bips != 0 {
                let cap = l1_base_fee
                    .saturating_mul(U256::from(units_allocated))
                    .saturating_mul(U256::from(cap_bips))
                    / U256::from(BIPS);
                wei_spent = wei_spent.min(cap);
            }
        }

        let due = poster.funds_due(state).saturating_add(wei_spent);
        poster.set_funds_due(state, due);

        let per_unit_reward = U256::from(self.per_unit_reward(state));
        let mut payment_for_rewards = per_unit_reward.saturating_mul(U256::from(units_allocated));
        let funds_due_for_rewards =
            self.funds_due_for_rewards(state).saturating_add(payment_for_rewards);

        let mut available = self.available_funds(state, arbos_version);
        payment_for_rewards = payment_for_rewards.min(available);
        let remaining = funds_due_for_rewards.saturating_sub(payment_for_rewards);
        self.set_funds_due_for_rewards(state, remaining);
        let rewards_recipient = self.pay_rewards_to(state);
        state.transfer(L1_PRICER_FUNDS_POOL_ADDRESS, rewards_recipient, payment_for_rewards)?;
        available = available.saturating_sub(payment_for_rewards);
        if arbos_version >= 10 {
            self.set_l1_fees_available(state, available);
        }

        let payout = poster.funds_due(state).min(available);
        if !payout.is_zero() {
            let pay_to = poster.pay_to(state);
            state.transfer(L1_PRICER_FUNDS_POOL_ADDRESS, pay_to, payout)?;
            available = available.saturating_sub(payout);
            if arbos_version >= 10 {
                self.set_l1_fees_available(state, available);
            }
            let remaining = poster.funds_due(state).saturating_sub(payout);
            poster.set_funds_due(state, remaining);
        }

        self.set_last_update_time(state, update_time);

        if units_allocated > 0 {
            let funds = self.available_funds(state, arbos_version);
            let owed = self
                .batch_posters
                .total_funds_due(state)
                .saturating_add(self.funds_due_for_rewards(state));
            let surplus = signed(funds).saturating_sub(signed(owed));

            let inertia = self.inertia(state).max(1);
            let equilibration_units = self.equilibration_units(state).max(U256::from(1));
            let inertia_units = equilibration_units / U256::from(inertia);
            let alloc_plus_inert =
                signed(inertia_units.saturating_add(U256::from(units_allocated)));
            let units = signed(U256::from(units_allocated));

            let last_surplus = self.last_surplus(state);
            let desired_derivative = surplus
                .saturating_neg()
                .checked_div(signed(equilibration_units))
                .unwrap_or_default();
            let actual_derivative =
                surplus.saturating_sub(last_surplus).checked_div(units).unwrap_or_default();
            let change_derivative = desired_derivative.saturating_sub(actual_derivative);
            let price_change = change_derivative
                .saturating_mul(units)
                .checked_div(alloc_plus_inert)
                .unwrap_or_default();

            self.set_last_surplus(state, surplus);
            let price = signed(self.price_per_unit(state)).saturating_add(price_change);
            let price = if price.is_negative() { U256::ZERO } else { price.into_raw() };
            debug!(
                target: "arb::pricing",
                %batch_poster,
                units_allocated,
                %surplus,
                %price,
                "updated L1 price per unit"
            );
            self.set_price_per_unit(state, price);
        }
        Ok(())
    }
}

fn signed(value: U256) -> I256 {
    I256::try_from(value).unwrap_or(I256::MAX)
}
