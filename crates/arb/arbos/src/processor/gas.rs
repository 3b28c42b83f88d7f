//! Gas arithmetic shared by every transaction kind.

use crate::l1_pricing::TX_DATA_NON_ZERO_GAS;
use alloy_primitives::{Address, U256};
use arb_chain_primitives::addresses::BATCH_POSTER_ADDRESS;

pub const TX_GAS: u64 = 21_000;
pub const TX_GAS_CONTRACT_CREATION: u64 = 53_000;
pub const TX_DATA_ZERO_GAS: u64 = 4;
pub const ACCESS_LIST_ADDRESS_GAS: u64 = 2_400;
pub const ACCESS_LIST_STORAGE_KEY_GAS: u64 = 1_900;
pub const INIT_CODE_WORD_GAS: u64 = 2;
pub const TOTAL_COST_FLOOR_PER_TOKEN: u64 = 10;

/// Gas charged before any code runs.
pub fn intrinsic_gas(
    input: &[u8],
    is_create: bool,
    access_list_addresses: u64,
    access_list_storage_keys: u64,
) -> u64 {
    let zeros = input.iter().filter(|byte| **byte == 0).count() as u64;
    let non_zeros = input.len() as u64 - zeros;

    let mut gas = if is_create { TX_GAS_CONTRACT_CREATION } else { TX_GAS };
    gas = gas
        .saturating_add(zeros.saturating_mul(TX_DATA_ZERO_GAS))
        .saturating_add(non_zeros.saturating_mul(TX_DATA_NON_ZERO_GAS))
        .saturating_add(access_list_addresses.saturating_mul(ACCESS_LIST_ADDRESS_GAS))
        .saturating_add(access_list_storage_keys.saturating_mul(ACCESS_LIST_STORAGE_KEY_GAS));
    if is_create {
        let words = (input.len() as u64).div_ceil(32);
        gas = gas.saturating_add(words.saturating_mul(INIT_CODE_WORD_GAS));
    }
    gas
}

/// Minimum gas a transaction is charged for its calldata once calldata floor pricing is active.
pub fn floor_data_gas(input: &[u8]) -> u64 {
    let zeros = input.iter().filter(|byte| **byte == 0).count() as u64;
    let tokens = zeros + (input.len() as u64 - zeros) * 4;
    TX_GAS.saturating_add(tokens.saturating_mul(TOTAL_COST_FLOOR_PER_TOKEN))
}

/// Whether the priority tip is dropped for this block.
///
/// Tips are only honoured for batch-posted transactions on ArbOS 9.
pub fn drops_tip(arbos_version: u64, coinbase: Address) -> bool {
    arbos_version != 9 || coinbase != BATCH_POSTER_ADDRESS
}

/// Price per gas actually paid, with the tip removed when [`drops_tip`] says so.
pub fn effective_gas_price(fee_cap: U256, tip_cap: U256, base_fee: U256, drop_tip: bool) -> U256 {
    let price = fee_cap.min(base_fee.saturating_add(tip_cap));
    if drop_tip && price > base_fee {
        base_fee
    } else {
        price
    }
}

/// Converts a poster cost in wei into L2 gas at `base_fee`, rounding down.
pub fn poster_gas(poster_cost: U256, base_fee: U256) -> u64 {
    if base_fee.is_zero() {
        return 0;
    }
    (poster_cost / base_fee).saturating_to()
}

/// Moves up to `take` out of `pool`, returning how much was taken.
pub fn take_funds(pool: &mut U256, take: U256) -> U256 {
    let taken = (*pool).min(take);
    *pool -= taken;
    taken
}
