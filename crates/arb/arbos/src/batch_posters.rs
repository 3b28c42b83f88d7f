//! Registered batch posters and the funds owed to them.

use crate::{address_set::AddressSet, state::WorldState, storage::ArbosStorage, ArbosError};
use alloy_primitives::{Address, U256};

const TOTAL_FUNDS_DUE_OFFSET: u64 = 0;
const POSTER_ADDRS_KEY: &[u8] = &[0];
const POSTER_INFO_KEY: &[u8] = &[1];

const FUNDS_DUE_OFFSET: u64 = 0;
const PAY_TO_OFFSET: u64 = 1;

#[derive(Debug, Clone)]
pub struct BatchPostersTable {
    storage: ArbosStorage,
    poster_addrs: AddressSet,
    poster_info: ArbosStorage,
}

impl BatchPostersTable {
    pub fn initialize<S: WorldState + ?Sized>(storage: &ArbosStorage, state: &mut S) {
        storage.set_u256(state, TOTAL_FUNDS_DUE_OFFSET, U256::ZERO);
        AddressSet::initialize(&storage.open_sub_storage(POSTER_ADDRS_KEY), state);
    }

    pub fn open(storage: ArbosStorage) -> Self {
        let poster_addrs = AddressSet::open(storage.open_sub_storage(POSTER_ADDRS_KEY));
        let poster_info = storage.open_sub_storage(POSTER_INFO_KEY);
        Self { storage, poster_addrs, poster_info }
    }

    pub fn total_funds_due<S: WorldState + ?Sized>(&self, state: &S) -> U256 {
        self.storage.get_u256(state, TOTAL_FUNDS_DUE_OFFSET)
    }

    pub fn contains_poster<S: WorldState + ?Sized>(&self, state: &S, poster: Address) -> bool {
        self.poster_addrs.is_member(state, poster)
    }

    pub fn all_posters<S: WorldState + ?Sized>(&self, state: &S) -> Vec<Address> {
        self.poster_addrs.members(state)
    }

    pub fn add_poster<S: WorldState + ?Sized>(
        &self,
        state: &mut S,
        poster: Address,
        pay_to: Address,
    ) -> BatchPoster {
        let info = self.poster_info.open_sub_storage(poster.as_slice());
        info.set_u256(state, FUNDS_DUE_OFFSET, U256::ZERO);
        info.set_address(state, PAY_TO_OFFSET, pay_to);
        self.poster_addrs.add(state, poster);
        self.poster(info)
    }

    pub fn open_poster<S: WorldState + ?Sized>(
        &self,
        state: &mut S,
        poster: Address,
        create_if_missing: bool,
    ) -> Result<BatchPoster, ArbosError> {
        if self.contains_poster(state, poster) {
            return Ok(self.poster(self.poster_info.open_sub_storage(poster.as_slice())));
        }
        if !create_if_missing {
            return Err(ArbosError::NotABatchPoster(poster));
        }
        Ok(self.add_poster(state, poster, poster))
    }

    fn poster(&self, info: ArbosStorage) -> BatchPoster {
        BatchPoster { info, table: self.storage.clone() }
    }
}

#[derive(Debug, Clone)]
pub struct BatchPoster {
    info: ArbosStorage,
    table: ArbosStorage,
}

impl BatchPoster {
    pub fn funds_due<S: WorldState + ?Sized>(&self, state: &S) -> U256 {
        self.info.get_u256(state, FUNDS_DUE_OFFSET)
    }

    /// Updates the amount owed to this poster and the table's total.
    pub fn set_funds_due<S: WorldState + ?Sized>(&self, state: &mut S, value: U256) {
        let previous = self.funds_due(state);
        let total = self.table.get_u256(state, TOTAL_FUNDS_DUE_OFFSET);
        let total = total.saturating_sub(previous).saturating_add(value);
        self.table.set_u256(state, TOTAL_FUNDS_DUE_OFFSET, total);
        self.info.set_u256(state, FUNDS_DUE_OFFSET, value);
    }

    pub fn pay_to<S: WorldState + ?Sized>(&self, state: &S) -> Address {
        self.info.get_address(state, PAY_TO_OFFSET)
    }

    pub fn set_pay_to<S: WorldState + ?Sized>(&self, state: &mut S, pay_to: Address) {
        self.info.set_address(state, PAY_TO_OFFSET, pay_to);
    }
}
