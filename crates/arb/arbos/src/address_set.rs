//! A set of addresses kept in ArbOS storage.
//!
//! Members are stored at offsets `1..=size`; a sub-space maps each member to its offset.

use crate::{state::WorldState, storage::ArbosStorage};
use alloy_primitives::{Address, B256, U256};

const SIZE_OFFSET: u64 = 0;
const BY_ADDRESS_KEY: &[u8] = &[0];

#[derive(Debug, Clone)]
pub struct AddressSet {
    storage: ArbosStorage,
    by_address: ArbosStorage,
}

impl AddressSet {
    pub fn initialize<S: WorldState + ?Sized>(storage: &ArbosStorage, state: &mut S) {
        storage.set_u64(state, SIZE_OFFSET, 0);
    }

    pub fn open(storage: ArbosStorage) -> Self {
        let by_address = storage.open_sub_storage(BY_ADDRESS_KEY);
        Self { storage, by_address }
    }

    pub fn size<S: WorldState + ?Sized>(&self, state: &S) -> u64 {
        self.storage.get_u64(state, SIZE_OFFSET)
    }

    pub fn is_member<S: WorldState + ?Sized>(&self, state: &S, address: Address) -> bool {
        !self.by_address.get(state, address.into_word()).is_zero()
    }

    pub fn add<S: WorldState + ?Sized>(&self, state: &mut S, address: Address) {
        if self.is_member(state, address) {
            return;
        }
        let offset = self.size(state) + 1;
        let position = B256::from(U256::from(offset).to_be_bytes::<32>());
        self.by_address.set(state, address.into_word(), position);
        self.storage.set_address(state, offset, address);
        self.storage.set_u64(state, SIZE_OFFSET, offset);
    }

    pub fn members<S: WorldState + ?Sized>(&self, state: &S) -> Vec<Address> {
        (1..=self.size(state)).map(|offset| self.storage.get_address(state, offset)).collect()
    }

    pub fn clear<S: WorldState + ?Sized>(&self, state: &mut S) {
        for offset in 1..=self.size(state) {
            let member = self.storage.get_address(state, offset);
            self.by_address.set(state, member.into_word(), B256::ZERO);
            self.storage.clear_by_u64(state, offset);
        }
        self.storage.set_u64(state, SIZE_OFFSET, 0);
    }
}
