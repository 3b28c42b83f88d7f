//! FIFO of 32 byte words kept in ArbOS storage.

use crate::{state::WorldState, storage::ArbosStorage};
use alloy_primitives::B256;

const NEXT_PUT_OFFSET: u64 = 0;
const NEXT_GET_OFFSET: u64 = 1;
const FIRST_ELEMENT_OFFSET: u64 = 2;

#[derive(Debug, Clone)]
pub struct StorageQueue {
    storage: ArbosStorage,
}

impl StorageQueue {
    pub fn initialize<S: WorldState + ?Sized>(storage: &ArbosStorage, state: &mut S) {
        storage.set_u64(state, NEXT_PUT_OFFSET, FIRST_ELEMENT_OFFSET);
        storage.set_u64(state, NEXT_GET_OFFSET, FIRST_ELEMENT_OFFSET);
    }

    pub fn open(storage: ArbosStorage) -> Self {
        Self { storage }
    }

    pub fn is_empty<S: WorldState + ?Sized>(&self, state: &S) -> bool {
        self.size(state) == 0
    }

    pub fn size<S: WorldState + ?Sized>(&self, state: &S) -> u64 {
        let put = self.storage.get_u64(state, NEXT_PUT_OFFSET);
        let get = self.storage.get_u64(state, NEXT_GET_OFFSET);
        put.saturating_sub(get)
    }

    pub fn peek<S: WorldState + ?Sized>(&self, state: &S) -> Option<B256> {
        if self.is_empty(state) {
            return None;
        }
        let get = self.storage.get_u64(state, NEXT_GET_OFFSET);
        Some(self.storage.get_by_u64(state, get))
    }

    pub fn pop<S: WorldState + ?Sized>(&self, state: &mut S) -> Option<B256> {
        if self.is_empty(state) {
            return None;
        }
        let get = self.storage.get_u64(state, NEXT_GET_OFFSET);
        let value = self.storage.get_by_u64(state, get);
        self.storage.clear_by_u64(state, get);
        self.storage.set_u64(state, NEXT_GET_OFFSET, get + 1);
        Some(value)
    }

    pub fn push<S: WorldState + ?Sized>(&self, state: &mut S, value: B256) {
        let put = self.storage.get_u64(state, NEXT_PUT_OFFSET);
        self.storage.set_by_u64(state, put, value);
        self.storage.set_u64(state, NEXT_PUT_OFFSET, put + 1);
    }

    /// Every queued value from head to tail.
    pub fn values<S: WorldState + ?Sized>(&self, state: &S) -> Vec<B256> {
        let put = self.storage.get_u64(state, NEXT_PUT_OFFSET);
        let get = self.storage.get_u64(state, NEXT_GET_OFFSET);
        (get..put).map(|offset| self.storage.get_by_u64(state, offset)).collect()
    }
}
