//! Typed cells over the ArbOS storage account.
//!
//! A storage space is identified by a key; sub-spaces hash the parent key with their id. A cell
//! at offset `k` lives at `keccak256(space_key ++ k[..31])[..31] ++ k[31]`, so consecutive
//! offsets stay within one 256-slot page.

use crate::state::WorldState;
use alloy_primitives::{keccak256, Address, Bytes, B256, I256, U256};

/// Offsets start at 1 for the words of a byte string; offset 0 holds its length.
const BYTES_LENGTH_OFFSET: u64 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArbosStorage {
    account: Address,
    storage_key: Bytes,
}

impl ArbosStorage {
    pub fn new(account: Address) -> Self {
        Self { account, storage_key: Bytes::new() }
    }

    pub fn account(&self) -> Address {
        self.account
    }

    pub fn open_sub_storage(&self, id: &[u8]) -> Self {
        let mut preimage = Vec::with_capacity(self.storage_key.len() + id.len());
        preimage.extend_from_slice(&self.storage_key);
        preimage.extend_from_slice(id);
        Self { account: self.account, storage_key: keccak256(preimage).to_vec().into() }
    }

    pub fn map_slot(&self, key: B256) -> B256 {
        let mut preimage = Vec::with_capacity(self.storage_key.len() + 31);
        preimage.extend_from_slice(&self.storage_key);
        preimage.extend_from_slice(&key[..31]);
        let mut slot = keccak256(preimage);
        slot[31] = key[31];
        slot
    }

    pub fn get<S: WorldState + ?Sized>(&self, state: &S, key: B256) -> B256 {
        state.storage(self.account, self.map_slot(key))
    }

    pub fn set<S: WorldState + ?Sized>(&self, state: &mut S, key: B256, value: B256) {
        state.set_storage(self.account, self.map_slot(key), value);
    }

    pub fn get_by_u64<S: WorldState + ?Sized>(&self, state: &S, offset: u64) -> B256 {
        self.get(state, offset_key(offset))
    }

    pub fn set_by_u64<S: WorldState + ?Sized>(&self, state: &mut S, offset: u64, value: B256) {
        self.set(state, offset_key(offset), value);
    }

    pub fn clear_by_u64<S: WorldState + ?Sized>(&self, state: &mut S, offset: u64) {
        self.set_by_u64(state, offset, B256::ZERO);
    }

    pub fn get_u64<S: WorldState + ?Sized>(&self, state: &S, offset: u64) -> u64 {
        word_to_u64(self.get_by_u64(state, offset))
    }

    pub fn set_u64<S: WorldState + ?Sized>(&self, state: &mut S, offset: u64, value: u64) {
        self.set_by_u64(state, offset, offset_key(value));
    }

    pub fn get_u256<S: WorldState + ?Sized>(&self, state: &S, offset: u64) -> U256 {
        U256::from_be_bytes(self.get_by_u64(state, offset).0)
    }

    pub fn set_u256<S: WorldState + ?Sized>(&self, state: &mut S, offset: u64, value: U256) {
        self.set_by_u64(state, offset, B256::from(value.to_be_bytes::<32>()));
    }

    pub fn get_i256<S: WorldState + ?Sized>(&self, state: &S, offset: u64) -> I256 {
        I256::from_raw(self.get_u256(state, offset))
    }

    pub fn set_i256<S: WorldState + ?Sized>(&self, state: &mut S, offset: u64, value: I256) {
        self.set_u256(state, offset, value.into_raw());
    }

    pub fn get_address<S: WorldState + ?Sized>(&self, state: &S, offset: u64) -> Address {
        Address::from_word(self.get_by_u64(state, offset))
    }

    pub fn set_address<S: WorldState + ?Sized>(&self, state: &mut S, offset: u64, value: Address) {
        self.set_by_u64(state, offset, value.into_word());
    }

    /// Reads an address cell where `None` is stored as `1 << 255`.
    pub fn get_optional_address<S: WorldState + ?Sized>(
        &self,
        state: &S,
        offset: u64,
    ) -> Option<Address> {
        let word = self.get_by_u64(state, offset);
        (word != NONE_ADDRESS_SENTINEL).then(|| Address::from_word(word))
    }

    pub fn set_optional_address<S: WorldState + ?Sized>(
        &self,
        state: &mut S,
        offset: u64,
        value: Option<Address>,
    ) {
        let word = value.map_or(NONE_ADDRESS_SENTINEL, |address| address.into_word());
        self.set_by_u64(state, offset, word);
    }

    pub fn bytes_len<S: WorldState + ?Sized>(&self, state: &S) -> u64 {
        self.get_u64(state, BYTES_LENGTH_OFFSET)
    }

    /// Reads a byte string. Full words come first; a trailing partial word is right-aligned.
    pub fn get_bytes<S: WorldState + ?Sized>(&self, state: &S) -> Bytes {
        let mut remaining = self.bytes_len(state) as usize;
        let mut out = Vec::with_capacity(remaining);
        let mut offset = 1;
        while remaining >= 32 {
            out.extend_from_slice(self.get_by_u64(state, offset).as_slice());
            remaining -= 32;
            offset += 1;
        }
        if remaining > 0 {
            out.extend_from_slice(&self.get_by_u64(state, offset)[32 - remaining..]);
        }
        out.into()
    }

    pub fn set_bytes<S: WorldState + ?Sized>(&self, state: &mut S, bytes: &[u8]) {
        self.clear_bytes(state);
        self.set_u64(state, BYTES_LENGTH_OFFSET, bytes.len() as u64);
        let mut offset = 1;
        let mut chunks = bytes.chunks_exact(32);
        for chunk in chunks.by_ref() {
            self.set_by_u64(state, offset, B256::from_slice(chunk));
            offset += 1;
        }
        let tail = chunks.remainder();
        if !tail.is_empty() {
            let mut word = B256::ZERO;
            word[32 - tail.len()..].copy_from_slice(tail);
            self.set_by_u64(state, offset, word);
        }
    }

    pub fn clear_bytes<S: WorldState + ?Sized>(&self, state: &mut S) {
        let len = self.bytes_len(state);
        for offset in 1..=len.div_ceil(32) {
            self.clear_by_u64(state, offset);
        }
        self.clear_by_u64(state, BYTES_LENGTH_OFFSET);
    }
}

const NONE_ADDRESS_SENTINEL: B256 = {
    let mut word = [0u8; 32];
    word[0] = 0x80;
    B256::new(word)
};

fn offset_key(offset: u64) -> B256 {
    B256::from(U256::from(offset).to_be_bytes::<32>())
}

fn word_to_u64(word: B256) -> u64 {
    let mut low = [0u8; 8];
    low.copy_from_slice(&word[24..]);
    u64::from_be_bytes(low)
}
