//! Ring buffer of the last 256 L1 block hashes seen by ArbOS.

use crate::{state::WorldState, storage::ArbosStorage, ArbosError};
use alloy_primitives::{keccak256, B256};

const L1_BLOCK_NUMBER_OFFSET: u64 = 0;
const RING_SIZE: u64 = 256;

#[derive(Debug, Clone)]
pub struct Blockhashes {
    storage: ArbosStorage,
}

impl Blockhashes {
    pub fn open(storage: ArbosStorage) -> Self {
        Self { storage }
    }

    /// The next L1 block number expected to be recorded.
    pub fn l1_block_number<S: WorldState + ?Sized>(&self, state: &S) -> u64 {
        self.storage.get_u64(state, L1_BLOCK_NUMBER_OFFSET)
    }

    pub fn block_hash<S: WorldState + ?Sized>(
        &self,
        state: &S,
        number: u64,
    ) -> Result<B256, ArbosError> {
        let current = self.l1_block_number(state);
        if number >= current || number.saturating_add(RING_SIZE) < current {
            return Err(ArbosError::BlockHashOutOfRange { number });
        }
        Ok(self.storage.get_by_u64(state, 1 + number % RING_SIZE))
    }

    /// Records `block_hash` for L1 block `number`, filling skipped numbers with derived hashes.
    pub fn record_new_l1_block<S: WorldState + ?Sized>(
        &self,
        state: &mut S,
        number: u64,
        block_hash: B256,
        arbos_version: u64,
    ) {
        let mut next = self.l1_block_number(state);
        if number < next {
            return;
        }
        if next.saturating_add(RING_SIZE) < number {
            next = number - RING_SIZE;
        }
        while next + 1 < number {
            next += 1;
            let mut preimage = [0u8; 40];
            preimage[..32].copy_from_slice(block_hash.as_slice());
            if arbos_version >= 8 {
                preimage[32..].copy_from_slice(&next.to_le_bytes());
            }
            self.storage.set_by_u64(state, 1 + next % RING_SIZE, keccak256(preimage));
        }
        self.storage.set_by_u64(state, 1 + number % RING_SIZE, block_hash);
        self.storage.set_u64(state, L1_BLOCK_NUMBER_OFFSET, number + 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::InMemoryWorldState;
    use arb_chain_primitives::addresses::ARBOS_STATE_ADDRESS;

    fn blockhashes() -> Blockhashes {
        Blockhashes::open(ArbosStorage::new(ARBOS_STATE_ADDRESS).open_sub_storage(&[6]))
    }

    #[test]
    fn records_and_reads_back() {
        let mut state = InMemoryWorldState::default();
        let hashes = blockhashes();
        assert!(hashes.block_hash(&state, 0).is_err());

        hashes.record_new_l1_block(&mut state, 0, B256::with_last_byte(1), 30);
        hashes.record_new_l1_block(&mut state, 1, B256::with_last_byte(2), 30);
        assert_eq!(hashes.l1_block_number(&state), 2);
        assert_eq!(hashes.block_hash(&state, 1).unwrap(), B256::with_last_byte(2));
        assert_eq!(hashes.block_hash(&state, 0).unwrap(), B256::with_last_byte(1));
        assert!(hashes.block_hash(&state, 2).is_err());
    }

    #[test]
    fn gaps_are_filled_with_derived_hashes() {
        let mut state = InMemoryWorldState::default();
        let hashes = blockhashes();
        let hash = B256::with_last_byte(9);
        hashes.record_new_l1_block(&mut state, 3, hash, 30);

        let mut preimage = [0u8; 40];
        preimage[..32].copy_from_slice(hash.as_slice());
        preimage[32..].copy_from_slice(&2u64.to_le_bytes());
        assert_eq!(hashes.block_hash(&state, 2).unwrap(), keccak256(preimage));
        assert_eq!(hashes.block_hash(&state, 3).unwrap(), hash);
    }

    #[test]
    fn gap_fill_before_v8_ignores_number() {
        let mut state = InMemoryWorldState::default();
        let hashes = blockhashes();
        let hash = B256::with_last_byte(9);
        hashes.record_new_l1_block(&mut state, 3, hash, 7);

        let mut preimage = [0u8; 40];
        preimage[..32].copy_from_slice(hash.as_slice());
        assert_eq!(hashes.block_hash(&state, 1).unwrap(), keccak256(preimage));
        assert_eq!(hashes.block_hash(&state, 2).unwrap(), keccak256(preimage));
    }

    #[test]
    fn stale_numbers_are_ignored_and_old_entries_expire() {
        let mut state = InMemoryWorldState::default();
        let hashes = blockhashes();
        hashes.record_new_l1_block(&mut state, 10, B256::with_last_byte(1), 30);
        hashes.record_new_l1_block(&mut state, 5, B256::with_last_byte(2), 30);
        assert_eq!(hashes.l1_block_number(&state), 11);

        hashes.record_new_l1_block(&mut state, 1_000, B256::with_last_byte(3), 30);
        assert!(hashes.block_hash(&state, 10).is_err());
        assert!(hashes.block_hash(&state, 745).is_ok());
        assert!(hashes.block_hash(&state, 744).is_err());
    }
}
