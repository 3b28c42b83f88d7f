//! Retryable tickets: escrowed cross-layer calls that can be redeemed until they expire.
//!
//! Every ticket is queued for reaping when it is created and each time it is kept alive. When
//! the queue head has timed out it is either extended by one of its remaining lifetime windows
//! or, once none remain, deleted with its escrow paid to the beneficiary.

use crate::{
    burn::Burner,
    queue::StorageQueue,
    state::{WorldState, WorldStateExt},
    storage::ArbosStorage,
    ArbosError,
};
use alloy_primitives::{Address, Bytes, B256, U256};
use arb_chain_primitives::{addresses::retryable_escrow_address, RetryTx};
use tracing::debug;

/// How long a ticket stays redeemable before it needs a keepalive.
pub const RETRYABLE_LIFETIME_SECONDS: u64 = 7 * 24 * 60 * 60;

/// Gas charged for each reap a keepalive adds to the timeout queue.
pub const RETRYABLE_REAP_PRICE: u64 = 58_000;

const TIMEOUT_QUEUE_KEY: &[u8] = &[0];
const CALLDATA_KEY: &[u8] = &[1];

const NUM_TRIES_OFFSET: u64 = 0;
const FROM_OFFSET: u64 = 1;
const TO_OFFSET: u64 = 2;
const CALL_VALUE_OFFSET: u64 = 3;
const BENEFICIARY_OFFSET: u64 = 4;
const TIMEOUT_OFFSET: u64 = 5;
const TIMEOUT_WINDOWS_LEFT_OFFSET: u64 = 6;

/// Fee charged for storing a ticket with `calldata_len` bytes of calldata.
pub fn retryable_submission_fee(calldata_len: usize, l1_base_fee: U256) -> U256 {
    l1_base_fee.saturating_mul(U256::from(1_400 + 6 * calldata_len as u64))
}

#[derive(Debug, Clone)]
pub struct RetryableState {
    storage: ArbosStorage,
    timeout_queue: StorageQueue,
}

impl RetryableState {
    pub fn initialize<S: WorldState + ?Sized>(storage: &ArbosStorage, state: &mut S) {
        StorageQueue::initialize(&storage.open_sub_storage(TIMEOUT_QUEUE_KEY), state);
    }

    pub fn open(storage: ArbosStorage) -> Self {
        let timeout_queue = StorageQueue::open(storage.open_sub_storage(TIMEOUT_QUEUE_KEY));
        Self { storage, timeout_queue }
    }

    pub fn timeout_queue(&self) -> &StorageQueue {
        &self.timeout_queue
    }

    fn retryable(&self, id: B256) -> Retryable {
        Retryable { storage: self.storage.open_sub_storage(id.as_slice()), id }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_retryable<S: WorldState + ?Sized>(
        &self,
        state: &mut S,
        id: B256,
        timeout: u64,
        from: Address,
        to: Option<Address>,
        call_value: U256,
        beneficiary: Address,
        calldata: &[u8],
    ) -> Retryable {
        let retryable = self.retryable(id);
        let storage = &retryable.storage;
        storage.set_u64(state, NUM_TRIES_OFFSET, 0);
        storage.set_address(state, FROM_OFFSET, from);
        storage.set_optional_address(state, TO_OFFSET, to);
        storage.set_u256(state, CALL_VALUE_OFFSET, call_value);
        storage.set_address(state, BENEFICIARY_OFFSET, beneficiary);
        storage.set_u64(state, TIMEOUT_OFFSET, timeout);
        storage.set_u64(state, TIMEOUT_WINDOWS_LEFT_OFFSET, 0);
        storage.open_sub_storage(CALLDATA_KEY).set_bytes(state, calldata);
        self.timeout_queue.push(state, id);
        retryable
    }

    /// Opens a live ticket. Deleted and expired tickets yield `None`.
    pub fn open_retryable<S: WorldState + ?Sized>(
        &self,
        state: &S,
        id: B256,
        now: u64,
    ) -> Option<Retryable> {
        let retryable = self.retryable(id);
        let timeout = retryable.timeout(state);
        (timeout != 0 && timeout >= now).then_some(retryable)
    }

    /// Storage footprint of a live ticket in bytes, zero when it does not exist.
    pub fn retryable_size_bytes<S: WorldState + ?Sized>(
        &self,
        state: &S,
        id: B256,
        now: u64,
    ) -> u64 {
        let Some(retryable) = self.open_retryable(state, id, now) else {
            return 0;
        };
        let calldata = 32 + 32 * retryable.calldata_len(state).div_ceil(32);
        6 * 32 + calldata
    }

    /// Deletes a ticket, paying whatever its escrow holds to the beneficiary.
    ///
    /// Returns `false` when there was no ticket to delete.
    pub fn delete_retryable<S: WorldState + ?Sized>(
        &self,
        state: &mut S,
        id: B256,
    ) -> Result<bool, ArbosError> {
        let retryable = self.retryable(id);
        if retryable.timeout(state) == 0 {
            return Ok(false);
        }
        let beneficiary = retryable.beneficiary(state);
        let escrow = retryable_escrow_address(id);
        let balance = state.balance(escrow);
        state.transfer(escrow, beneficiary, balance)?;
        retryable.clear(state);
        Ok(true)
    }

    /// Adds one lifetime window to a ticket and returns its new effective timeout.
    ///
    /// Fails when the ticket already outlives `limit_before_add`.
    pub fn keep_alive<S: WorldState + ?Sized>(
        &self,
        state: &mut S,
        id: B256,
        now: u64,
        limit_before_add: u64,
        burner: &mut dyn Burner,
    ) -> Result<u64, ArbosError> {
        let retryable =
            self.open_retryable(state, id, now).ok_or(ArbosError::RetryableNotFound(id))?;
        let timeout = retryable.calculate_timeout(state);
        if timeout > limit_before_add {
            return Err(ArbosError::TimeoutTooFarIntoFuture);
        }
        self.timeout_queue.push(state, id);
        let windows = retryable.timeout_windows_left(state);
        retryable.set_timeout_windows_left(state, windows.saturating_add(1));
        burner.burn(RETRYABLE_REAP_PRICE)?;
        Ok(timeout.saturating_add(RETRYABLE_LIFETIME_SECONDS))
    }

    /// Examines the head of the timeout queue, reaping or extending it if it has expired.
    pub fn try_to_reap_one_retryable<S: WorldState + ?Sized>(
        &self,
        state: &mut S,
        now: u64,
    ) -> Result<(), ArbosError> {
        let Some(id) = self.timeout_queue.peek(state) else {
            return Ok(());
        };
        let retryable = self.retryable(id);
        let timeout = retryable.timeout(state);
        if timeout == 0 {
            // already deleted
            self.timeout_queue.pop(state);
            return Ok(());
        }
        if timeout >= now {
            return Ok(());
        }

        self.timeout_queue.pop(state);
        let windows_left = retryable.timeout_windows_left(state);
        if windows_left == 0 {
            debug!(target: "arb::retryables", ticket = %id, "reaping expired retryable");
            self.delete_retryable(state, id)?;
            return Ok(());
        }
        retryable.set_timeout(state, timeout.saturating_add(RETRYABLE_LIFETIME_SECONDS));
        retryable.set_timeout_windows_left(state, windows_left - 1);
        Ok(())
    }
}

/// Handle to one ticket's storage.
#[derive(Debug, Clone)]
pub struct Retryable {
    storage: ArbosStorage,
    id: B256,
}

impl Retryable {
    pub fn id(&self) -> B256 {
        self.id
    }

    pub fn num_tries<S: WorldState + ?Sized>(&self, state: &S) -> u64 {
        self.storage.get_u64(state, NUM_TRIES_OFFSET)
    }

    /// Bumps the try counter and returns its new value.
    pub fn increment_num_tries<S: WorldState + ?Sized>(&self, state: &mut S) -> u64 {
        let tries = self.num_tries(state) + 1;
        self.storage.set_u64(state, NUM_TRIES_OFFSET, tries);
        tries
    }

    pub fn from<S: WorldState + ?Sized>(&self, state: &S) -> Address {
        self.storage.get_address(state, FROM_OFFSET)
    }

    pub fn to<S: WorldState + ?Sized>(&self, state: &S) -> Option<Address> {
        self.storage.get_optional_address(state, TO_OFFSET)
    }

    pub fn call_value<S: WorldState + ?Sized>(&self, state: &S) -> U256 {
        self.storage.get_u256(state, CALL_VALUE_OFFSET)
    }

    pub fn beneficiary<S: WorldState + ?Sized>(&self, state: &S) -> Address {
        self.storage.get_address(state, BENEFICIARY_OFFSET)
    }

    pub fn calldata<S: WorldState + ?Sized>(&self, state: &S) -> Bytes {
        self.storage.open_sub_storage(CALLDATA_KEY).get_bytes(state)
    }

    pub fn calldata_len<S: WorldState + ?Sized>(&self, state: &S) -> u64 {
        self.storage.open_sub_storage(CALLDATA_KEY).bytes_len(state)
    }

    pub fn timeout<S: WorldState + ?Sized>(&self, state: &S) -> u64 {
        self.storage.get_u64(state, TIMEOUT_OFFSET)
    }

    pub fn set_timeout<S: WorldState + ?Sized>(&self, state: &mut S, timeout: u64) {
        self.storage.set_u64(state, TIMEOUT_OFFSET, timeout);
    }

    pub fn timeout_windows_left<S: WorldState + ?Sized>(&self, state: &S) -> u64 {
        self.storage.get_u64(state, TIMEOUT_WINDOWS_LEFT_OFFSET)
    }

    pub fn set_timeout_windows_left<S: WorldState + ?Sized>(&self, state: &mut S, windows: u64) {
        self.storage.set_u64(state, TIMEOUT_WINDOWS_LEFT_OFFSET, windows);
    }

    /// The time the ticket expires once every remaining window has been used.
    pub fn calculate_timeout<S: WorldState + ?Sized>(&self, state: &S) -> u64 {
        let remaining = self.timeout_windows_left(state).saturating_mul(RETRYABLE_LIFETIME_SECONDS);
        self.timeout(state).saturating_add(remaining)
    }

    pub fn clear<S: WorldState + ?Sized>(&self, state: &mut S) {
        for offset in [
            NUM_TRIES_OFFSET,
            FROM_OFFSET,
            TO_OFFSET,
            CALL_VALUE_OFFSET,
            BENEFICIARY_OFFSET,
            TIMEOUT_OFFSET,
            TIMEOUT_WINDOWS_LEFT_OFFSET,
        ] {
            self.storage.clear_by_u64(state, offset);
        }
        self.storage.open_sub_storage(CALLDATA_KEY).clear_bytes(state);
    }

    /// Builds a redeem attempt of this ticket.
    #[allow(clippy::too_many_arguments)]
    pub fn make_tx<S: WorldState + ?Sized>(
        &self,
        state: &S,
        chain_id: u64,
        nonce: u64,
        gas_fee_cap: U256,
        gas: u64,
        refund_to: Address,
        max_refund: U256,
        submission_fee_refund: U256,
    ) -> RetryTx {
        RetryTx {
            chain_id,
            nonce,
            from: self.from(state),
            gas_fee_cap,
            gas,
            to: self.to(state),
            value: self.call_value(state),
            data: self.calldata(state),
            ticket_id: self.id,
            refund_to,
            max_refund,
            submission_fee_refund,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{burn::SystemBurner, state::InMemoryWorldState};
    use alloy_primitives::address;
    use arb_chain_primitives::addresses::ARBOS_STATE_ADDRESS;

    const FROM: Address = address!("0x00000000000000000000000000000000000000a1");
    const TO: Address = address!("0x00000000000000000000000000000000000000b2");
    const BENEFICIARY: Address = address!("0x00000000000000000000000000000000000000c3");
    const NOW: u64 = 1_700_000_000;

    fn retryables(state: &mut InMemoryWorldState) -> RetryableState {
        let storage = ArbosStorage::new(ARBOS_STATE_ADDRESS).open_sub_storage(&[2]);
        RetryableState::initialize(&storage, state);
        RetryableState::open(storage)
    }

    fn create(state: &mut InMemoryWorldState, retryables: &RetryableState, id: B256, value: u64) {
        retryables.create_retryable(
            state,
            id,
            NOW + RETRYABLE_LIFETIME_SECONDS,
            FROM,
            Some(TO),
            U256::from(value),
            BENEFICIARY,
            &[1, 2, 3],
        );
        state.add_balance(retryable_escrow_address(id), U256::from(value));
    }

    #[test]
    fn create_and_open() {
        let mut state = InMemoryWorldState::default();
        let retryables = retryables(&mut state);
        let id = B256::with_last_byte(1);
        create(&mut state, &retryables, id, 10);

        let ticket = retryables.open_retryable(&state, id, NOW).unwrap();
        assert_eq!(ticket.from(&state), FROM);
        assert_eq!(ticket.to(&state), Some(TO));
        assert_eq!(ticket.call_value(&state), U256::from(10));
        assert_eq!(ticket.calldata(&state), Bytes::from_static(&[1, 2, 3]));
        assert_eq!(ticket.timeout_windows_left(&state), 0);
        assert_eq!(retryables.retryable_size_bytes(&state, id, NOW), 6 * 32 + 32 + 32);
        assert_eq!(retryables.timeout_queue().values(&state), vec![id]);

        // expired tickets cannot be opened
        let expired = NOW + RETRYABLE_LIFETIME_SECONDS + 1;
        assert!(retryables.open_retryable(&state, id, expired).is_none());
        assert_eq!(retryables.retryable_size_bytes(&state, B256::ZERO, NOW), 0);
    }

    #[test]
    fn redeem_tx_carries_ticket_fields() {
        let mut state = InMemoryWorldState::default();
        let retryables = retryables(&mut state);
        let id = B256::with_last_byte(1);
        create(&mut state, &retryables, id, 10);
        let ticket = retryables.open_retryable(&state, id, NOW).unwrap();
        let value = U256::from(7);
        let tx = ticket.make_tx(&state, 42, 0, value, 50_000, BENEFICIARY, U256::MAX, U256::ZERO);
        assert_eq!(tx.from, FROM);
        assert_eq!(tx.to, Some(TO));
        assert_eq!(tx.value, U256::from(10));
        assert_eq!(tx.ticket_id, id);
    }

    #[test]
    fn delete_pays_escrow_to_beneficiary() {
        let mut state = InMemoryWorldState::default();
        let retryables = retryables(&mut state);
        let id = B256::with_last_byte(1);
        create(&mut state, &retryables, id, 10);

        assert!(retryables.delete_retryable(&mut state, id).unwrap());
        assert_eq!(state.balance(BENEFICIARY), U256::from(10));
        assert_eq!(state.balance(retryable_escrow_address(id)), U256::ZERO);
        assert!(retryables.open_retryable(&state, id, NOW).is_none());
        assert!(!retryables.delete_retryable(&mut state, id).unwrap());
    }

    #[test]
    fn reaper_deletes_expired_ticket_once() {
        let mut state = InMemoryWorldState::default();
        let retryables = retryables(&mut state);
        let id = B256::with_last_byte(1);
        create(&mut state, &retryables, id, 10);
        let after_expiry = NOW + RETRYABLE_LIFETIME_SECONDS + 1;

        retryables.try_to_reap_one_retryable(&mut state, after_expiry).unwrap();
        retryables.try_to_reap_one_retryable(&mut state, after_expiry).unwrap();

        assert_eq!(state.balance(BENEFICIARY), U256::from(10));
        assert!(retryables.timeout_queue().is_empty(&state));
        assert_eq!(retryables.retryable(id).timeout(&state), 0);
    }

    #[test]
    fn reaper_leaves_live_tickets_queued() {
        let mut state = InMemoryWorldState::default();
        let retryables = retryables(&mut state);
        let id = B256::with_last_byte(1);
        create(&mut state, &retryables, id, 10);

        retryables.try_to_reap_one_retryable(&mut state, NOW).unwrap();
        assert_eq!(retryables.timeout_queue().size(&state), 1);
        assert!(retryables.open_retryable(&state, id, NOW).is_some());
    }

    #[test]
    fn reaper_extends_ticket_with_windows_left() {
        let mut state = InMemoryWorldState::default();
        let retryables = retryables(&mut state);
        let id = B256::with_last_byte(1);
        create(&mut state, &retryables, id, 10);
        let ticket = retryables.retryable(id);
        ticket.set_timeout_windows_left(&mut state, 1);

        let after_expiry = NOW + RETRYABLE_LIFETIME_SECONDS + 1;
        retryables.try_to_reap_one_retryable(&mut state, after_expiry).unwrap();
        assert_eq!(ticket.timeout(&state), NOW + 2 * RETRYABLE_LIFETIME_SECONDS);
        assert_eq!(ticket.timeout_windows_left(&state), 0);
        assert_eq!(state.balance(BENEFICIARY), U256::ZERO);
    }

    #[test]
    fn reaper_pops_deleted_tickets() {
        let mut state = InMemoryWorldState::default();
        let retryables = retryables(&mut state);
        let id = B256::with_last_byte(1);
        create(&mut state, &retryables, id, 10);
        retryables.delete_retryable(&mut state, id).unwrap();

        retryables.try_to_reap_one_retryable(&mut state, NOW).unwrap();
        assert!(retryables.timeout_queue().is_empty(&state));
    }

    #[test]
    fn keepalive_saturates_at_the_end_of_time() {
        let mut state = InMemoryWorldState::default();
        let retryables = retryables(&mut state);
        let id = B256::with_last_byte(1);
        let now = u64::MAX - 1;
        retryables.create_retryable(
            &mut state,
            id,
            now,
            FROM,
            Some(TO),
            U256::ZERO,
            BENEFICIARY,
            &[],
        );

        let limit = now.saturating_add(RETRYABLE_LIFETIME_SECONDS);
        let mut burner = SystemBurner::default();
        let new_timeout = retryables.keep_alive(&mut state, id, now, limit, &mut burner).unwrap();

        assert_eq!(new_timeout, u64::MAX);
    }

    #[test]
    fn keepalive_adds_one_window() {
        let mut state = InMemoryWorldState::default();
        let retryables = retryables(&mut state);
        let id = B256::with_last_byte(1);
        create(&mut state, &retryables, id, 10);
        let timeout = NOW + RETRYABLE_LIFETIME_SECONDS;
        let now = timeout;
        let limit = now + RETRYABLE_LIFETIME_SECONDS;
        let mut burner = SystemBurner::default();

        let new_timeout = retryables.keep_alive(&mut state, id, now, limit, &mut burner).unwrap();
        assert_eq!(new_timeout, timeout + RETRYABLE_LIFETIME_SECONDS);
        assert_eq!(retryables.retryable(id).timeout_windows_left(&state), 1);
        assert_eq!(retryables.timeout_queue().size(&state), 2);
        assert_eq!(burner.burned(), RETRYABLE_REAP_PRICE);

        assert_eq!(
            retryables.keep_alive(&mut state, id, now, limit, &mut burner),
            Err(ArbosError::TimeoutTooFarIntoFuture)
        );
        assert_eq!(
            retryables.keep_alive(&mut state, B256::ZERO, now, limit, &mut burner),
            Err(ArbosError::RetryableNotFound(B256::ZERO))
        );
    }

    #[test]
    fn submission_fee_scales_with_calldata() {
        assert_eq!(retryable_submission_fee(0, U256::from(10)), U256::from(14_000));
        assert_eq!(retryable_submission_fee(100, U256::from(10)), U256::from(20_000));
    }
}
