//! The world state seam between the state transition and the storage engine.

use crate::ArbosError;
use alloy_primitives::{Address, Keccak256, B256, U256};
use std::collections::BTreeMap;

/// Handle to a state checkpoint, valid until it is reverted or discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint(usize);

/// Accounts, balances and storage the state transition reads and writes.
#[auto_impl::auto_impl(&mut, Box)]
pub trait WorldState {
    fn balance(&self, address: Address) -> U256;

    fn set_balance(&mut self, address: Address, balance: U256);

    fn nonce(&self, address: Address) -> u64;

    fn set_nonce(&mut self, address: Address, nonce: u64);

    fn storage(&self, address: Address, slot: B256) -> B256;

    fn set_storage(&mut self, address: Address, slot: B256, value: B256);

    /// Opens a checkpoint that changes can later be rolled back to.
    fn checkpoint(&mut self) -> Checkpoint;

    /// Undoes every change made since `checkpoint`, closing it and any checkpoint opened later.
    fn revert_to(&mut self, checkpoint: Checkpoint);

    /// Keeps the changes made since `checkpoint` and closes it.
    fn discard(&mut self, checkpoint: Checkpoint);

    fn state_root(&self) -> B256;

    /// Hints that `address` and `slots` will be read soon.
    fn prewarm(&mut self, _address: Address, _slots: &[B256]) {}
}

/// Balance helpers available on every [`WorldState`].
pub trait WorldStateExt: WorldState {
    fn add_balance(&mut self, address: Address, amount: U256) {
        if !amount.is_zero() {
            let balance = self.balance(address).saturating_add(amount);
            self.set_balance(address, balance);
        }
    }

    fn sub_balance(&mut self, address: Address, amount: U256) -> Result<(), ArbosError> {
        let have = self.balance(address);
        let remaining = have.checked_sub(amount).ok_or(ArbosError::InsufficientBalance {
            address,
            have,
            want: amount,
        })?;
        self.set_balance(address, remaining);
        Ok(())
    }

    fn transfer(&mut self, from: Address, to: Address, amount: U256) -> Result<(), ArbosError> {
        self.sub_balance(from, amount)?;
        self.add_balance(to, amount);
        Ok(())
    }
}

impl<S: WorldState + ?Sized> WorldStateExt for S {}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Account {
    pub balance: U256,
    pub nonce: u64,
    pub storage: BTreeMap<B256, B256>,
}

impl Account {
    fn is_empty(&self) -> bool {
        self.balance.is_zero() && self.nonce == 0 && self.storage.is_empty()
    }
}

/// A [`WorldState`] held entirely in memory. Checkpoints are full snapshots.
#[derive(Debug, Clone, Default)]
pub struct InMemoryWorldState {
    accounts: BTreeMap<Address, Account>,
    checkpoints: Vec<BTreeMap<Address, Account>>,
}

impl InMemoryWorldState {
    pub fn account(&self, address: Address) -> Option<&Account> {
        self.accounts.get(&address)
    }

    pub fn accounts(&self) -> impl Iterator<Item = (&Address, &Account)> {
        self.accounts.iter()
    }

    fn account_mut(&mut self, address: Address) -> &mut Account {
        self.accounts.entry(address).or_default()
    }
}

impl WorldState for InMemoryWorldState {
    fn balance(&self, address: Address) -> U256 {
        self.accounts.get(&address).map(|account| account.balance).unwrap_or_default()
    }

    fn set_balance(&mut self, address: Address, balance: U256) {
        self.account_mut(address).balance = balance;
    }

    fn nonce(&self, address: Address) -> u64 {
        self.accounts.get(&address).map(|account| account.nonce).unwrap_or_default()
    }

    fn set_nonce(&mut self, address: Address, nonce: u64) {
        self.account_mut(address).nonce = nonce;
    }

    fn storage(&self, address: Address, slot: B256) -> B256 {
        self.accounts
            .get(&address)
            .and_then(|account| account.storage.get(&slot).copied())
            .unwrap_or_default()
    }

    fn set_storage(&mut self, address: Address, slot: B256, value: B256) {
        let storage = &mut self.account_mut(address).storage;
        if value.is_zero() {
            storage.remove(&slot);
        } else {
            storage.insert(slot, value);
        }
    }

    fn checkpoint(&mut self) -> Checkpoint {
        self.checkpoints.push(self.accounts.clone());
        Checkpoint(self.checkpoints.len() - 1)
    }

    fn revert_to(&mut self, checkpoint: Checkpoint) {
        self.checkpoints.truncate(checkpoint.0 + 1);
        if let Some(snapshot) = self.checkpoints.pop() {
            self.accounts = snapshot;
        }
    }

    fn discard(&mut self, checkpoint: Checkpoint) {
        self.checkpoints.truncate(checkpoint.0);
    }

    /// Commitment over every non-empty account in address order.
    fn state_root(&self) -> B256 {
        let mut hasher = Keccak256::new();
        for (address, account) in self.accounts.iter().filter(|(_, account)| !account.is_empty()) {
            hasher.update(address);
            hasher.update(account.balance.to_be_bytes::<32>());
            hasher.update(account.nonce.to_be_bytes());
            for (slot, value) in &account.storage {
                hasher.update(slot);
                hasher.update(value);
            }
        }
        hasher.finalize()
    }
}
