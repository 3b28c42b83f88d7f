//! The root of ArbOS storage: version bookkeeping, fee accounts and every pricing and retryable
//! sub-model, all living in the storage of [`ARBOS_STATE_ADDRESS`].

use crate::{
    address_set::AddressSet,
    blockhashes::Blockhashes,
    l1_pricing::{
        L1PricingState, INITIAL_EQUILIBRATION_UNITS_V6, INITIAL_PER_BATCH_GAS_COST_V12,
        INITIAL_PER_BATCH_GAS_COST_V6,
    },
    l2_pricing::{L2PricingState, INITIAL_PER_BLOCK_GAS_LIMIT_V6, INITIAL_SPEED_LIMIT_PER_SECOND_V6},
    retryables::RetryableState,
    state::WorldState,
    storage::ArbosStorage,
    ArbosError,
};
use alloy_primitives::{Address, Bytes, I256, U256};
use arb_chain_primitives::{
    addresses::{ARBOS_STATE_ADDRESS, BATCH_POSTER_ADDRESS, L1_PRICER_FUNDS_POOL_ADDRESS},
    ChainConfig,
};
use tracing::{debug, info};

/// Highest ArbOS version this node knows how to run.
pub const MAX_ARBOS_VERSION: u64 = 40;

const VERSION_OFFSET: u64 = 0;
const UPGRADE_VERSION_OFFSET: u64 = 1;
const UPGRADE_TIMESTAMP_OFFSET: u64 = 2;
const NETWORK_FEE_ACCOUNT_OFFSET: u64 = 3;
const CHAIN_ID_OFFSET: u64 = 4;
const GENESIS_BLOCK_NUM_OFFSET: u64 = 5;
const INFRA_FEE_ACCOUNT_OFFSET: u64 = 6;
const BROTLI_COMPRESSION_LEVEL_OFFSET: u64 = 7;

const L1_PRICING_SUBSPACE: &[u8] = &[0];
const L2_PRICING_SUBSPACE: &[u8] = &[1];
const RETRYABLES_SUBSPACE: &[u8] = &[2];
const CHAIN_OWNER_SUBSPACE: &[u8] = &[4];
const BLOCKHASHES_SUBSPACE: &[u8] = &[6];
const CHAIN_CONFIG_SUBSPACE: &[u8] = &[7];

const MAX_BROTLI_COMPRESSION_LEVEL: u64 = 11;

/// Handle to the ArbOS state of one world state.
///
/// Opening is cheap; the handle only caches the version and the storage keys of its sub-models.
#[derive(Debug, Clone)]
pub struct ArbosState {
    storage: ArbosStorage,
    version: u64,
    l1_pricing: L1PricingState,
    l2_pricing: L2PricingState,
    retryables: RetryableState,
    chain_owners: AddressSet,
    blockhashes: Blockhashes,
}

impl ArbosState {
    fn with_version(storage: ArbosStorage, version: u64) -> Self {
        Self {
            l1_pricing: L1PricingState::open(storage.open_sub_storage(L1_PRICING_SUBSPACE)),
            l2_pricing: L2PricingState::open(storage.open_sub_storage(L2_PRICING_SUBSPACE)),
            retryables: RetryableState::open(storage.open_sub_storage(RETRYABLES_SUBSPACE)),
            chain_owners: AddressSet::open(storage.open_sub_storage(CHAIN_OWNER_SUBSPACE)),
            blockhashes: Blockhashes::open(storage.open_sub_storage(BLOCKHASHES_SUBSPACE)),
            storage,
            version,
        }
    }

    /// Opens the ArbOS state, failing if genesis has not initialized it.
    pub fn open<S: WorldState + ?Sized>(state: &S) -> Result<Self, ArbosError> {
        let storage = ArbosStorage::new(ARBOS_STATE_ADDRESS);
        let version = storage.get_u64(state, VERSION_OFFSET);
        if version == 0 {
            return Err(ArbosError::Uninitialized);
        }
        Ok(Self::with_version(storage, version))
    }

    /// Writes the genesis ArbOS state for `config` and upgrades it to the configured version.
    pub fn initialize<S: WorldState + ?Sized>(
        state: &mut S,
        config: &ChainConfig,
        serialized_config: &[u8],
        initial_l1_base_fee: U256,
    ) -> Result<Self, ArbosError> {
        let storage = ArbosStorage::new(ARBOS_STATE_ADDRESS);
        let existing = storage.get_u64(state, VERSION_OFFSET);
        if existing != 0 {
            return Err(ArbosError::AlreadyInitialized(existing));
        }
        let desired_version = config.arbitrum.initial_arbos_version;
        if desired_version == 0 || desired_version > MAX_ARBOS_VERSION {
            return Err(ArbosError::UnsupportedVersion(desired_version));
        }
        info!(
            target: "arb::arbos",
            desired_version,
            chain_id = config.chain_id,
            "initializing ArbOS"
        );

        // keeps the system account from being pruned as empty
        if state.nonce(ARBOS_STATE_ADDRESS) == 0 {
            state.set_nonce(ARBOS_STATE_ADDRESS, 1);
        }

        let owner = config.arbitrum.initial_chain_owner;
        storage.set_u64(state, VERSION_OFFSET, 1);
        storage.set_u64(state, UPGRADE_VERSION_OFFSET, 0);
        storage.set_u64(state, UPGRADE_TIMESTAMP_OFFSET, 0);
        storage.set_address(
            state,
            NETWORK_FEE_ACCOUNT_OFFSET,
            if desired_version >= 2 { owner } else { Address::ZERO },
        );
        storage.set_u256(state, CHAIN_ID_OFFSET, U256::from(config.chain_id));
        storage.open_sub_storage(CHAIN_CONFIG_SUBSPACE).set_bytes(state, serialized_config);
        storage.set_u64(state, GENESIS_BLOCK_NUM_OFFSET, config.arbitrum.genesis_block_num);
        storage.set_u64(state, BROTLI_COMPRESSION_LEVEL_OFFSET, 0);

        let rewards_recipient = if desired_version >= 2 { owner } else { BATCH_POSTER_ADDRESS };
        L1PricingState::initialize(
            &storage.open_sub_storage(L1_PRICING_SUBSPACE),
            state,
            rewards_recipient,
            initial_l1_base_fee,
        );
        L2PricingState::initialize(&storage.open_sub_storage(L2_PRICING_SUBSPACE), state);
        RetryableState::initialize(&storage.open_sub_storage(RETRYABLES_SUBSPACE), state);

        let owners_storage = storage.open_sub_storage(CHAIN_OWNER_SUBSPACE);
        AddressSet::initialize(&owners_storage, state);
        AddressSet::open(owners_storage).add(state, owner);

        let mut arbos = Self::with_version(storage, 1);
        if desired_version > 1 {
            arbos.upgrade_arbos_version(state, desired_version, true)?;
        }
        info!(target: "arb::arbos", version = arbos.version, "ArbOS initialized");
        Ok(arbos)
    }

    /// Steps the version up to `target`, applying each version's migration in turn.
    ///
    /// `first_time` is set only during genesis, where a few v6 defaults replace the v0 ones.
    pub fn upgrade_arbos_version<S: WorldState + ?Sized>(
        &mut self,
        state: &mut S,
        target: u64,
        first_time: bool,
    ) -> Result<(), ArbosError> {
        if target > MAX_ARBOS_VERSION {
            return Err(ArbosError::UnsupportedVersion(target));
        }
        info!(
            target: "arb::arbos",
            from = self.version,
            to = target,
            first_time,
            "upgrading ArbOS"
        );

        while self.version < target {
            let next = self.version + 1;
            debug!(target: "arb::arbos", version = next, "applying ArbOS upgrade step");
            match next {
                2 => self.l1_pricing.set_last_surplus(state, I256::ZERO),
                3 => {
                    self.l1_pricing.set_per_batch_gas_cost(state, 0);
                    self.l1_pricing.set_amortized_cost_cap_bips(state, u64::MAX);
                }
                10 => {
                    let pool = state.balance(L1_PRICER_FUNDS_POOL_ADDRESS);
                    self.l1_pricing.set_l1_fees_available(state, pool);
                }
                11 => {
                    self.l1_pricing.set_per_batch_gas_cost(state, INITIAL_PER_BATCH_GAS_COST_V12);
                    // v3 disabled the cap with u64::MAX, the disabled value is zero
                    if self.l1_pricing.amortized_cost_cap_bips(state) == u64::MAX {
                        self.l1_pricing.set_amortized_cost_cap_bips(state, 0);
                    }
                    if !first_time {
                        self.chain_owners.clear(state);
                    }
                }
                20 => self.set_brotli_compression_level(state, 1)?,
                4..=9 | 12..=19 | 21..=40 => {}
                _ => return Err(ArbosError::UnsupportedVersion(next)),
            }
            self.version = next;
        }

        if first_time && target >= 6 {
            if target < 11 {
                self.l1_pricing.set_per_batch_gas_cost(state, INITIAL_PER_BATCH_GAS_COST_V6);
            }
            self.l1_pricing
                .set_equilibration_units(state, U256::from(INITIAL_EQUILIBRATION_UNITS_V6));
            self.l2_pricing.set_speed_limit_per_second(state, INITIAL_SPEED_LIMIT_PER_SECOND_V6);
            self.l2_pricing.set_per_block_gas_limit(state, INITIAL_PER_BLOCK_GAS_LIMIT_V6);
        }

        self.storage.set_u64(state, VERSION_OFFSET, self.version);
        Ok(())
    }

    /// Schedules an upgrade to `version` that takes effect in the first block at or after
    /// `timestamp`.
    pub fn schedule_arbos_upgrade<S: WorldState + ?Sized>(
        &self,
        state: &mut S,
        version: u64,
        timestamp: u64,
    ) {
        self.storage.set_u64(state, UPGRADE_VERSION_OFFSET, version);
        self.storage.set_u64(state, UPGRADE_TIMESTAMP_OFFSET, timestamp);
    }

    /// Runs a scheduled upgrade once its timestamp has been reached. Returns whether it ran.
    pub fn upgrade_if_necessary<S: WorldState + ?Sized>(
        &mut self,
        state: &mut S,
        timestamp: u64,
    ) -> Result<bool, ArbosError> {
        let target = self.upgrade_version(state);
        if self.version >= target || timestamp < self.upgrade_timestamp(state) {
            return Ok(false);
        }
        self.upgrade_arbos_version(state, target, false)?;
        Ok(true)
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn upgrade_version<S: WorldState + ?Sized>(&self, state: &S) -> u64 {
        self.storage.get_u64(state, UPGRADE_VERSION_OFFSET)
    }

    pub fn upgrade_timestamp<S: WorldState + ?Sized>(&self, state: &S) -> u64 {
        self.storage.get_u64(state, UPGRADE_TIMESTAMP_OFFSET)
    }

    pub fn network_fee_account<S: WorldState + ?Sized>(&self, state: &S) -> Address {
        self.storage.get_address(state, NETWORK_FEE_ACCOUNT_OFFSET)
    }

    pub fn set_network_fee_account<S: WorldState + ?Sized>(&self, state: &mut S, account: Address) {
        self.storage.set_address(state, NETWORK_FEE_ACCOUNT_OFFSET, account);
    }

    /// Zero means no infrastructure fee account is configured.
    pub fn infra_fee_account<S: WorldState + ?Sized>(&self, state: &S) -> Address {
        self.storage.get_address(state, INFRA_FEE_ACCOUNT_OFFSET)
    }

    pub fn set_infra_fee_account<S: WorldState + ?Sized>(&self, state: &mut S, account: Address) {
        self.storage.set_address(state, INFRA_FEE_ACCOUNT_OFFSET, account);
    }

    pub fn chain_id<S: WorldState + ?Sized>(&self, state: &S) -> U256 {
        self.storage.get_u256(state, CHAIN_ID_OFFSET)
    }

    pub fn genesis_block_num<S: WorldState + ?Sized>(&self, state: &S) -> u64 {
        self.storage.get_u64(state, GENESIS_BLOCK_NUM_OFFSET)
    }

    /// The serialized chain config stored at genesis.
    pub fn chain_config<S: WorldState + ?Sized>(&self, state: &S) -> Bytes {
        self.storage.open_sub_storage(CHAIN_CONFIG_SUBSPACE).get_bytes(state)
    }

    pub fn brotli_compression_level<S: WorldState + ?Sized>(&self, state: &S) -> u64 {
        self.storage.get_u64(state, BROTLI_COMPRESSION_LEVEL_OFFSET)
    }

    pub fn set_brotli_compression_level<S: WorldState + ?Sized>(
        &self,
        state: &mut S,
        level: u64,
    ) -> Result<(), ArbosError> {
        if level > MAX_BROTLI_COMPRESSION_LEVEL {
            return Err(ArbosError::InvalidCompressionLevel(level));
        }
        self.storage.set_u64(state, BROTLI_COMPRESSION_LEVEL_OFFSET, level);
        Ok(())
    }

    pub fn l1_pricing(&self) -> &L1PricingState {
        &self.l1_pricing
    }

    pub fn l2_pricing(&self) -> &L2PricingState {
        &self.l2_pricing
    }

    pub fn retryables(&self) -> &RetryableState {
        &self.retryables
    }

    pub fn chain_owners(&self) -> &AddressSet {
        &self.chain_owners
    }

    pub fn blockhashes(&self) -> &Blockhashes {
        &self.blockhashes
    }
}
