//! Chain configuration consumed at genesis.

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

/// The subset of the chain config the execution core reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainConfig {
    pub chain_id: u64,
    pub arbitrum: ArbitrumChainParams,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArbitrumChainParams {
    #[serde(rename = "EnableArbOS", default)]
    pub enable_arbos: bool,
    #[serde(rename = "InitialArbOSVersion")]
    pub initial_arbos_version: u64,
    #[serde(rename = "InitialChainOwner")]
    pub initial_chain_owner: Address,
    #[serde(rename = "GenesisBlockNum", default)]
    pub genesis_block_num: u64,
}

impl ChainConfig {
    pub fn from_json(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
