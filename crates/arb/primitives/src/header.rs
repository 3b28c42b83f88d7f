//! Protocol metadata packed into the `extra_data` and `mix_hash` header fields.
//!
//! `extra_data` carries the 32 byte send root. `mix_hash` packs three big-endian words:
//!
//! | bytes    | field            |
//! |----------|------------------|
//! | `0..8`   | send count       |
//! | `8..16`  | L1 block number  |
//! | `16..24` | ArbOS version    |
//! | `24..32` | reserved (zero)  |

use alloy_consensus::Header;
use alloy_primitives::{Bytes, B256, U256};

/// Arbitrum metadata carried by an L2 block header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeaderInfo {
    pub send_root: B256,
    pub send_count: u64,
    pub l1_block_number: u64,
    pub arbos_format_version: u64,
}

impl HeaderInfo {
    /// Extracts the metadata from `header`.
    ///
    /// Returns `None` unless the header has difficulty one and a non-zero base fee. A send root
    /// field of any length other than 32 bytes is read as the zero hash.
    pub fn extract(header: &Header) -> Option<Self> {
        if header.difficulty != U256::from(1) || header.base_fee_per_gas.unwrap_or_default() == 0 {
            return None;
        }

        let send_root = if header.extra_data.len() == 32 {
            B256::from_slice(&header.extra_data)
        } else {
            B256::ZERO
        };

        let mix = header.mix_hash.0;
        Some(Self {
            send_root,
            send_count: read_u64(&mix, 0),
            l1_block_number: read_u64(&mix, 8),
            arbos_format_version: read_u64(&mix, 16),
        })
    }

    /// Like [`HeaderInfo::extract`], but yields the empty value for non-protocol headers.
    pub fn extract_or_default(header: &Header) -> Self {
        Self::extract(header).unwrap_or_default()
    }

    /// Packs the send count, L1 block number and ArbOS version into a mix hash.
    pub fn mix_hash(&self) -> B256 {
        let mut mix = [0u8; 32];
        mix[0..8].copy_from_slice(&self.send_count.to_be_bytes());
        mix[8..16].copy_from_slice(&self.l1_block_number.to_be_bytes());
        mix[16..24].copy_from_slice(&self.arbos_format_version.to_be_bytes());
        B256::from(mix)
    }

    /// Writes the metadata into `header`.
    pub fn apply(&self, header: &mut Header) {
        header.extra_data = Bytes::copy_from_slice(self.send_root.as_slice());
        header.mix_hash = self.mix_hash();
    }
}

fn read_u64(bytes: &[u8; 32], offset: usize) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_be_bytes(word)
}
