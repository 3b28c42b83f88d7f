//! Reserved addresses and protocol constants.

use alloy_primitives::{address, keccak256, Address, B256};

/// Sender of every internal transaction and the account ArbOS acts as.
pub const ARBOS_ADDRESS: Address = address!("0x00000000000000000000000000000000000a4b05");

/// Account whose storage backs the ArbOS state tree.
pub const ARBOS_STATE_ADDRESS: Address = address!("0xA4B05FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF");

/// The `ArbRetryableTx` precompile.
pub const ARB_RETRYABLE_TX_ADDRESS: Address =
    address!("0x000000000000000000000000000000000000006e");

/// Pool collecting L1 poster fees until they are paid out to batch posters.
pub const L1_PRICER_FUNDS_POOL_ADDRESS: Address =
    address!("0xA4B00000000000000000000000000000000000f6");

/// Coinbase of sequencer-produced blocks and the default batch poster.
pub const BATCH_POSTER_ADDRESS: Address = address!("0xA4B000000000000000000073657175656e636572");

/// Default pay-to address of [`BATCH_POSTER_ADDRESS`].
pub const BATCH_POSTER_PAY_TO_ADDRESS: Address = BATCH_POSTER_ADDRESS;

/// System contract holding a ring buffer of recent parent block hashes.
pub const HISTORY_STORAGE_ADDRESS: Address =
    address!("0x0000F90827F1C53a10cb7A02335B175320002935");

/// Number of slots in the parent block hash ring.
pub const HISTORY_SERVE_WINDOW: u64 = 8191;

/// Returns the account that holds the call value of the retryable `ticket_id` while it is alive.
pub fn retryable_escrow_address(ticket_id: B256) -> Address {
    let mut preimage = Vec::with_capacity(16 + 32);
    preimage.extend_from_slice(b"retryable escrow");
    preimage.extend_from_slice(ticket_id.as_slice());
    Address::from_slice(&keccak256(preimage)[12..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::b256;

    #[test]
    fn escrow_address_is_last_twenty_bytes_of_hash() {
        let ticket = b256!("0x0101010101010101010101010101010101010101010101010101010101010101");
        let hash = keccak256([b"retryable escrow".as_slice(), ticket.as_slice()].concat());
        assert_eq!(retryable_escrow_address(ticket).as_slice(), &hash[12..]);
    }

    #[test]
    fn escrow_address_differs_per_ticket() {
        assert_ne!(
            retryable_escrow_address(B256::ZERO),
            retryable_escrow_address(B256::with_last_byte(1))
        );
    }
}
