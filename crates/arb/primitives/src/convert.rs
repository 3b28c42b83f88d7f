//! Mapping between message indices and L2 block numbers.

/// Errors converting between message indices and block numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConversionError {
    #[error("message index {index} overflows the block number range (genesis {genesis})")]
    IndexOverflow { index: u64, genesis: u64 },
    #[error("block number {number} is below the genesis block {genesis}")]
    BlockBelowGenesis { number: u64, genesis: u64 },
}

/// Converts message indices to block numbers by a fixed genesis offset.
///
/// Block numbers are bounded by `i64::MAX` so they stay representable on every RPC surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageBlockConverter {
    genesis_block_number: u64,
}

impl MessageBlockConverter {
    pub const fn new(genesis_block_number: u64) -> Self {
        Self { genesis_block_number }
    }

    pub const fn genesis_block_number(&self) -> u64 {
        self.genesis_block_number
    }

    pub fn message_index_to_block_number(&self, index: u64) -> Result<u64, ConversionError> {
        let genesis = self.genesis_block_number;
        index
            .checked_add(genesis)
            .filter(|number| *number <= i64::MAX as u64)
            .ok_or(ConversionError::IndexOverflow { index, genesis })
    }

    pub fn block_number_to_message_index(&self, number: u64) -> Result<u64, ConversionError> {
        let genesis = self.genesis_block_number;
        number
            .checked_sub(genesis)
            .ok_or(ConversionError::BlockBelowGenesis { number, genesis })
    }
}
