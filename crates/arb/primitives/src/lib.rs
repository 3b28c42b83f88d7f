//! Types shared by the ArbOS state transition and the execution engine: L1 messages, L2
//! transactions and their hashing, header metadata, reserved addresses and ABI bindings.

#![warn(unused_crate_dependencies)]

pub mod abi;
pub mod addresses;
pub mod chain_config;
pub mod convert;
pub mod header;
pub mod message;
pub mod parse;
pub mod transaction;

pub use chain_config::{ArbitrumChainParams, ChainConfig};
pub use convert::{ConversionError, MessageBlockConverter};
pub use header::HeaderInfo;
pub use message::{
    ConsensusSyncData, FinalityRecord, InboundMessage, L1IncomingMessageHeader, MessageKind,
    MessageResult,
};
pub use parse::{decode_signed_tx, parse_l2_transactions, ParseError, TxDecodeError};
pub use transaction::{
    ArbTransaction, ContractTx, DepositTx, InternalTx, RetryTx, SignedTx, SubmitRetryableTx,
    UnsignedTx,
};
