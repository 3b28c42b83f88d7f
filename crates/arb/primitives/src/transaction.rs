//! The closed set of transaction kinds the state transition understands.
//!
//! Arbitrum-specific kinds hash as `keccak256(type || rlp(fields))`. Signed Ethereum transactions
//! keep their EIP-2718 encoding and the sender recovered when they were decoded.

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_rlp::{BufMut, Encodable, Header as RlpHeader, EMPTY_STRING_CODE};
use derive_more::From;

pub const DEPOSIT_TX_TYPE: u8 = 0x64;
pub const UNSIGNED_TX_TYPE: u8 = 0x65;
pub const CONTRACT_TX_TYPE: u8 = 0x66;
pub const RETRY_TX_TYPE: u8 = 0x68;
pub const SUBMIT_RETRYABLE_TX_TYPE: u8 = 0x69;
pub const INTERNAL_TX_TYPE: u8 = 0x6a;

/// Encodes `$field`s as an RLP list into `$out`.
macro_rules! rlp_list {
    ($out:expr; $($field:expr),+ $(,)?) => {{
        let payload_length = 0 $(+ $field.length())+;
        RlpHeader { list: true, payload_length }.encode($out);
        $($field.encode($out);)+
    }};
}

/// RLP encoding of an optional call target: the empty string stands for contract creation.
struct OptionalAddress(Option<Address>);

impl Encodable for OptionalAddress {
    fn encode(&self, out: &mut dyn BufMut) {
        match self.0 {
            Some(address) => address.encode(out),
            None => out.put_u8(EMPTY_STRING_CODE),
        }
    }

    fn length(&self) -> usize {
        self.0.map_or(1, |address| address.length())
    }
}

/// Value minted on L2 for an L1 deposit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositTx {
    pub chain_id: u64,
    pub l1_request_id: B256,
    pub from: Address,
    pub to: Address,
    pub value: U256,
}

/// System transaction calling one of the ArbOS entry points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalTx {
    pub chain_id: u64,
    pub data: Bytes,
}

/// Call made on behalf of an L1 account, checked against its nonce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTx {
    pub chain_id: u64,
    pub from: Address,
    pub nonce: u64,
    pub gas_fee_cap: U256,
    pub gas: u64,
    pub to: Option<Address>,
    pub value: U256,
    pub data: Bytes,
}

/// Call made by an L1 contract, identified by its request id instead of a nonce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractTx {
    pub chain_id: u64,
    pub request_id: B256,
    pub from: Address,
    pub gas_fee_cap: U256,
    pub gas: u64,
    pub to: Option<Address>,
    pub value: U256,
    pub data: Bytes,
}

/// Creates a retryable ticket and, when funded, schedules its first redeem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitRetryableTx {
    pub chain_id: u64,
    pub request_id: B256,
    pub from: Address,
    pub l1_base_fee: U256,
    pub deposit_value: U256,
    pub gas_fee_cap: U256,
    pub gas: u64,
    pub retry_to: Option<Address>,
    pub retry_value: U256,
    pub beneficiary: Address,
    pub max_submission_fee: U256,
    pub fee_refund_addr: Address,
    pub retry_data: Bytes,
}

/// A redeem attempt of an existing retryable ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryTx {
    pub chain_id: u64,
    pub nonce: u64,
    pub from: Address,
    pub gas_fee_cap: U256,
    pub gas: u64,
    pub to: Option<Address>,
    pub value: U256,
    pub data: Bytes,
    pub ticket_id: B256,
    pub refund_to: Address,
    pub max_refund: U256,
    pub submission_fee_refund: U256,
}

/// A signed Ethereum transaction with its sender already recovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTx {
    pub hash: B256,
    pub tx_type: u8,
    pub from: Address,
    pub nonce: u64,
    pub gas_limit: u64,
    pub gas_fee_cap: U256,
    pub gas_tip_cap: U256,
    pub to: Option<Address>,
    pub value: U256,
    pub input: Bytes,
    pub access_list_addresses: u64,
    pub access_list_storage_keys: u64,
    /// EIP-2718 encoding as received.
    pub encoded: Bytes,
}

impl DepositTx {
    fn encode_fields(&self, out: &mut Vec<u8>) {
        rlp_list!(out; self.chain_id, self.l1_request_id, self.from, self.to, self.value);
    }
}

impl InternalTx {
    fn encode_fields(&self, out: &mut Vec<u8>) {
        rlp_list!(out; self.chain_id, self.data);
    }
}

impl UnsignedTx {
    fn encode_fields(&self, out: &mut Vec<u8>) {
        rlp_list!(out;
            self.chain_id,
            self.from,
            self.nonce,
            self.gas_fee_cap,
            self.gas,
            OptionalAddress(self.to),
            self.value,
            self.data,
        );
    }
}

impl ContractTx {
    fn encode_fields(&self, out: &mut Vec<u8>) {
        rlp_list!(out;
            self.chain_id,
            self.request_id,
            self.from,
            self.gas_fee_cap,
            self.gas,
            OptionalAddress(self.to),
            self.value,
            self.data,
        );
    }
}

impl SubmitRetryableTx {
    fn encode_fields(&self, out: &mut Vec<u8>) {
        rlp_list!(out;
            self.chain_id,
            self.request_id,
            self.from,
            self.l1_base_fee,
            self.deposit_value,
            self.gas_fee_cap,
            self.gas,
            OptionalAddress(self.retry_to),
            self.retry_value,
            self.beneficiary,
            self.max_submission_fee,
            self.fee_refund_addr,
            self.retry_data,
        );
    }

    /// The id of the ticket this submission creates.
    pub fn ticket_id(&self) -> B256 {
        ArbTransaction::hash_typed(SUBMIT_RETRYABLE_TX_TYPE, |out| self.encode_fields(out))
    }
}

impl RetryTx {
    fn encode_fields(&self, out: &mut Vec<u8>) {
        rlp_list!(out;
            self.chain_id,
            self.nonce,
            self.from,
            self.gas_fee_cap,
            self.gas,
            OptionalAddress(self.to),
            self.value,
            self.data,
            self.ticket_id,
            self.refund_to,
            self.max_refund,
            self.submission_fee_refund,
        );
    }

    pub fn hash(&self) -> B256 {
        ArbTransaction::hash_typed(RETRY_TX_TYPE, |out| self.encode_fields(out))
    }
}

/// Every transaction kind that can appear in an L2 block.
#[derive(Debug, Clone, PartialEq, Eq, From)]
pub enum ArbTransaction {
    Deposit(DepositTx),
    Internal(InternalTx),
    Unsigned(UnsignedTx),
    Contract(ContractTx),
    SubmitRetryable(SubmitRetryableTx),
    Retry(RetryTx),
    Signed(SignedTx),
}

impl ArbTransaction {
    fn hash_typed(tx_type: u8, encode_fields: impl FnOnce(&mut Vec<u8>)) -> B256 {
        let mut out = vec![tx_type];
        encode_fields(&mut out);
        keccak256(out)
    }

    pub fn tx_type(&self) -> u8 {
        match self {
            Self::Deposit(_) => DEPOSIT_TX_TYPE,
            Self::Internal(_) => INTERNAL_TX_TYPE,
            Self::Unsigned(_) => UNSIGNED_TX_TYPE,
            Self::Contract(_) => CONTRACT_TX_TYPE,
            Self::SubmitRetryable(_) => SUBMIT_RETRYABLE_TX_TYPE,
            Self::Retry(_) => RETRY_TX_TYPE,
            Self::Signed(tx) => tx.tx_type,
        }
    }

    /// EIP-2718 envelope: the type byte followed by the RLP fields.
    pub fn encoded(&self) -> Bytes {
        let mut out = Vec::new();
        match self {
            Self::Signed(tx) => return tx.encoded.clone(),
            Self::Deposit(tx) => {
                out.push(DEPOSIT_TX_TYPE);
                tx.encode_fields(&mut out);
            }
            Self::Internal(tx) => {
                out.push(INTERNAL_TX_TYPE);
                tx.encode_fields(&mut out);
            }
            Self::Unsigned(tx) => {
                out.push(UNSIGNED_TX_TYPE);
                tx.encode_fields(&mut out);
            }
            Self::Contract(tx) => {
                out.push(CONTRACT_TX_TYPE);
                tx.encode_fields(&mut out);
            }
            Self::SubmitRetryable(tx) => {
                out.push(SUBMIT_RETRYABLE_TX_TYPE);
                tx.encode_fields(&mut out);
            }
            Self::Retry(tx) => {
                out.push(RETRY_TX_TYPE);
                tx.encode_fields(&mut out);
            }
        }
        out.into()
    }

    pub fn hash(&self) -> B256 {
        match self {
            Self::Signed(tx) => tx.hash,
            _ => keccak256(self.encoded()),
        }
    }

    /// The account the transaction executes as. Internal transactions act as ArbOS.
    pub fn sender(&self) -> Address {
        match self {
            Self::Deposit(tx) => tx.from,
            Self::Internal(_) => crate::addresses::ARBOS_ADDRESS,
            Self::Unsigned(tx) => tx.from,
            Self::Contract(tx) => tx.from,
            Self::SubmitRetryable(tx) => tx.from,
            Self::Retry(tx) => tx.from,
            Self::Signed(tx) => tx.from,
        }
    }

    pub fn to(&self) -> Option<Address> {
        match self {
            Self::Deposit(tx) => Some(tx.to),
            Self::Internal(_) => Some(crate::addresses::ARBOS_ADDRESS),
            Self::Unsigned(tx) => tx.to,
            Self::Contract(tx) => tx.to,
            Self::SubmitRetryable(_) => Some(crate::addresses::ARB_RETRYABLE_TX_ADDRESS),
            Self::Retry(tx) => tx.to,
            Self::Signed(tx) => tx.to,
        }
    }

    pub fn value(&self) -> U256 {
        match self {
            Self::Deposit(tx) => tx.value,
            Self::Internal(_) => U256::ZERO,
            Self::Unsigned(tx) => tx.value,
            Self::Contract(tx) => tx.value,
            Self::SubmitRetryable(tx) => tx.retry_value,
            Self::Retry(tx) => tx.value,
            Self::Signed(tx) => tx.value,
        }
    }

    pub fn input(&self) -> &Bytes {
        match self {
            Self::Deposit(_) => &EMPTY_BYTES,
            Self::Internal(tx) => &tx.data,
            Self::Unsigned(tx) => &tx.data,
            Self::Contract(tx) => &tx.data,
            Self::SubmitRetryable(tx) => &tx.retry_data,
            Self::Retry(tx) => &tx.data,
            Self::Signed(tx) => &tx.input,
        }
    }

    pub fn gas_limit(&self) -> u64 {
        match self {
            Self::Deposit(_) | Self::Internal(_) => 0,
            Self::Unsigned(tx) => tx.gas,
            Self::Contract(tx) => tx.gas,
            Self::SubmitRetryable(tx) => tx.gas,
            Self::Retry(tx) => tx.gas,
            Self::Signed(tx) => tx.gas_limit,
        }
    }

    pub fn gas_fee_cap(&self) -> U256 {
        match self {
            Self::Deposit(_) | Self::Internal(_) => U256::ZERO,
            Self::Unsigned(tx) => tx.gas_fee_cap,
            Self::Contract(tx) => tx.gas_fee_cap,
            Self::SubmitRetryable(tx) => tx.gas_fee_cap,
            Self::Retry(tx) => tx.gas_fee_cap,
            Self::Signed(tx) => tx.gas_fee_cap,
        }
    }

    /// Priority fee cap. Only signed transactions bid a tip.
    pub fn gas_tip_cap(&self) -> U256 {
        match self {
            Self::Signed(tx) => tx.gas_tip_cap,
            _ => U256::ZERO,
        }
    }

    /// The nonce the sender's account must match, for kinds that are nonce-checked.
    pub fn checked_nonce(&self) -> Option<u64> {
        match self {
            Self::Unsigned(tx) => Some(tx.nonce),
            Self::Signed(tx) => Some(tx.nonce),
            _ => None,
        }
    }

    /// Whether the transaction reached L2 through a batch and pays for its L1 calldata.
    pub fn pays_l1_cost(&self) -> bool {
        matches!(self, Self::Unsigned(_) | Self::Contract(_) | Self::Signed(_))
    }
}

static EMPTY_BYTES: Bytes = Bytes::new();
