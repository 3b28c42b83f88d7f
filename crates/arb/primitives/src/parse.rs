//! Decoding of L1 message payloads into L2 transactions.

use crate::{
    abi::ArbosActs,
    message::{InboundMessage, MessageKind},
    transaction::{
        ArbTransaction, ContractTx, DepositTx, InternalTx, SignedTx, SubmitRetryableTx,
        UnsignedTx, DEPOSIT_TX_TYPE,
    },
};
use alloy_consensus::{transaction::SignerRecoverable, Transaction, TxEnvelope};
use alloy_eips::{
    eip2718::{Decodable2718, Eip2718Error},
    Typed2718,
};
use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_sol_types::SolCall;
use tracing::debug;

/// Largest payload accepted for a single L2 message.
pub const MAX_L2_MESSAGE_SIZE: u64 = 256 * 1024;

/// Deepest nesting of L2 batches.
pub const MAX_BATCH_DEPTH: u32 = 16;

const L2_KIND_UNSIGNED_USER_TX: u8 = 0;
const L2_KIND_CONTRACT_TX: u8 = 1;
const L2_KIND_NON_MUTATING_CALL: u8 = 2;
const L2_KIND_BATCH: u8 = 3;
const L2_KIND_SIGNED_TX: u8 = 4;
const L2_KIND_HEARTBEAT: u8 = 6;
const L2_KIND_SIGNED_COMPRESSED_TX: u8 = 7;

const EIP4844_TX_TYPE: u8 = 3;

#[derive(Debug, thiserror::Error)]
pub enum TxDecodeError {
    #[error(transparent)]
    Eip2718(#[from] Eip2718Error),
    #[error("transaction type {0:#x} is not supported")]
    UnsupportedType(u8),
    #[error("{0} trailing bytes after signed transaction")]
    TrailingBytes(usize),
    #[error("failed to recover sender: {0}")]
    Recovery(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("unexpected end of message payload")]
    UnexpectedEof,
    #[error("initialize message must be handled at genesis")]
    UnexpectedInitialize,
    #[error("invalid message")]
    InvalidMessage,
    #[error("batch for gas estimation messages are not supported")]
    BatchForGasEstimation,
    #[error("{0} message requires an L1 request id")]
    MissingRequestId(&'static str),
    #[error("L2FundedByL1 message has no data")]
    EmptyFundedByL1,
    #[error("L2 message kind {0} is not supported")]
    UnsupportedL2Kind(u8),
    #[error("L2 message batches have a max depth of {MAX_BATCH_DEPTH}")]
    BatchTooDeep,
    #[error("{0} does not fit in 64 bits")]
    Overflow(&'static str),
    #[error("retryable data is too large")]
    RetryableDataTooLarge,
    #[error("batch posting report has no batch gas cost")]
    MissingBatchGasCost,
    #[error(transparent)]
    SignedTx(#[from] TxDecodeError),
}

/// Decodes the transactions carried by `message`.
///
/// Message kinds that carry no transactions yield an empty list.
pub fn parse_l2_transactions(
    message: &InboundMessage,
    chain_id: u64,
) -> Result<Vec<ArbTransaction>, ParseError> {
    let header = &message.header;
    match header.kind {
        MessageKind::L2Message => parse_l2_message(
            &mut Reader::new(&message.payload),
            header.sender,
            header.request_id,
            chain_id,
            0,
        ),
        MessageKind::EndOfBlock | MessageKind::RollupEvent => Ok(Vec::new()),
        MessageKind::L2FundedByL1 => {
            let (&kind, rest) =
                message.payload.split_first().ok_or(ParseError::EmptyFundedByL1)?;
            let request_id =
                header.request_id.ok_or(ParseError::MissingRequestId("L2FundedByL1"))?;
            let deposit_request_id = sub_request_id(request_id, 0);
            let unsigned_request_id = sub_request_id(request_id, 1);
            let tx = parse_unsigned_tx(
                &mut Reader::new(rest),
                header.sender,
                Some(unsigned_request_id),
                chain_id,
                kind,
            )?;
            let deposit = DepositTx {
                chain_id,
                l1_request_id: deposit_request_id,
                from: Address::ZERO,
                to: header.sender,
                value: tx.value(),
            };
            Ok(vec![deposit.into(), tx])
        }
        MessageKind::SubmitRetryable => {
            parse_submit_retryable(message, chain_id).map(|tx| vec![tx.into()])
        }
        MessageKind::EthDeposit => {
            let mut reader = Reader::new(&message.payload);
            let to = reader.address()?;
            let value = reader.u256()?;
            let request_id = header.request_id.ok_or(ParseError::MissingRequestId("deposit"))?;
            Ok(vec![DepositTx {
                chain_id,
                l1_request_id: request_id,
                from: header.sender,
                to,
                value,
            }
            .into()])
        }
        MessageKind::BatchPostingReport => {
            parse_batch_posting_report(message, chain_id).map(|tx| vec![tx.into()])
        }
        MessageKind::BatchForGasEstimation => Err(ParseError::BatchForGasEstimation),
        MessageKind::Initialize => Err(ParseError::UnexpectedInitialize),
        MessageKind::Invalid => Err(ParseError::InvalidMessage),
    }
}

fn sub_request_id(request_id: B256, index: u64) -> B256 {
    let mut preimage = [0u8; 64];
    preimage[..32].copy_from_slice(request_id.as_slice());
    preimage[32..].copy_from_slice(&U256::from(index).to_be_bytes::<32>());
    keccak256(preimage)
}

fn parse_l2_message(
    reader: &mut Reader<'_>,
    poster: Address,
    request_id: Option<B256>,
    chain_id: u64,
    depth: u32,
) -> Result<Vec<ArbTransaction>, ParseError> {
    let kind = reader.byte()?;
    match kind {
        L2_KIND_UNSIGNED_USER_TX | L2_KIND_CONTRACT_TX => {
            parse_unsigned_tx(reader, poster, request_id, chain_id, kind).map(|tx| vec![tx])
        }
        L2_KIND_BATCH => {
            if depth >= MAX_BATCH_DEPTH {
                return Err(ParseError::BatchTooDeep);
            }
            let mut transactions = Vec::new();
            let mut index = 0u64;
            // A segment that fails to frame ends the batch.
            while let Some(segment) = reader.bytestring(MAX_L2_MESSAGE_SIZE) {
                let nested_request_id = request_id.map(|id| sub_request_id(id, index));
                transactions.extend(parse_l2_message(
                    &mut Reader::new(segment),
                    poster,
                    nested_request_id,
                    chain_id,
                    depth + 1,
                )?);
                index += 1;
            }
            Ok(transactions)
        }
        L2_KIND_SIGNED_TX => Ok(vec![decode_signed_tx(reader.rest())?.into()]),
        L2_KIND_HEARTBEAT => {
            debug!(target: "arb::engine", "ignoring heartbeat message");
            Ok(Vec::new())
        }
        L2_KIND_NON_MUTATING_CALL | L2_KIND_SIGNED_COMPRESSED_TX => {
            Err(ParseError::UnsupportedL2Kind(kind))
        }
        other => Err(ParseError::UnsupportedL2Kind(other)),
    }
}

fn parse_unsigned_tx(
    reader: &mut Reader<'_>,
    poster: Address,
    request_id: Option<B256>,
    chain_id: u64,
    kind: u8,
) -> Result<ArbTransaction, ParseError> {
    let gas = reader.u64_word("gas limit")?;
    let gas_fee_cap = reader.u256()?;
    let nonce = if kind == L2_KIND_UNSIGNED_USER_TX { reader.u64_word("nonce")? } else { 0 };
    let to = Some(reader.address_word()?).filter(|to| !to.is_zero());
    let value = reader.u256()?;
    let data = Bytes::copy_from_slice(reader.rest());

    match kind {
        L2_KIND_UNSIGNED_USER_TX => Ok(UnsignedTx {
            chain_id,
            from: poster,
            nonce,
            gas_fee_cap,
            gas,
            to,
            value,
            data,
        }
        .into()),
        L2_KIND_CONTRACT_TX => {
            let request_id = request_id.ok_or(ParseError::MissingRequestId("contract"))?;
            Ok(ContractTx { chain_id, request_id, from: poster, gas_fee_cap, gas, to, value, data }
                .into())
        }
        other => Err(ParseError::UnsupportedL2Kind(other)),
    }
}

fn parse_submit_retryable(
    message: &InboundMessage,
    chain_id: u64,
) -> Result<SubmitRetryableTx, ParseError> {
    let header = &message.header;
    let mut reader = Reader::new(&message.payload);
    let retry_to = reader.address_word()?;
    let retry_value = reader.u256()?;
    let deposit_value = reader.u256()?;
    let max_submission_fee = reader.u256()?;
    let fee_refund_addr = reader.address_word()?;
    let beneficiary = reader.address_word()?;
    let gas = u64::try_from(reader.u256()?).unwrap_or(u64::MAX);
    let gas_fee_cap = reader.u256()?;
    let data_length = reader.u64_word("retryable data length")?;
    if data_length > MAX_L2_MESSAGE_SIZE {
        return Err(ParseError::RetryableDataTooLarge);
    }
    let retry_data = Bytes::copy_from_slice(reader.take(data_length as usize)?);
    let request_id = header.request_id.ok_or(ParseError::MissingRequestId("submit retryable"))?;

    Ok(SubmitRetryableTx {
        chain_id,
        request_id,
        from: header.sender,
        l1_base_fee: header.l1_base_fee,
        deposit_value,
        gas_fee_cap,
        gas,
        retry_to: Some(retry_to).filter(|to| !to.is_zero()),
        retry_value,
        beneficiary,
        max_submission_fee,
        fee_refund_addr,
        retry_data,
    })
}

fn parse_batch_posting_report(
    message: &InboundMessage,
    chain_id: u64,
) -> Result<InternalTx, ParseError> {
    let mut reader = Reader::new(&message.payload);
    let batch_timestamp = reader.u256()?;
    let batch_poster = reader.address()?;
    let _data_hash = reader.word()?;
    let batch_number = reader.u64_word("batch number")?;
    let l1_base_fee = reader.u256()?;
    let extra_gas = reader.u64().unwrap_or_default();

    let batch_gas_cost = message.batch_gas_cost.ok_or(ParseError::MissingBatchGasCost)?;
    let call = ArbosActs::batchPostingReportCall {
        batchTimestamp: batch_timestamp,
        batchPosterAddress: batch_poster,
        batchNumber: batch_number,
        batchDataGas: batch_gas_cost.saturating_add(extra_gas),
        l1BaseFeeWei: l1_base_fee,
    };
    Ok(InternalTx { chain_id, data: call.abi_encode().into() })
}

/// Decodes an EIP-2718 signed transaction and recovers its sender.
pub fn decode_signed_tx(raw: &[u8]) -> Result<SignedTx, TxDecodeError> {
    let mut buf = raw;
    let envelope = TxEnvelope::decode_2718(&mut buf)?;
    if !buf.is_empty() {
        return Err(TxDecodeError::TrailingBytes(buf.len()));
    }
    let tx_type = envelope.ty();
    if tx_type == EIP4844_TX_TYPE || tx_type >= DEPOSIT_TX_TYPE {
        return Err(TxDecodeError::UnsupportedType(tx_type));
    }
    let from =
        envelope.recover_signer().map_err(|err| TxDecodeError::Recovery(err.to_string()))?;
    let (access_list_addresses, access_list_storage_keys) = envelope
        .access_list()
        .map(|list| {
            (
                list.0.len() as u64,
                list.0.iter().map(|item| item.storage_keys.len() as u64).sum(),
            )
        })
        .unwrap_or_default();
    let gas_fee_cap = envelope.max_fee_per_gas();

    Ok(SignedTx {
        hash: keccak256(raw),
        tx_type,
        from,
        nonce: envelope.nonce(),
        gas_limit: envelope.gas_limit(),
        gas_fee_cap: U256::from(gas_fee_cap),
        gas_tip_cap: U256::from(envelope.max_priority_fee_per_gas().unwrap_or(gas_fee_cap)),
        to: envelope.to(),
        value: envelope.value(),
        input: envelope.input().clone(),
        access_list_addresses,
        access_list_storage_keys,
        encoded: Bytes::copy_from_slice(raw),
    })
}

/// Cursor over a message payload.
struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], ParseError> {
        if self.data.len() < len {
            return Err(ParseError::UnexpectedEof);
        }
        let (head, tail) = self.data.split_at(len);
        self.data = tail;
        Ok(head)
    }

    fn byte(&mut self) -> Result<u8, ParseError> {
        Ok(self.take(1)?[0])
    }

    fn word(&mut self) -> Result<B256, ParseError> {
        self.take(32).map(B256::from_slice)
    }

    fn u256(&mut self) -> Result<U256, ParseError> {
        self.take(32).map(U256::from_be_slice)
    }

    fn u64(&mut self) -> Result<u64, ParseError> {
        let mut word = [0u8; 8];
        word.copy_from_slice(self.take(8)?);
        Ok(u64::from_be_bytes(word))
    }

    fn u64_word(&mut self, field: &'static str) -> Result<u64, ParseError> {
        u64::try_from(self.u256()?).map_err(|_| ParseError::Overflow(field))
    }

    fn address(&mut self) -> Result<Address, ParseError> {
        self.take(20).map(Address::from_slice)
    }

    fn address_word(&mut self) -> Result<Address, ParseError> {
        self.word().map(Address::from_word)
    }

    /// A big-endian u64 length followed by that many bytes.
    fn bytestring(&mut self, max_len: u64) -> Option<&'a [u8]> {
        let mut ahead = Reader::new(self.data);
        let len = ahead.u64().ok().filter(|len| *len <= max_len)?;
        let bytes = ahead.take(len as usize).ok()?;
        self.data = ahead.data;
        Some(bytes)
    }

    fn rest(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::L1IncomingMessageHeader;
    use alloy_consensus::{SignableTransaction, TxEip1559};
    use alloy_eips::eip2718::Encodable2718;
    use alloy_primitives::{address, b256, TxKind};
    use alloy_signer::SignerSync;
    use alloy_signer_local::PrivateKeySigner;

    const CHAIN_ID: u64 = 412346;
    const POSTER: Address = address!("0x0000000000000000000000000000000000000abc");

    fn message(kind: MessageKind, payload: Vec<u8>) -> InboundMessage {
        InboundMessage {
            header: L1IncomingMessageHeader {
                kind,
                sender: POSTER,
                block_number: 10,
                timestamp: 1_700_000_000,
                request_id: Some(B256::with_last_byte(9)),
                l1_base_fee: U256::from(30_000_000_000u64),
            },
            payload: payload.into(),
            batch_gas_cost: None,
            delayed_messages_read: 1,
        }
    }

    fn word(value: u64) -> [u8; 32] {
        U256::from(value).to_be_bytes()
    }

    fn unsigned_payload(kind: u8, nonce: Option<u64>, to: Address, data: &[u8]) -> Vec<u8> {
        let mut payload = vec![kind];
        payload.extend_from_slice(&word(21_000));
        payload.extend_from_slice(&word(1_000_000_000));
        if let Some(nonce) = nonce {
            payload.extend_from_slice(&word(nonce));
        }
        payload.extend_from_slice(to.into_word().as_slice());
        payload.extend_from_slice(&word(5));
        payload.extend_from_slice(data);
        payload
    }

    #[test]
    fn eth_deposit() {
        let to = address!("0x00000000000000000000000000000000000000dd");
        let mut payload = to.to_vec();
        payload.extend_from_slice(&word(1_000));

        let txs = parse_l2_transactions(&message(MessageKind::EthDeposit, payload), CHAIN_ID)
            .unwrap();
        assert_eq!(
            txs,
            vec![ArbTransaction::Deposit(DepositTx {
                chain_id: CHAIN_ID,
                l1_request_id: B256::with_last_byte(9),
                from: POSTER,
                to,
                value: U256::from(1_000),
            })]
        );
    }

    #[test]
    fn unsigned_user_tx() {
        let to = address!("0x00000000000000000000000000000000000000dd");
        let payload = unsigned_payload(L2_KIND_UNSIGNED_USER_TX, Some(3), to, &[1, 2, 3]);

        let txs =
            parse_l2_transactions(&message(MessageKind::L2Message, payload), CHAIN_ID).unwrap();
        let ArbTransaction::Unsigned(tx) = &txs[0] else { panic!("expected unsigned tx") };
        assert_eq!(tx.nonce, 3);
        assert_eq!(tx.gas, 21_000);
        assert_eq!(tx.to, Some(to));
        assert_eq!(tx.value, U256::from(5));
        assert_eq!(tx.data, Bytes::from_static(&[1, 2, 3]));
        assert_eq!(tx.from, POSTER);
    }

    #[test]
    fn zero_target_means_creation() {
        let payload = unsigned_payload(L2_KIND_UNSIGNED_USER_TX, Some(0), Address::ZERO, &[]);
        let txs =
            parse_l2_transactions(&message(MessageKind::L2Message, payload), CHAIN_ID).unwrap();
        assert_eq!(txs[0].to(), None);
    }

    #[test]
    fn batch_derives_request_ids_per_segment() {
        let to = address!("0x00000000000000000000000000000000000000dd");
        let mut payload = vec![L2_KIND_BATCH];
        for _ in 0..2 {
            let segment = unsigned_payload(L2_KIND_CONTRACT_TX, None, to, &[]);
            payload.extend_from_slice(&(segment.len() as u64).to_be_bytes());
            payload.extend_from_slice(&segment);
        }
        // trailing garbage that does not frame ends the batch
        payload.extend_from_slice(&[0xff; 3]);

        let txs =
            parse_l2_transactions(&message(MessageKind::L2Message, payload), CHAIN_ID).unwrap();
        assert_eq!(txs.len(), 2);
        let request_ids: Vec<_> = txs
            .iter()
            .map(|tx| match tx {
                ArbTransaction::Contract(tx) => tx.request_id,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(request_ids[0], sub_request_id(B256::with_last_byte(9), 0));
        assert_eq!(request_ids[1], sub_request_id(B256::with_last_byte(9), 1));
    }

    #[test]
    fn contract_tx_requires_request_id() {
        let payload = unsigned_payload(L2_KIND_CONTRACT_TX, None, Address::ZERO, &[]);
        let mut message = message(MessageKind::L2Message, payload);
        message.header.request_id = None;
        assert!(matches!(
            parse_l2_transactions(&message, CHAIN_ID),
            Err(ParseError::MissingRequestId("contract"))
        ));
    }

    #[test]
    fn funded_by_l1_yields_deposit_then_tx() {
        let to = address!("0x00000000000000000000000000000000000000dd");
        let payload = unsigned_payload(L2_KIND_UNSIGNED_USER_TX, Some(0), to, &[]);
        let txs = parse_l2_transactions(&message(MessageKind::L2FundedByL1, payload), CHAIN_ID)
            .unwrap();
        assert_eq!(txs.len(), 2);
        let ArbTransaction::Deposit(deposit) = &txs[0] else { panic!("expected deposit") };
        assert_eq!(deposit.to, POSTER);
        assert_eq!(deposit.value, U256::from(5));
        assert_eq!(deposit.l1_request_id, sub_request_id(B256::with_last_byte(9), 0));
    }

    #[test]
    fn submit_retryable() {
        let retry_to = address!("0x00000000000000000000000000000000000000dd");
        let refund = address!("0x00000000000000000000000000000000000000ee");
        let beneficiary = address!("0x00000000000000000000000000000000000000ff");
        let mut payload = Vec::new();
        payload.extend_from_slice(retry_to.into_word().as_slice());
        payload.extend_from_slice(&word(7));
        payload.extend_from_slice(&word(1_000_000));
        payload.extend_from_slice(&word(500));
        payload.extend_from_slice(refund.into_word().as_slice());
        payload.extend_from_slice(beneficiary.into_word().as_slice());
        payload.extend_from_slice(&U256::MAX.to_be_bytes::<32>());
        payload.extend_from_slice(&word(100_000_000));
        payload.extend_from_slice(&word(2));
        payload.extend_from_slice(&[0xaa, 0xbb]);

        let txs =
            parse_l2_transactions(&message(MessageKind::SubmitRetryable, payload), CHAIN_ID)
                .unwrap();
        let ArbTransaction::SubmitRetryable(tx) = &txs[0] else { panic!("expected submission") };
        assert_eq!(tx.retry_to, Some(retry_to));
        assert_eq!(tx.retry_value, U256::from(7));
        assert_eq!(tx.deposit_value, U256::from(1_000_000));
        assert_eq!(tx.max_submission_fee, U256::from(500));
        assert_eq!(tx.fee_refund_addr, refund);
        assert_eq!(tx.beneficiary, beneficiary);
        assert_eq!(tx.gas, u64::MAX);
        assert_eq!(tx.retry_data, Bytes::from_static(&[0xaa, 0xbb]));
        assert_eq!(tx.l1_base_fee, U256::from(30_000_000_000u64));
    }

    #[test]
    fn batch_posting_report_becomes_internal_call() {
        let batch_poster = address!("0xe2148eE53c0755215Df69b2616E552154EdC584f");
        let mut payload = Vec::new();
        payload.extend_from_slice(&word(1_700_000_000));
        payload.extend_from_slice(batch_poster.as_slice());
        payload.extend_from_slice(B256::ZERO.as_slice());
        payload.extend_from_slice(&word(42));
        payload.extend_from_slice(&word(30_000_000_000));
        payload.extend_from_slice(&1_000u64.to_be_bytes());

        let mut message = message(MessageKind::BatchPostingReport, payload);
        assert!(matches!(
            parse_l2_transactions(&message, CHAIN_ID),
            Err(ParseError::MissingBatchGasCost)
        ));

        message.batch_gas_cost = Some(50_000);
        let txs = parse_l2_transactions(&message, CHAIN_ID).unwrap();
        let ArbTransaction::Internal(tx) = &txs[0] else { panic!("expected internal tx") };
        let call = ArbosActs::batchPostingReportCall::abi_decode(&tx.data).unwrap();
        assert_eq!(call.batchPosterAddress, batch_poster);
        assert_eq!(call.batchNumber, 42);
        assert_eq!(call.batchDataGas, 51_000);
        assert_eq!(call.batchTimestamp, U256::from(1_700_000_000u64));
    }

    #[test]
    fn signed_tx_recovers_sender() {
        let signer = PrivateKeySigner::from_bytes(&b256!(
            "0x0000000000000000000000000000000000000000000000000000000000000001"
        ))
        .unwrap();
        let tx = TxEip1559 {
            chain_id: CHAIN_ID,
            nonce: 3,
            gas_limit: 21_000,
            max_fee_per_gas: 200_000_000,
            max_priority_fee_per_gas: 1,
            to: TxKind::Call(address!("0x00000000000000000000000000000000000000dd")),
            value: U256::from(7),
            access_list: Default::default(),
            input: Bytes::new(),
        };
        let signature = signer.sign_hash_sync(&tx.signature_hash()).unwrap();
        let raw = TxEnvelope::from(tx.into_signed(signature)).encoded_2718();

        let mut payload = vec![L2_KIND_SIGNED_TX];
        payload.extend_from_slice(&raw);
        let txs =
            parse_l2_transactions(&message(MessageKind::L2Message, payload), CHAIN_ID).unwrap();
        let ArbTransaction::Signed(signed) = &txs[0] else { panic!("expected signed tx") };
        assert_eq!(signed.from, signer.address());
        assert_eq!(signed.nonce, 3);
        assert_eq!(signed.gas_tip_cap, U256::from(1));
        assert_eq!(signed.hash, keccak256(&raw));
        assert_eq!(txs[0].checked_nonce(), Some(3));
    }

    #[test]
    fn kinds_without_transactions() {
        for kind in [MessageKind::EndOfBlock, MessageKind::RollupEvent] {
            assert!(parse_l2_transactions(&message(kind, vec![]), CHAIN_ID).unwrap().is_empty());
        }
        assert!(matches!(
            parse_l2_transactions(&message(MessageKind::Initialize, vec![]), CHAIN_ID),
            Err(ParseError::UnexpectedInitialize)
        ));
        assert!(matches!(
            parse_l2_transactions(&message(MessageKind::Invalid, vec![]), CHAIN_ID),
            Err(ParseError::InvalidMessage)
        ));
    }

    #[test]
    fn truncated_payload_is_an_error() {
        assert!(matches!(
            parse_l2_transactions(&message(MessageKind::EthDeposit, vec![0; 10]), CHAIN_ID),
            Err(ParseError::UnexpectedEof)
        ));
    }
}
