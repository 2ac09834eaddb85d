//! Derivation of L2 deposit transaction identities from `TransactionDeposited`
//! logs.
//!
//! Follows the OP Stack user-deposit derivation: the source hash binds the
//! deposit to its L1 origin (block hash + log index), and the L2 transaction
//! hash is the keccak of the type-prefixed RLP encoding of the deposit body.

use crate::{abi::TransactionDeposited, types::DepositRecord};
use alloy::rpc::types::Log;
use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_rlp::{Encodable, RlpEncodable};
use alloy_sol_types::{SolEvent, SolValue};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;

/// Minimum length of the version-0 opaque payload: mint, value, gas limit and
/// the creation flag; everything past that is calldata.
const MIN_OPAQUE_LEN: usize = 73;

#[derive(Debug, Error)]
pub enum DepositError {
    #[error("invalid opaque data length: expected at least 73 bytes, got {0}")]
    InvalidOpaqueDataLength(usize),
    #[error("unsupported deposit version: {0}")]
    UnsupportedVersion(U256),
    #[error("log is missing the {0} field")]
    MissingField(&'static str),
    #[error("failed to decode log: {0}")]
    Decode(#[from] alloy_sol_types::Error),
}

// keccak256(bytes32(uint256(0)), keccak256(l1BlockHash, bytes32(uint256(l1LogIndex)))).
pub fn source_hash(l1_block_hash: B256, l1_log_index: u64) -> B256 {
    let inner_encoded = (l1_block_hash, B256::from(U256::from(l1_log_index))).abi_encode();
    let inner_hash = keccak256(&inner_encoded);
    let outer_encoded = (B256::ZERO, inner_hash).abi_encode();
    keccak256(&outer_encoded)
}

/// The packed fields carried in a version-0 `opaqueData` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpaqueDeposit {
    pub mint: U256,
    pub value: U256,
    pub gas_limit: u64,
    pub is_creation: bool,
    pub data: Bytes,
}

impl TryFrom<&[u8]> for OpaqueDeposit {
    type Error = DepositError;

    // opaqueData layout (version 0):
    // [0..32)   mint (uint256)
    // [32..64)  value (uint256)
    // [64..72)  gas_limit (uint64)
    // [72]      is_creation (bool)
    // [73..)    data (bytes)
    fn try_from(encoded: &[u8]) -> Result<Self, DepositError> {
        if encoded.len() < MIN_OPAQUE_LEN {
            return Err(DepositError::InvalidOpaqueDataLength(encoded.len()));
        }

        let mint = U256::from_be_slice(&encoded[0..32]);
        let value = U256::from_be_slice(&encoded[32..64]);
        // SAFETY: slice is exactly 8 bytes
        let gas_limit = u64::from_be_bytes(encoded[64..72].try_into().unwrap());
        let is_creation = encoded[72] != 0;
        let data = if encoded.len() > MIN_OPAQUE_LEN {
            Bytes::copy_from_slice(&encoded[MIN_OPAQUE_LEN..])
        } else {
            Bytes::new()
        };

        Ok(Self {
            mint,
            value,
            gas_limit,
            is_creation,
            data,
        })
    }
}

/// Body of a derived L2 deposit transaction, in RLP field order.
///
/// The `to` item always carries the 20-byte address from the event topic and
/// `is_system_tx` is fixed to `false`; the opaque payload's creation flag is
/// decoded but does not participate in hashing.
#[derive(Debug, Clone, PartialEq, Eq, RlpEncodable)]
pub struct DepositedTransaction {
    pub source_hash: B256,
    pub from: Address,
    pub to: Address,
    pub mint: U256,
    pub value: U256,
    pub gas_limit: u64,
    pub is_system_tx: bool,
    pub data: Bytes,
}

impl DepositedTransaction {
    /// `transaction_type || rlp([source_hash, from, to, mint, value, gas, is_system_tx, data])`
    pub fn encoded(&self, transaction_type: u8) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.length() + 1);
        out.push(transaction_type);
        self.encode(&mut out);
        out
    }

    /// The derived L2 transaction hash.
    pub fn tx_hash(&self, transaction_type: u8) -> B256 {
        keccak256(self.encoded(transaction_type))
    }
}

/// Derives a persistable deposit record from one `TransactionDeposited` log.
///
/// Pure with respect to the log contents: the same `(block_hash, log_index)`
/// pair always yields the same source and L2 transaction hashes.
pub fn record_from_log(
    log: &Log,
    transaction_type: u8,
    timestamps: &HashMap<u64, DateTime<Utc>>,
) -> Result<DepositRecord, DepositError> {
    let block_hash = log
        .block_hash
        .ok_or(DepositError::MissingField("block_hash"))?;
    let block_number = log
        .block_number
        .ok_or(DepositError::MissingField("block_number"))?;
    let log_index = log
        .log_index
        .ok_or(DepositError::MissingField("log_index"))?;
    let transaction_hash = log
        .transaction_hash
        .ok_or(DepositError::MissingField("transaction_hash"))?;

    let event =
        TransactionDeposited::decode_raw_log(log.inner.topics().iter().copied(), &log.inner.data.data)?;
    if event.version != U256::ZERO {
        return Err(DepositError::UnsupportedVersion(event.version));
    }
    let opaque = OpaqueDeposit::try_from(event.opaqueData.as_ref())?;

    let transaction = DepositedTransaction {
        source_hash: source_hash(block_hash, log_index),
        from: event.from,
        to: event.to,
        mint: opaque.mint,
        value: opaque.value,
        gas_limit: opaque.gas_limit,
        is_system_tx: false,
        data: opaque.data,
    };

    Ok(DepositRecord {
        l1_block_number: block_number,
        l1_block_timestamp: timestamps.get(&block_number).copied(),
        l1_transaction_hash: transaction_hash,
        l1_transaction_origin: event.from,
        l2_transaction_hash: transaction.tx_hash(transaction_type),
    })
}
