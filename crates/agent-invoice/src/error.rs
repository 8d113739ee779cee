use alloy::primitives::{B256, U256};
use thiserror::Error;

/// Errors returned by invoice, settlement, and escrow operations.
///
/// Precondition variants carry the identifiers and current-vs-required
/// values so callers can report the violated precondition without a second
/// read. [`InvoiceError::InvariantViolation`] indicates a protocol bug and
/// must be treated as fatal for the affected invoice, never retried.
#[derive(Debug, Error)]
pub enum InvoiceError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invoice {0} not found")]
    NotFound(B256),

    #[error("invoice {0} is already paid")]
    AlreadyPaid(B256),

    #[error("invoice {id} is not payable: status is {status}")]
    InvoiceNotPending { id: B256, status: &'static str },

    #[error("insufficient balance: have {available}, need {required}")]
    InsufficientBalance { available: U256, required: U256 },

    #[error("spending limit exceeded: limit {limit}, spent {spent}, requested {requested}")]
    SpendingLimitExceeded {
        limit: U256,
        spent: U256,
        requested: U256,
    },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("burn intent expired: max block height {max_block_height}, current {current}")]
    Expired {
        max_block_height: u64,
        current: u64,
    },

    #[error("burn intent nonce already consumed")]
    AlreadyConsumed,

    #[error("bad attestation: {0}")]
    BadAttestation(String),

    #[error("source chain {0} not supported by the gateway")]
    UnsupportedChain(u64),

    #[error("signature error: {0}")]
    SignatureError(String),

    #[error("chain error: {0}")]
    ChainError(String),

    #[error("transaction {0} did not confirm within the polling window")]
    ConfirmationTimeout(String),

    #[error("transaction {handle} failed: {reason}")]
    TransactionFailed { handle: String, reason: String },

    #[error("http error: {0}")]
    HttpError(String),

    #[error("config error: {0}")]
    ConfigError(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
