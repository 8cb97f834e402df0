use thiserror::Error;

use crate::chain::Chain;

/// Errors returned by tollgate operations.
#[derive(Debug, Error)]
pub enum TollgateError {
    #[error("unknown chain: {0}")]
    UnknownChain(String),

    #[error("chain query error: {0}")]
    QueryError(String),
}

/// Why a payment proof was rejected.
///
/// Every variant is reported back to the caller as an invalid payment; none of
/// them is fatal to the node.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationError {
    #[error("unsupported chain: {0}")]
    UnsupportedChain(Chain),

    #[error("no ledger connection configured for {0}")]
    ConnectionUnavailable(Chain),

    #[error("transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("transaction failed on-chain: {0}")]
    TransactionFailed(String),

    #[error("no token transfer instruction found in transaction")]
    NoTransferInstruction,

    #[error("destination token account not found: {0}")]
    DestinationNotFound(String),

    #[error("could not resolve owner of token account {0}")]
    OwnerUnresolved(String),

    #[error("payment sent to wrong recipient: expected {expected}, got {actual}")]
    WrongRecipient { expected: String, actual: String },

    #[error("invalid transfer amount: {0}")]
    InvalidAmount(String),

    #[error("chain query failed: {0}")]
    Query(String),
}
