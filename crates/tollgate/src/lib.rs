//! On-ledger payment verification for metered APIs.
//!
//! A caller pays for an API call by sending an SPL token transfer to the
//! node's wallet and presenting the transaction signature as a *proof token*.
//! [`PaymentVerifier`] fetches the transaction, finds the token transfer,
//! checks that the destination account is owned by the expected recipient, and
//! converts the raw amount into a decimal [`PaymentClaim`].
//!
//! The reserved proof token [`FREE_CALL_SENTINEL`] (or an empty token) skips
//! verification and yields a zero-amount claim without touching the ledger.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tollgate::{Chain, PaymentVerifier, RpcLedger, TokenConfig};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let ledger = RpcLedger::new(reqwest::Client::new(), Chain::Devnet.default_rpc_url());
//! let verifier = PaymentVerifier::new(vec![Chain::Devnet], TokenConfig::default())
//!     .with_ledger(Chain::Devnet, Arc::new(ledger));
//!
//! let result = verifier
//!     .verify("5VERv8NMvzbJ...", Chain::Devnet, "RecipientWallet111")
//!     .await;
//! println!("valid={} amount={:?}", result.valid, result.amount_paid);
//! # }
//! ```

pub mod chain;
pub mod constants;
pub mod error;
pub mod ledger;
pub mod payment;
pub mod rpc;
pub mod verifier;

pub use chain::Chain;
pub use constants::*;
pub use error::{TollgateError, VerificationError};
pub use ledger::{InMemoryLedger, LedgerQuery, ParsedInstruction, TokenAccount, TransactionRecord};
pub use payment::{PaymentClaim, PaymentResult};
pub use rpc::RpcLedger;
pub use verifier::{is_free_call, PaymentVerifier};
