//! Read-only ledger access used by payment verification.
//!
//! [`LedgerQuery`] is the only capability the verifier needs from a chain:
//! fetch a transaction by signature and resolve a token account. The node
//! ships [`crate::rpc::RpcLedger`] for real networks and [`InMemoryLedger`]
//! for tests and local development.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::TollgateError;

/// A confirmed transaction as seen by the verifier.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRecord {
    pub signature: String,
    /// `true` when the ledger recorded an execution error for the transaction.
    pub failed: bool,
    pub instructions: Vec<ParsedInstruction>,
    /// Instructions executed via CPI, flattened in execution order.
    pub inner_instructions: Vec<ParsedInstruction>,
}

impl TransactionRecord {
    /// Top-level instructions first, then inner instructions.
    pub fn all_instructions(&self) -> impl Iterator<Item = &ParsedInstruction> {
        self.instructions.iter().chain(self.inner_instructions.iter())
    }
}

/// One instruction in decoded form.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedInstruction {
    pub program_id: String,
    /// Decoded instruction type, e.g. `transfer` or `transferChecked`.
    pub kind: Option<String>,
    /// Decoded instruction arguments. Shape depends on `kind`.
    pub info: Value,
}

impl ParsedInstruction {
    /// Build a `transfer` instruction.
    pub fn transfer(
        program_id: &str,
        source: &str,
        destination: &str,
        authority: &str,
        amount: &str,
    ) -> Self {
        Self {
            program_id: program_id.to_string(),
            kind: Some("transfer".to_string()),
            info: json!({
                "source": source,
                "destination": destination,
                "authority": authority,
                "amount": amount,
            }),
        }
    }

    /// Build a `transferChecked` instruction.
    pub fn transfer_checked(
        program_id: &str,
        source: &str,
        destination: &str,
        authority: &str,
        amount: &str,
        decimals: u32,
    ) -> Self {
        Self {
            program_id: program_id.to_string(),
            kind: Some("transferChecked".to_string()),
            info: json!({
                "source": source,
                "destination": destination,
                "authority": authority,
                "tokenAmount": { "amount": amount, "decimals": decimals },
            }),
        }
    }

    pub fn is_token_transfer(&self, token_program_id: &str) -> bool {
        self.program_id == token_program_id
            && matches!(self.kind.as_deref(), Some("transfer") | Some("transferChecked"))
    }

    pub fn destination(&self) -> Option<&str> {
        self.info.get("destination").and_then(Value::as_str)
    }

    /// Signer of the transfer, falling back to the source account.
    pub fn sender(&self) -> Option<&str> {
        self.info
            .get("authority")
            .or_else(|| self.info.get("source"))
            .and_then(Value::as_str)
    }

    /// Raw amount as the ledger reported it, before validation.
    pub fn raw_amount(&self) -> Option<&Value> {
        self.info
            .get("amount")
            .or_else(|| self.info.get("tokenAmount").and_then(|t| t.get("amount")))
    }
}

/// A token account and the wallet that owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenAccount {
    pub address: String,
    /// `None` when the account exists but carries no decoded owner.
    pub owner: Option<String>,
}

/// Read-only chain queries.
///
/// Implementations are shared across concurrent calls and must be thread-safe.
#[async_trait]
pub trait LedgerQuery: Send + Sync {
    /// Fetch a transaction by signature. `Ok(None)` means the ledger does not
    /// know the signature.
    async fn transaction(&self, signature: &str)
        -> Result<Option<TransactionRecord>, TollgateError>;

    /// Resolve a token account. `Ok(None)` means the account does not exist.
    async fn token_account(&self, address: &str) -> Result<Option<TokenAccount>, TollgateError>;
}

/// In-memory ledger backed by DashMap. Counts every query it answers.
pub struct InMemoryLedger {
    transactions: DashMap<String, TransactionRecord>,
    accounts: DashMap<String, TokenAccount>,
    queries: AtomicUsize,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self {
            transactions: DashMap::new(),
            accounts: DashMap::new(),
            queries: AtomicUsize::new(0),
        }
    }

    pub fn insert_transaction(&self, record: TransactionRecord) {
        self.transactions.insert(record.signature.clone(), record);
    }

    pub fn insert_token_account(&self, address: &str, owner: Option<&str>) {
        self.accounts.insert(
            address.to_string(),
            TokenAccount {
                address: address.to_string(),
                owner: owner.map(String::from),
            },
        );
    }

    /// Number of queries answered so far.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerQuery for InMemoryLedger {
    async fn transaction(
        &self,
        signature: &str,
    ) -> Result<Option<TransactionRecord>, TollgateError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.transactions.get(signature).map(|r| r.clone()))
    }

    async fn token_account(&self, address: &str) -> Result<Option<TokenAccount>, TollgateError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.accounts.get(address).map(|a| a.clone()))
    }
}
