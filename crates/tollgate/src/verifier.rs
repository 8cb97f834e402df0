use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::chain::Chain;
use crate::constants::{TokenConfig, DEFAULT_QUERY_TIMEOUT_SECS, FREE_CALL_SENTINEL, UNKNOWN_SENDER};
use crate::error::{TollgateError, VerificationError};
use crate::ledger::LedgerQuery;
use crate::payment::PaymentResult;

/// Checks payment proofs against the ledger.
///
/// Holds one [`LedgerQuery`] per supported chain. Verification is read-only,
/// makes a single attempt per query, and reports every failure through
/// [`PaymentResult`] rather than as an error.
pub struct PaymentVerifier {
    supported_chains: Vec<Chain>,
    ledgers: HashMap<Chain, Arc<dyn LedgerQuery>>,
    token: TokenConfig,
    query_timeout: Duration,
}

impl PaymentVerifier {
    pub fn new(supported_chains: Vec<Chain>, token: TokenConfig) -> Self {
        Self {
            supported_chains,
            ledgers: HashMap::new(),
            token,
            query_timeout: Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
        }
    }

    /// Attach the ledger connection used for `chain`.
    pub fn with_ledger(mut self, chain: Chain, ledger: Arc<dyn LedgerQuery>) -> Self {
        self.ledgers.insert(chain, ledger);
        self
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn supported_chains(&self) -> &[Chain] {
        &self.supported_chains
    }

    pub fn supports(&self, chain: Chain) -> bool {
        self.supported_chains.contains(&chain)
    }

    pub fn token(&self) -> &TokenConfig {
        &self.token
    }

    /// Verify that `proof_token` pays `expected_recipient` on `chain`.
    pub async fn verify(
        &self,
        proof_token: &str,
        chain: Chain,
        expected_recipient: &str,
    ) -> PaymentResult {
        if is_free_call(proof_token) {
            return PaymentResult::paid(0.0, UNKNOWN_SENDER);
        }

        if !self.supports(chain) {
            return PaymentResult::rejected(VerificationError::UnsupportedChain(chain));
        }

        match self.verify_transfer(proof_token, chain, expected_recipient).await {
            Ok((amount, sender)) => {
                tracing::debug!(%chain, amount, sender = %sender, "payment verified");
                PaymentResult::paid(amount, sender)
            }
            Err(e) => {
                tracing::warn!(%chain, error = %e, "payment verification failed");
                PaymentResult::rejected(e)
            }
        }
    }

    async fn verify_transfer(
        &self,
        signature: &str,
        chain: Chain,
        expected_recipient: &str,
    ) -> Result<(f64, String), VerificationError> {
        let ledger = self
            .ledgers
            .get(&chain)
            .ok_or(VerificationError::ConnectionUnavailable(chain))?;

        let tx = self
            .bounded(ledger.transaction(signature))
            .await?
            .ok_or_else(|| VerificationError::TransactionNotFound(signature.to_string()))?;

        if tx.failed {
            return Err(VerificationError::TransactionFailed(signature.to_string()));
        }

        let transfer = tx
            .all_instructions()
            .find(|ix| ix.is_token_transfer(&self.token.program_id))
            .ok_or(VerificationError::NoTransferInstruction)?;

        let destination = transfer
            .destination()
            .ok_or_else(|| VerificationError::DestinationNotFound("<missing>".to_string()))?;

        let account = self
            .bounded(ledger.token_account(destination))
            .await?
            .ok_or_else(|| VerificationError::DestinationNotFound(destination.to_string()))?;

        let owner = account
            .owner
            .ok_or_else(|| VerificationError::OwnerUnresolved(destination.to_string()))?;

        if owner != expected_recipient {
            return Err(VerificationError::WrongRecipient {
                expected: expected_recipient.to_string(),
                actual: owner,
            });
        }

        let raw = parse_raw_amount(transfer.raw_amount())?;
        let sender = transfer.sender().unwrap_or(UNKNOWN_SENDER).to_string();

        Ok((self.token.to_decimal(raw), sender))
    }

    /// Run one ledger query under the configured timeout.
    async fn bounded<T>(
        &self,
        query: impl Future<Output = Result<T, TollgateError>>,
    ) -> Result<T, VerificationError> {
        match tokio::time::timeout(self.query_timeout, query).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(VerificationError::Query(e.to_string())),
            Err(_) => Err(VerificationError::Query(format!(
                "query timed out after {}s",
                self.query_timeout.as_secs()
            ))),
        }
    }
}

/// Empty tokens and the sentinel skip verification entirely.
pub fn is_free_call(proof_token: &str) -> bool {
    proof_token.is_empty() || proof_token == FREE_CALL_SENTINEL
}

fn parse_raw_amount(raw: Option<&Value>) -> Result<u64, VerificationError> {
    match raw {
        Some(Value::String(s)) => {
            let s = s.trim();
            if s.starts_with('-') {
                return Err(VerificationError::InvalidAmount(format!("negative amount {s}")));
            }
            s.parse::<u64>()
                .map_err(|_| VerificationError::InvalidAmount(format!("non-numeric amount {s:?}")))
        }
        Some(Value::Number(n)) => n
            .as_u64()
            .ok_or_else(|| VerificationError::InvalidAmount(format!("not a whole unsigned amount: {n}"))),
        Some(other) => Err(VerificationError::InvalidAmount(format!(
            "unexpected amount value {other}"
        ))),
        None => Err(VerificationError::InvalidAmount("missing amount".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_is_free_call() {
        assert!(is_free_call(""));
        assert!(is_free_call("free-api-call"));
        assert!(!is_free_call("free-api-call "));
        assert!(!is_free_call("5VERv8NMvzbJMEkV8xnrLkEaWRtSz9CosKDYjCJjBRnbJLgp8uirBgmQpjKhoR4tjF3ZpRzrFmBV6UjKdiSZkQUW"));
    }

    #[test]
    fn test_parse_raw_amount() {
        assert_eq!(parse_raw_amount(Some(&json!("10000"))).unwrap(), 10_000);
        assert_eq!(parse_raw_amount(Some(&json!(42))).unwrap(), 42);
        assert!(matches!(
            parse_raw_amount(Some(&json!("-5"))),
            Err(VerificationError::InvalidAmount(_))
        ));
        assert!(matches!(
            parse_raw_amount(Some(&json!("ten"))),
            Err(VerificationError::InvalidAmount(_))
        ));
        assert!(matches!(
            parse_raw_amount(Some(&json!(-3))),
            Err(VerificationError::InvalidAmount(_))
        ));
        assert!(matches!(
            parse_raw_amount(Some(&json!(1.5))),
            Err(VerificationError::InvalidAmount(_))
        ));
        assert!(parse_raw_amount(None).is_err());
    }
}
