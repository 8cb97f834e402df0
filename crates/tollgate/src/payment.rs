use serde::{Deserialize, Serialize};

use crate::chain::Chain;
use crate::constants::UNKNOWN_SENDER;
use crate::error::VerificationError;

/// Evidence of payment attached to a single inbound call. Never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentClaim {
    pub amount_paid: f64,
    pub sender_address: String,
    pub proof_token: String,
    pub chain: Chain,
}

impl PaymentClaim {
    /// Zero-amount claim for calls presenting the free-call sentinel.
    pub fn free(proof_token: &str, chain: Chain) -> Self {
        Self {
            amount_paid: 0.0,
            sender_address: UNKNOWN_SENDER.to_string(),
            proof_token: proof_token.to_string(),
            chain,
        }
    }
}

/// Outcome of [`crate::verifier::PaymentVerifier::verify`].
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentResult {
    pub valid: bool,
    pub amount_paid: Option<f64>,
    pub sender_address: Option<String>,
    pub error: Option<VerificationError>,
}

impl PaymentResult {
    pub fn paid(amount_paid: f64, sender_address: impl Into<String>) -> Self {
        Self {
            valid: true,
            amount_paid: Some(amount_paid),
            sender_address: Some(sender_address.into()),
            error: None,
        }
    }

    pub fn rejected(error: VerificationError) -> Self {
        Self {
            valid: false,
            amount_paid: None,
            sender_address: None,
            error: Some(error),
        }
    }

    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(ToString::to_string)
    }

    /// Turn a successful result into the claim attached to the call.
    pub fn into_claim(self, proof_token: &str, chain: Chain) -> Result<PaymentClaim, VerificationError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        if !self.valid {
            return Err(VerificationError::Query("payment marked invalid".to_string()));
        }
        Ok(PaymentClaim {
            amount_paid: self.amount_paid.unwrap_or(0.0),
            sender_address: self
                .sender_address
                .unwrap_or_else(|| UNKNOWN_SENDER.to_string()),
            proof_token: proof_token.to_string(),
            chain,
        })
    }
}
