use actix_web::HttpRequest;
use serde_json::Value;
use tollgate::{is_free_call, Chain, PaymentClaim, PaymentVerifier, VerificationError};

use crate::dispatcher::InboundCall;
use crate::error::CallRejection;
use crate::metrics::PAYMENTS_TOTAL;

pub const PAYMENT_HEADER: &str = "X-Payment";
pub const CHAIN_HEADER: &str = "X-Payment-Chain";

/// Read the payment headers and body of a `/call` request.
///
/// A missing `X-Payment` header is the empty proof token (free call). A
/// payment header that is not visible ASCII is recorded in `header_error`
/// and rejected before authorization. A body that is not valid JSON is passed
/// on as `None` and rejected by shape validation.
pub fn extract_inbound_call(req: &HttpRequest, body: &[u8]) -> InboundCall {
    let mut header_error = None;
    let mut header = |name: &'static str| match req.headers().get(name).map(|v| v.to_str()) {
        None => None,
        Some(Ok(v)) => Some(v.trim().to_string()),
        Some(Err(_)) => {
            if header_error.is_none() {
                header_error = Some(format!("{name} header is not valid ASCII"));
            }
            None
        }
    };

    let proof_token = header(PAYMENT_HEADER).unwrap_or_default();
    let chain = header(CHAIN_HEADER).filter(|c| !c.is_empty());

    InboundCall {
        proof_token,
        chain,
        body: serde_json::from_slice::<Value>(body).ok(),
        header_error,
    }
}

/// Pick the chain a call pays on. No header selects the primary chain.
pub fn resolve_chain(
    requested: Option<&str>,
    verifier: &PaymentVerifier,
) -> Result<Chain, CallRejection> {
    let chain = match requested {
        Some(name) => name
            .parse::<Chain>()
            .map_err(|_| CallRejection::UnsupportedChain(name.to_string()))?,
        None => *verifier
            .supported_chains()
            .first()
            .ok_or_else(|| CallRejection::UnsupportedChain("<none configured>".to_string()))?,
    };

    if !verifier.supports(chain) {
        return Err(CallRejection::UnsupportedChain(chain.to_string()));
    }
    Ok(chain)
}

/// Verify the proof token and produce the claim attached to the call.
pub async fn authorize(
    verifier: &PaymentVerifier,
    proof_token: &str,
    chain: Chain,
    recipient: &str,
) -> Result<PaymentClaim, CallRejection> {
    if is_free_call(proof_token) {
        PAYMENTS_TOTAL.with_label_values(&["free"]).inc();
        return Ok(PaymentClaim::free(proof_token, chain));
    }

    let result = verifier.verify(proof_token, chain, recipient).await;
    match result.into_claim(proof_token, chain) {
        Ok(claim) => {
            PAYMENTS_TOTAL.with_label_values(&["verified"]).inc();
            tracing::info!(
                chain = %chain,
                sender = %claim.sender_address,
                amount = claim.amount_paid,
                "payment verified"
            );
            Ok(claim)
        }
        Err(VerificationError::UnsupportedChain(chain)) => {
            PAYMENTS_TOTAL.with_label_values(&["rejected"]).inc();
            Err(CallRejection::UnsupportedChain(chain.to_string()))
        }
        Err(e) => {
            PAYMENTS_TOTAL.with_label_values(&["rejected"]).inc();
            Err(CallRejection::PaymentRejected(e.to_string()))
        }
    }
}
