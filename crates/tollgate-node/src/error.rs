use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use std::fmt;
use std::time::Duration;

/// Terminal failure states of a metered call.
#[derive(Debug, Clone, PartialEq)]
pub enum CallRejection {
    /// Chain header names an unknown or unconfigured chain
    UnsupportedChain(String),
    /// Payment proof rejected by the verifier
    PaymentRejected(String),
    /// Body missing `api` or `params` of the right shape
    BadRequest(String),
    /// No handler registered under the name
    HandlerNotFound(String),
    /// Claimed amount below the handler's price
    InsufficientPayment { required: f64, received: f64 },
    /// Handler did not settle within its timeout
    HandlerTimeout(Duration),
    /// Handler returned an error or panicked
    HandlerError(String),
}

impl CallRejection {
    /// Stable machine-readable code, also used as the metrics label.
    pub fn code(&self) -> &'static str {
        match self {
            CallRejection::UnsupportedChain(_) => "unsupported_chain",
            CallRejection::PaymentRejected(_) => "payment_rejected",
            CallRejection::BadRequest(_) => "bad_request",
            CallRejection::HandlerNotFound(_) => "handler_not_found",
            CallRejection::InsufficientPayment { .. } => "insufficient_payment",
            CallRejection::HandlerTimeout(_) => "handler_timeout",
            CallRejection::HandlerError(_) => "handler_error",
        }
    }

    // Unknown API shares the 500 family with execution failures.
    pub fn status(&self) -> StatusCode {
        match self {
            CallRejection::UnsupportedChain(_) | CallRejection::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            CallRejection::PaymentRejected(_) | CallRejection::InsufficientPayment { .. } => {
                StatusCode::PAYMENT_REQUIRED
            }
            CallRejection::HandlerNotFound(_)
            | CallRejection::HandlerTimeout(_)
            | CallRejection::HandlerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether this outcome counts toward the node's error counter.
    pub fn counts_as_error(&self) -> bool {
        matches!(
            self,
            CallRejection::HandlerNotFound(_)
                | CallRejection::HandlerTimeout(_)
                | CallRejection::HandlerError(_)
        )
    }
}

impl fmt::Display for CallRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallRejection::UnsupportedChain(chain) => write!(f, "unsupported chain: {}", chain),
            CallRejection::PaymentRejected(msg) => write!(f, "payment rejected: {}", msg),
            CallRejection::BadRequest(msg) => write!(f, "bad request: {}", msg),
            CallRejection::HandlerNotFound(api) => write!(f, "unknown API: {}", api),
            CallRejection::InsufficientPayment { required, received } => write!(
                f,
                "insufficient payment: required {}, received {}",
                required, received
            ),
            CallRejection::HandlerTimeout(timeout) => write!(
                f,
                "handler timed out after {}ms",
                timeout.as_millis()
            ),
            CallRejection::HandlerError(msg) => write!(f, "handler failed: {}", msg),
        }
    }
}

/// A rejected call, correlated with its request id.
#[derive(Debug, Clone)]
pub struct CallFailure {
    pub request_id: String,
    pub latency: Duration,
    pub rejection: CallRejection,
}

impl fmt::Display for CallFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.request_id, self.rejection)
    }
}

impl std::error::Error for CallFailure {}

impl ResponseError for CallFailure {
    fn status_code(&self) -> StatusCode {
        self.rejection.status()
    }

    fn error_response(&self) -> HttpResponse {
        let mut body = serde_json::json!({
            "error": self.rejection.to_string(),
            "code": self.rejection.code(),
            "requestId": self.request_id,
            "latency": self.latency.as_millis() as u64,
        });

        if let CallRejection::InsufficientPayment { required, received } = &self.rejection {
            body["required"] = serde_json::json!(required);
            body["received"] = serde_json::json!(received);
        }

        HttpResponse::build(self.status_code()).json(body)
    }
}
