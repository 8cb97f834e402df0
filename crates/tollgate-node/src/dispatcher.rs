//! Metered dispatch: authorize → validate shape → lookup → price check →
//! execute with timeout → account.
//!
//! Payment and shape failures never reach a handler and never touch earnings
//! or latency. Handler-stage failures (and unknown API names) increment the
//! error counter (see [`CallRejection::counts_as_error`]). Successful calls
//! are accounted before the registry heartbeat is fired, and the heartbeat
//! never delays the response.

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tollgate::{PaymentClaim, PaymentVerifier};
use uuid::Uuid;

use crate::error::{CallFailure, CallRejection};
use crate::handler::{HandlerRegistration, HandlerRegistry, Params};
use crate::metrics::{CALLS_TOTAL, EARNINGS_TOTAL, HANDLER_LATENCY};
use crate::middleware::{authorize, resolve_chain};
use crate::registry::RegistryClient;
use crate::stats::{HealthSnapshot, StatsAggregator};

/// A call as received, before any checks.
#[derive(Debug, Clone, Default)]
pub struct InboundCall {
    pub proof_token: String,
    /// Requested chain; `None` selects the primary chain.
    pub chain: Option<String>,
    /// Parsed request body; `None` if it was not valid JSON.
    pub body: Option<Value>,
    /// Set when a payment header was present but unreadable.
    pub header_error: Option<String>,
}

/// Per-call state threaded through the pipeline once payment is authorized.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub request_id: String,
    pub started: Instant,
    pub claim: PaymentClaim,
}

impl CallContext {
    fn fail(&self, rejection: CallRejection) -> CallFailure {
        failure(&self.request_id, self.started, rejection)
    }
}

fn failure(request_id: &str, started: Instant, rejection: CallRejection) -> CallFailure {
    CallFailure {
        request_id: request_id.to_string(),
        latency: started.elapsed(),
        rejection,
    }
}

/// Successful call result as returned to the client.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallReceipt {
    pub data: Value,
    pub request_id: String,
    /// Milliseconds.
    pub latency: u64,
    pub cost: f64,
    pub timestamp: String,
}

/// Aborts the handler task when dropped, so neither a timeout nor an
/// abandoned request leaves it running.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub struct MeteredDispatcher {
    verifier: Arc<PaymentVerifier>,
    handlers: Arc<HandlerRegistry>,
    stats: Arc<StatsAggregator>,
    registry: Option<Arc<RegistryClient>>,
    recipient: String,
}

impl MeteredDispatcher {
    pub fn new(
        verifier: Arc<PaymentVerifier>,
        handlers: Arc<HandlerRegistry>,
        stats: Arc<StatsAggregator>,
        recipient: impl Into<String>,
    ) -> Self {
        Self {
            verifier,
            handlers,
            stats,
            registry: None,
            recipient: recipient.into(),
        }
    }

    /// Send a heartbeat to `registry` after every successful call.
    pub fn with_registry(mut self, registry: Arc<RegistryClient>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn verifier(&self) -> &PaymentVerifier {
        &self.verifier
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    pub fn stats(&self) -> &StatsAggregator {
        &self.stats
    }

    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    /// Run one inbound call to completion.
    pub async fn dispatch(&self, call: InboundCall) -> Result<CallReceipt, CallFailure> {
        let request_id = Uuid::new_v4().to_string();
        let started = Instant::now();

        let result = self.run(&request_id, started, call).await;

        match &result {
            Ok(receipt) => {
                CALLS_TOTAL.with_label_values(&["success"]).inc();
                tracing::info!(
                    request_id = %receipt.request_id,
                    outcome = "success",
                    cost = receipt.cost,
                    latency_ms = receipt.latency,
                    "call completed"
                );
            }
            Err(f) => {
                if f.rejection.counts_as_error() {
                    self.stats.record_failure();
                }
                CALLS_TOTAL.with_label_values(&[f.rejection.code()]).inc();
                let latency_ms = f.latency.as_millis() as u64;
                if f.rejection.status().is_server_error() {
                    tracing::warn!(
                        request_id = %f.request_id,
                        outcome = f.rejection.code(),
                        latency_ms,
                        error = %f.rejection,
                        "call failed"
                    );
                } else {
                    tracing::info!(
                        request_id = %f.request_id,
                        outcome = f.rejection.code(),
                        latency_ms,
                        error = %f.rejection,
                        "call rejected"
                    );
                }
            }
        }

        result
    }

    async fn run(
        &self,
        request_id: &str,
        started: Instant,
        call: InboundCall,
    ) -> Result<CallReceipt, CallFailure> {
        if let Some(msg) = call.header_error {
            return Err(failure(request_id, started, CallRejection::BadRequest(msg)));
        }

        // Authorize
        let chain = resolve_chain(call.chain.as_deref(), &self.verifier)
            .map_err(|r| failure(request_id, started, r))?;
        let claim = authorize(&self.verifier, &call.proof_token, chain, &self.recipient)
            .await
            .map_err(|r| failure(request_id, started, r))?;

        let ctx = CallContext {
            request_id: request_id.to_string(),
            started,
            claim,
        };

        // Validate shape
        let (api, params) =
            validate_shape(call.body).map_err(|msg| ctx.fail(CallRejection::BadRequest(msg)))?;

        // Lookup
        let Some(registration) = self.handlers.get(&api) else {
            return Err(ctx.fail(CallRejection::HandlerNotFound(api)));
        };

        // Price check
        if ctx.claim.amount_paid < registration.price {
            return Err(ctx.fail(CallRejection::InsufficientPayment {
                required: registration.price,
                received: ctx.claim.amount_paid,
            }));
        }

        self.execute(ctx, registration, params).await
    }

    async fn execute(
        &self,
        ctx: CallContext,
        registration: HandlerRegistration,
        params: Params,
    ) -> Result<CallReceipt, CallFailure> {
        let handler = Arc::clone(&registration.handler);
        let mut task = AbortOnDrop(tokio::spawn(async move { handler.call(params).await }));

        let outcome = match tokio::time::timeout(registration.timeout, &mut task.0).await {
            Ok(Ok(Ok(data))) => Ok(data),
            Ok(Ok(Err(e))) => Err(CallRejection::HandlerError(e.to_string())),
            Ok(Err(join_err)) if join_err.is_panic() => {
                Err(CallRejection::HandlerError("handler panicked".to_string()))
            }
            Ok(Err(_)) => Err(CallRejection::HandlerError("handler cancelled".to_string())),
            Err(_) => Err(CallRejection::HandlerTimeout(registration.timeout)),
        };
        drop(task);

        let latency = ctx.started.elapsed();
        HANDLER_LATENCY.observe(latency.as_secs_f64());

        match outcome {
            Ok(data) => {
                let snapshot = self.stats.record_success(registration.price, latency);
                EARNINGS_TOTAL.inc_by(registration.price);
                self.fire_heartbeat(snapshot);
                Ok(CallReceipt {
                    data,
                    request_id: ctx.request_id,
                    latency: latency.as_millis() as u64,
                    cost: registration.price,
                    timestamp: chrono::Utc::now().to_rfc3339(),
                })
            }
            Err(rejection) => Err(CallFailure {
                request_id: ctx.request_id,
                latency,
                rejection,
            }),
        }
    }

    fn fire_heartbeat(&self, snapshot: HealthSnapshot) {
        if let Some(registry) = &self.registry {
            registry.spawn_heartbeat(snapshot);
        }
    }
}

/// Require `{"api": <non-empty string>, "params": <object>}`.
pub fn validate_shape(body: Option<Value>) -> Result<(String, Params), String> {
    let Some(Value::Object(mut body)) = body else {
        return Err("request body must be a JSON object".to_string());
    };

    let api = match body.remove("api") {
        Some(Value::String(api)) if !api.trim().is_empty() => api.trim().to_string(),
        _ => return Err("`api` must be a non-empty string".to_string()),
    };

    let params = match body.remove("params") {
        Some(Value::Object(params)) => params,
        _ => return Err("`params` must be an object".to_string()),
    };

    Ok((api, params))
}
