//! Handler registration.
//!
//! A handler is any [`ApiHandler`] bound to a unique API name together with a
//! price and a timeout. Registering under an existing name replaces the
//! previous registration (last write wins); there is no removal.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Parameter payload passed through to handlers uninterpreted.
pub type Params = Map<String, Value>;

pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistrationError {
    #[error("API name must not be empty")]
    EmptyName,

    #[error("invalid price for {name}: {price} (must be a finite, non-negative number)")]
    InvalidPrice { name: String, price: f64 },

    #[error("invalid timeout for {0}: must be greater than zero")]
    InvalidTimeout(String),
}

/// A capability callable through the gateway.
#[async_trait]
pub trait ApiHandler: Send + Sync + 'static {
    async fn call(&self, params: Params) -> Result<Value, HandlerError>;
}

/// Adapter turning an async closure into an [`ApiHandler`].
pub struct FnHandler<F>(F);

/// Wrap an async closure as a handler.
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Params) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> ApiHandler for FnHandler<F>
where
    F: Fn(Params) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    async fn call(&self, params: Params) -> Result<Value, HandlerError> {
        (self.0)(params).await
    }
}

/// Returns its parameters unchanged.
pub struct EchoHandler;

#[async_trait]
impl ApiHandler for EchoHandler {
    async fn call(&self, params: Params) -> Result<Value, HandlerError> {
        Ok(Value::Object(params))
    }
}

/// Advisory rate limit. Stored and advertised, not enforced per handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimit {
    pub requests: u32,
    #[serde(rename = "perSecs", serialize_with = "as_secs")]
    pub per: Duration,
}

fn as_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_secs())
}

/// Optional settings for a registration. Unset fields take registry defaults.
#[derive(Debug, Clone, Default)]
pub struct HandlerOptions {
    pub price: Option<f64>,
    pub timeout: Option<Duration>,
    pub rate_limit: Option<RateLimit>,
}

impl HandlerOptions {
    pub fn price(mut self, price: f64) -> Self {
        self.price = Some(price);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn rate_limit(mut self, rate_limit: RateLimit) -> Self {
        self.rate_limit = Some(rate_limit);
        self
    }
}

/// A resolved registration.
#[derive(Clone)]
pub struct HandlerRegistration {
    pub name: String,
    pub handler: Arc<dyn ApiHandler>,
    pub price: f64,
    pub timeout: Duration,
    pub rate_limit: Option<RateLimit>,
}

impl std::fmt::Debug for HandlerRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistration")
            .field("name", &self.name)
            .field("price", &self.price)
            .field("timeout", &self.timeout)
            .field("rate_limit", &self.rate_limit)
            .finish()
    }
}

/// Public description of a registered API, as listed by `/apis`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiDescriptor {
    pub name: String,
    pub price: f64,
    pub timeout_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimit>,
}

/// Name → registration map shared by every call.
pub struct HandlerRegistry {
    handlers: DashMap<String, HandlerRegistration>,
    default_price: f64,
    default_timeout: Duration,
}

impl HandlerRegistry {
    pub fn new(default_price: f64, default_timeout: Duration) -> Self {
        Self {
            handlers: DashMap::new(),
            default_price,
            default_timeout,
        }
    }

    /// Register `handler` under `name`, replacing any existing registration.
    pub fn register(
        &self,
        name: &str,
        handler: impl ApiHandler,
        options: HandlerOptions,
    ) -> Result<(), RegistrationError> {
        self.register_arc(name, Arc::new(handler), options)
    }

    pub fn register_arc(
        &self,
        name: &str,
        handler: Arc<dyn ApiHandler>,
        options: HandlerOptions,
    ) -> Result<(), RegistrationError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RegistrationError::EmptyName);
        }

        let price = options.price.unwrap_or(self.default_price);
        if !price.is_finite() || price < 0.0 {
            return Err(RegistrationError::InvalidPrice {
                name: name.to_string(),
                price,
            });
        }

        let timeout = options.timeout.unwrap_or(self.default_timeout);
        if timeout.is_zero() {
            return Err(RegistrationError::InvalidTimeout(name.to_string()));
        }

        let registration = HandlerRegistration {
            name: name.to_string(),
            handler,
            price,
            timeout,
            rate_limit: options.rate_limit,
        };

        if self.handlers.insert(name.to_string(), registration).is_some() {
            tracing::info!(api = %name, price, "replaced existing API registration");
        } else {
            tracing::info!(api = %name, price, timeout_ms = timeout.as_millis() as u64, "registered API");
        }
        Ok(())
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn get(&self, name: &str) -> Option<HandlerRegistration> {
        self.handlers.get(name).map(|r| r.clone())
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }

    pub fn price_table(&self) -> BTreeMap<String, f64> {
        self.handlers
            .iter()
            .map(|r| (r.key().clone(), r.price))
            .collect()
    }

    pub fn descriptors(&self) -> Vec<ApiDescriptor> {
        let mut list: Vec<ApiDescriptor> = self
            .handlers
            .iter()
            .map(|r| ApiDescriptor {
                name: r.name.clone(),
                price: r.price,
                timeout_secs: r.timeout.as_secs_f64(),
                rate_limit: r.rate_limit,
            })
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
