//! Declarative API catalog loaded from `API_CATALOG`.
//!
//! ```json
//! [
//!   { "name": "echo", "kind": "echo", "price": 0.01 },
//!   { "name": "quote", "kind": "upstream", "url": "https://api.example.com/quote",
//!     "timeoutSecs": 5, "rateLimit": { "requests": 10, "perSecs": 60 } }
//! ]
//! ```

use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::handler::{
    ApiHandler, EchoHandler, HandlerOptions, HandlerRegistry, RateLimit, RegistrationError,
};
use crate::upstream::{InvalidUpstream, UpstreamHandler};

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to read API catalog {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid API catalog: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("API {0}: upstream entries require a url")]
    MissingUrl(String),

    #[error("API {name}: invalid timeoutSecs {value}")]
    InvalidTimeout { name: String, value: f64 },

    #[error("API {name}: {source}")]
    Upstream {
        name: String,
        #[source]
        source: InvalidUpstream,
    },

    #[error(transparent)]
    Registration(#[from] RegistrationError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiKind {
    Echo,
    Upstream,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogRateLimit {
    pub requests: u32,
    pub per_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub name: String,
    pub kind: ApiKind,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub timeout_secs: Option<f64>,
    #[serde(default)]
    pub rate_limit: Option<CatalogRateLimit>,
}

impl CatalogEntry {
    fn timeout(&self) -> Result<Option<Duration>, CatalogError> {
        self.timeout_secs
            .map(|secs| {
                Duration::try_from_secs_f64(secs).map_err(|_| CatalogError::InvalidTimeout {
                    name: self.name.clone(),
                    value: secs,
                })
            })
            .transpose()
    }

    fn options(&self) -> Result<HandlerOptions, CatalogError> {
        Ok(HandlerOptions {
            price: self.price,
            timeout: self.timeout()?,
            rate_limit: self.rate_limit.as_ref().map(|r| RateLimit {
                requests: r.requests,
                per: Duration::from_secs(r.per_secs),
            }),
        })
    }

    /// `timeout` is the registration's effective timeout. Upstream requests
    /// use it so the shared client's own timeout never cuts them short.
    fn build_handler(
        &self,
        http: &reqwest::Client,
        timeout: Duration,
    ) -> Result<Arc<dyn ApiHandler>, CatalogError> {
        match self.kind {
            ApiKind::Echo => Ok(Arc::new(EchoHandler)),
            ApiKind::Upstream => Ok(Arc::new(self.upstream_handler(http, timeout)?)),
        }
    }

    fn upstream_handler(
        &self,
        http: &reqwest::Client,
        timeout: Duration,
    ) -> Result<UpstreamHandler, CatalogError> {
        let url = self
            .url
            .as_deref()
            .ok_or_else(|| CatalogError::MissingUrl(self.name.clone()))?;
        let handler = UpstreamHandler::new(http.clone(), url).map_err(|source| {
            CatalogError::Upstream {
                name: self.name.clone(),
                source,
            }
        })?;
        Ok(handler.with_timeout(timeout))
    }
}

pub fn parse_catalog(json: &str) -> Result<Vec<CatalogEntry>, CatalogError> {
    Ok(serde_json::from_str(json)?)
}

pub fn load_catalog(path: impl AsRef<Path>) -> Result<Vec<CatalogEntry>, CatalogError> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_catalog(&json)
}

/// Register every catalog entry. Stops at the first invalid entry.
pub fn install(
    entries: &[CatalogEntry],
    registry: &HandlerRegistry,
    http: &reqwest::Client,
) -> Result<usize, CatalogError> {
    for entry in entries {
        let options = entry.options()?;
        let timeout = options.timeout.unwrap_or(registry.default_timeout());
        let handler = entry.build_handler(http, timeout)?;
        registry.register_arc(&entry.name, handler, options)?;
    }
    Ok(entries.len())
}

/// Install the catalog at `path`, or a single `echo` API at the default
/// price when no catalog is configured.
pub fn install_from_config(
    path: Option<&str>,
    registry: &HandlerRegistry,
    http: &reqwest::Client,
) -> Result<usize, CatalogError> {
    match path {
        Some(path) => {
            let entries = load_catalog(path)?;
            let count = install(&entries, registry, http)?;
            tracing::info!(path, apis = count, "loaded API catalog");
            Ok(count)
        }
        None => {
            registry.register("echo", EchoHandler, HandlerOptions::default())?;
            Ok(1)
        }
    }
}
