use std::collections::HashMap;
use std::env;
use std::time::Duration;
use tollgate::{Chain, TokenConfig, TOKEN_DECIMALS, TOKEN_PROGRAM_ID};
use url::Url;

const DEFAULT_PORT: u16 = 4030;
const DEFAULT_PRICE: f64 = 0.01;
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 60;
const DEFAULT_CHAIN_QUERY_TIMEOUT_SECS: u64 = 15;
const DEFAULT_REGISTRY_TIMEOUT_SECS: u64 = 10;
const DEFAULT_RATE_LIMIT_RPM: u32 = 600;

const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

#[derive(Clone)]
pub struct NodeConfig {
    /// Recipient wallet that payments must be sent to
    pub wallet_address: String,
    /// Server port
    pub port: u16,
    /// URL advertised to the registry
    pub public_url: String,
    /// Registry base URL (None = run unregistered)
    pub registry_url: Option<String>,
    /// Provider id sent to the registry
    pub provider_id: String,
    /// Supported chains; the first is the primary chain
    pub chains: Vec<Chain>,
    /// JSON-RPC endpoint per supported chain
    pub rpc_urls: HashMap<Chain, String>,
    /// Payment token program and decimals
    pub token: TokenConfig,
    /// Price for registrations that omit one
    pub default_price: f64,
    /// Handler timeout for registrations that omit one
    pub default_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub chain_query_timeout: Duration,
    pub registry_timeout: Duration,
    /// Enables the per-request access log
    pub enable_request_log: bool,
    /// CORS allowed origins
    pub allowed_origins: Vec<String>,
    /// Rate limit requests per minute
    pub rate_limit_rpm: u32,
    /// Bearer token required for /metrics endpoint (None = public)
    pub metrics_token: Option<String>,
    /// Path to a JSON API catalog (None = single echo API)
    pub api_catalog: Option<String>,
}

impl std::fmt::Debug for NodeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeConfig")
            .field("wallet_address", &self.wallet_address)
            .field("port", &self.port)
            .field("public_url", &self.public_url)
            .field("registry_url", &self.registry_url)
            .field("provider_id", &self.provider_id)
            .field("chains", &self.chains)
            .field("rpc_urls", &self.rpc_urls)
            .field("token", &self.token)
            .field("default_price", &self.default_price)
            .field("default_timeout", &self.default_timeout)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("chain_query_timeout", &self.chain_query_timeout)
            .field("registry_timeout", &self.registry_timeout)
            .field("enable_request_log", &self.enable_request_log)
            .field("allowed_origins", &self.allowed_origins)
            .field("rate_limit_rpm", &self.rate_limit_rpm)
            .field(
                "metrics_token",
                &self.metrics_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("api_catalog", &self.api_catalog)
            .finish()
    }
}

impl NodeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        // Required: wallet address
        let wallet_address =
            var("WALLET_ADDRESS").ok_or(ConfigError::MissingRequired("WALLET_ADDRESS"))?;
        validate_wallet_address(&wallet_address)?;

        let port = parse_or("PORT", var("PORT"), DEFAULT_PORT)?;

        let public_url = var("PUBLIC_URL").unwrap_or_else(|| format!("http://localhost:{port}"));
        Url::parse(&public_url).map_err(|_| ConfigError::InvalidUrl(public_url.clone()))?;

        let registry_url = var("REGISTRY_URL");
        if let Some(ref url) = registry_url {
            Url::parse(url).map_err(|_| ConfigError::InvalidUrl(url.clone()))?;
        }

        let provider_id = var("PROVIDER_ID").unwrap_or_else(|| wallet_address.clone());

        let chains = parse_chains(var("CHAINS").as_deref().unwrap_or("devnet"))?;

        let mut rpc_urls = HashMap::new();
        for chain in &chains {
            let key = format!("RPC_URL_{}", chain.as_str().to_uppercase());
            let url = var(&key).unwrap_or_else(|| chain.default_rpc_url().to_string());
            Url::parse(&url).map_err(|_| ConfigError::InvalidUrl(url.clone()))?;
            rpc_urls.insert(*chain, url);
        }

        let token = TokenConfig {
            program_id: var("TOKEN_PROGRAM_ID").unwrap_or_else(|| TOKEN_PROGRAM_ID.to_string()),
            decimals: parse_or("TOKEN_DECIMALS", var("TOKEN_DECIMALS"), TOKEN_DECIMALS)?,
        };

        let default_price = parse_or("DEFAULT_PRICE", var("DEFAULT_PRICE"), DEFAULT_PRICE)?;
        if !default_price.is_finite() || default_price < 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "DEFAULT_PRICE",
                value: default_price.to_string(),
            });
        }

        let default_timeout = secs("DEFAULT_TIMEOUT_SECS", var("DEFAULT_TIMEOUT_SECS"), DEFAULT_TIMEOUT_SECS)?;
        let heartbeat_interval = secs(
            "HEARTBEAT_INTERVAL_SECS",
            var("HEARTBEAT_INTERVAL_SECS"),
            DEFAULT_HEARTBEAT_INTERVAL_SECS,
        )?;
        let chain_query_timeout = secs(
            "CHAIN_QUERY_TIMEOUT_SECS",
            var("CHAIN_QUERY_TIMEOUT_SECS"),
            DEFAULT_CHAIN_QUERY_TIMEOUT_SECS,
        )?;
        let registry_timeout = secs(
            "REGISTRY_TIMEOUT_SECS",
            var("REGISTRY_TIMEOUT_SECS"),
            DEFAULT_REGISTRY_TIMEOUT_SECS,
        )?;

        let enable_request_log = var("ENABLE_REQUEST_LOG")
            .map(|v| !matches!(v.to_lowercase().as_str(), "false" | "0" | "no" | "off"))
            .unwrap_or(true);

        let allowed_origins: Vec<String> = var("ALLOWED_ORIGINS")
            .map(|s| {
                s.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_else(|| {
                vec![
                    "http://localhost:3000".to_string(),
                    "http://localhost:5173".to_string(),
                ]
            });

        let rate_limit_rpm = parse_or("RATE_LIMIT_RPM", var("RATE_LIMIT_RPM"), DEFAULT_RATE_LIMIT_RPM)?;
        if rate_limit_rpm == 0 {
            return Err(ConfigError::InvalidValue {
                key: "RATE_LIMIT_RPM",
                value: "0".to_string(),
            });
        }

        let metrics_token = var("METRICS_TOKEN");
        if metrics_token.is_none() {
            tracing::warn!("METRICS_TOKEN not set, /metrics endpoint is publicly accessible");
        }

        let api_catalog = var("API_CATALOG");

        Ok(Self {
            wallet_address,
            port,
            public_url,
            registry_url,
            provider_id,
            chains,
            rpc_urls,
            token,
            default_price,
            default_timeout,
            heartbeat_interval,
            chain_query_timeout,
            registry_timeout,
            enable_request_log,
            allowed_origins,
            rate_limit_rpm,
            metrics_token,
            api_catalog,
        })
    }

    /// The chain used when a call names none.
    pub fn primary_chain(&self) -> Chain {
        self.chains[0]
    }
}

/// Check that `address` looks like a base58-encoded 32-byte public key.
pub fn validate_wallet_address(address: &str) -> Result<(), ConfigError> {
    let well_formed = (32..=44).contains(&address.len())
        && address.chars().all(|c| BASE58_ALPHABET.contains(c));
    if well_formed {
        Ok(())
    } else {
        Err(ConfigError::InvalidAddress(address.to_string()))
    }
}

/// Parse a comma-separated chain list. Duplicates are dropped, order kept.
pub fn parse_chains(list: &str) -> Result<Vec<Chain>, ConfigError> {
    let mut chains = Vec::new();
    for name in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let chain: Chain = name
            .parse()
            .map_err(|_| ConfigError::UnknownChain(name.to_string()))?;
        if !chains.contains(&chain) {
            chains.push(chain);
        }
    }
    if chains.is_empty() {
        return Err(ConfigError::InvalidValue {
            key: "CHAINS",
            value: list.to_string(),
        });
    }
    Ok(chains)
}

fn parse_or<T: std::str::FromStr>(
    key: &'static str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        Some(v) => v
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value: v }),
        None => Ok(default),
    }
}

fn secs(key: &'static str, value: Option<String>, default: u64) -> Result<Duration, ConfigError> {
    let secs = parse_or(key, value, default)?;
    if secs == 0 {
        return Err(ConfigError::InvalidValue {
            key,
            value: "0".to_string(),
        });
    }
    Ok(Duration::from_secs(secs))
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingRequired(&'static str),

    #[error("invalid wallet address: {0}")]
    InvalidAddress(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("unknown chain: {0}")]
    UnknownChain(String),

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}
