//! Handlers that forward call params to an HTTPS upstream.

use async_trait::async_trait;
use serde_json::Value;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::Duration;
use url::Url;

use crate::handler::{ApiHandler, HandlerError, Params};

/// Maximum upstream response body size (10 MB).
const MAX_RESPONSE_BODY_SIZE: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid upstream URL: {0}")]
pub struct InvalidUpstream(pub String);

/// Check if an IPv4 address is private, loopback, or otherwise non-routable.
pub fn is_private_ipv4(ip: &Ipv4Addr) -> bool {
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_broadcast()
        || ip.is_unspecified()
        || ip.octets()[0] == 100 && (ip.octets()[1] & 0xC0) == 64 // 100.64.0.0/10 (CGNAT)
}

/// Check if an IPv6 address is private, loopback, or otherwise non-routable.
pub fn is_private_ipv6(ip: &Ipv6Addr) -> bool {
    let segments = ip.segments();
    ip.is_loopback()
        || ip.is_unspecified()
        || (segments[0] & 0xFE00) == 0xFC00 // fc00::/7
        || (segments[0] & 0xFFC0) == 0xFE80 // fe80::/10
        || ip.to_ipv4_mapped().is_some_and(|v4| is_private_ipv4(&v4))
}

/// Upstreams must be HTTPS and must not point at localhost or private ranges.
pub fn validate_target_url(url: &str) -> Result<Url, InvalidUpstream> {
    let parsed = Url::parse(url).map_err(|_| InvalidUpstream("invalid URL format".to_string()))?;

    if parsed.scheme() != "https" {
        return Err(InvalidUpstream("target must use HTTPS".to_string()));
    }

    match parsed.host() {
        Some(url::Host::Ipv4(ip)) if is_private_ipv4(&ip) => Err(InvalidUpstream(
            "target cannot be a private or loopback IP address".to_string(),
        )),
        Some(url::Host::Ipv6(ip)) if is_private_ipv6(&ip) => Err(InvalidUpstream(
            "target cannot be a private or loopback IP address".to_string(),
        )),
        Some(url::Host::Domain(domain)) => {
            let domain = domain.to_lowercase();
            if domain == "localhost"
                || domain.ends_with(".localhost")
                || domain.ends_with(".local")
                || domain.ends_with(".internal")
            {
                Err(InvalidUpstream(
                    "target cannot be localhost or local domain".to_string(),
                ))
            } else {
                Ok(parsed)
            }
        }
        Some(_) => Ok(parsed),
        None => Err(InvalidUpstream("target URL must have a host".to_string())),
    }
}

/// POSTs the call params as JSON and returns the upstream's JSON reply.
pub struct UpstreamHandler {
    client: reqwest::Client,
    url: Url,
    timeout: Option<Duration>,
}

impl UpstreamHandler {
    pub fn new(client: reqwest::Client, url: &str) -> Result<Self, InvalidUpstream> {
        Ok(Self {
            client,
            url: validate_target_url(url)?,
            timeout: None,
        })
    }

    /// Per-request timeout. Overrides any timeout set on the shared client.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn request(&self, params: &Params) -> reqwest::RequestBuilder {
        let req = self.client.post(self.url.clone()).json(params);
        match self.timeout {
            Some(timeout) => req.timeout(timeout),
            None => req,
        }
    }
}

#[async_trait]
impl ApiHandler for UpstreamHandler {
    async fn call(&self, params: Params) -> Result<Value, HandlerError> {
        let resp = self
            .request(&params)
            .send()
            .await
            .map_err(|e| HandlerError::new(format!("upstream request failed: {e}")))?;

        let status = resp.status();
        if let Some(len) = resp.content_length() {
            if len as usize > MAX_RESPONSE_BODY_SIZE {
                return Err(HandlerError::new("upstream response too large"));
            }
        }
        let body = resp
            .bytes()
            .await
            .map_err(|e| HandlerError::new(format!("failed to read upstream response: {e}")))?;
        if body.len() > MAX_RESPONSE_BODY_SIZE {
            return Err(HandlerError::new("upstream response too large"));
        }

        if !status.is_success() {
            return Err(HandlerError::new(format!(
                "upstream returned HTTP {}",
                status.as_u16()
            )));
        }

        // Non-JSON replies are passed through as a string.
        Ok(serde_json::from_slice(&body)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).into_owned())))
    }
}
