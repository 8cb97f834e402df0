use std::sync::Arc;
use std::time::Duration;

use crate::config::NodeConfig;
use crate::dispatcher::MeteredDispatcher;
use crate::registry::RegistryClient;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<NodeConfig>,
    pub dispatcher: Arc<MeteredDispatcher>,
    /// Present when the node is registered with a discovery registry
    pub registry: Option<Arc<RegistryClient>>,
}

impl AppState {
    pub fn new(config: NodeConfig, dispatcher: MeteredDispatcher) -> Self {
        Self {
            config: Arc::new(config),
            dispatcher: Arc::new(dispatcher),
            registry: None,
        }
    }

    pub fn with_registry(mut self, registry: Arc<RegistryClient>) -> Self {
        self.registry = Some(registry);
        self
    }
}

/// Outbound HTTP client for chain queries, upstream APIs, and the registry.
pub fn build_http_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::none()) // Prevent SSRF via redirects
        .build()
}
