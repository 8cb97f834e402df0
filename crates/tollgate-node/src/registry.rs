//! Discovery-registry lifecycle: register once, heartbeat periodically,
//! unregister on shutdown.
//!
//! Only [`RegistryClient::register`] can fail. Heartbeats and unregistration
//! are best-effort: failures are logged and counted, never returned.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tollgate::Chain;

use crate::metrics::HEARTBEATS_TOTAL;
use crate::stats::HealthSnapshot;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_REGISTRY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("registry request to {path} failed: {message}")]
    Request { path: &'static str, message: String },

    #[error("registry rejected {path}: HTTP {status}: {body}")]
    Rejected {
        path: &'static str,
        status: u16,
        body: String,
    },
}

/// What the node advertises at registration.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    pub provider_id: String,
    pub apis: Vec<String>,
    pub url: String,
    pub prices: BTreeMap<String, f64>,
    pub chains: Vec<Chain>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HeartbeatBody<'a> {
    provider_id: &'a str,
    latency: f64,
    requests_served: u64,
    errors: u64,
    timestamp: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UnregisterBody<'a> {
    provider_id: &'a str,
}

/// Client for the external discovery registry. Owns the heartbeat task.
pub struct RegistryClient {
    http: reqwest::Client,
    base_url: String,
    provider_id: String,
    interval: Duration,
    request_timeout: Duration,
    /// Most recent snapshot not yet picked up by the periodic task.
    latest: Mutex<Option<HealthSnapshot>>,
    task: Mutex<Option<JoinHandle<()>>>,
    /// Post-call heartbeats still on the wire; drained by stop.
    in_flight: Mutex<JoinSet<()>>,
    stopped: AtomicBool,
    unregistered: AtomicBool,
}

impl RegistryClient {
    pub fn new(http: reqwest::Client, base_url: &str, provider_id: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            provider_id: provider_id.to_string(),
            interval: DEFAULT_HEARTBEAT_INTERVAL,
            request_timeout: DEFAULT_REGISTRY_TIMEOUT,
            latest: Mutex::new(None),
            task: Mutex::new(None),
            in_flight: Mutex::new(JoinSet::new()),
            stopped: AtomicBool::new(false),
            unregistered: AtomicBool::new(false),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    /// Announce the node. Any failure here must stop the node from serving.
    /// On success the periodic heartbeat is started.
    pub async fn register(self: &Arc<Self>, listing: &Listing) -> Result<(), RegistryError> {
        self.post("/register", listing).await?;
        tracing::info!(
            provider_id = %listing.provider_id,
            apis = listing.apis.len(),
            url = %listing.url,
            "registered with registry"
        );
        self.start_heartbeat();
        Ok(())
    }

    /// Send one heartbeat. Never fails; does nothing once stopped.
    pub async fn heartbeat(&self, snapshot: HealthSnapshot) {
        if self.stopped.load(Ordering::SeqCst) {
            tracing::debug!("heartbeat skipped: registry client stopped");
            return;
        }
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(snapshot);
        self.send_heartbeat(snapshot).await;
    }

    /// Send one heartbeat in the background without waiting for it.
    /// [`stop_heartbeat`](Self::stop_heartbeat) waits for every heartbeat
    /// spawned here before it returns.
    pub fn spawn_heartbeat(self: &Arc<Self>, snapshot: HealthSnapshot) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        // Checked under the lock so stop either sees this task or we see stopped.
        if self.stopped.load(Ordering::SeqCst) {
            tracing::debug!("heartbeat skipped: registry client stopped");
            return;
        }
        while in_flight.try_join_next().is_some() {}

        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(snapshot);
        let client = Arc::clone(self);
        in_flight.spawn(async move { client.send_heartbeat(snapshot).await });
    }

    async fn send_heartbeat(&self, snapshot: HealthSnapshot) {
        let body = HeartbeatBody {
            provider_id: &self.provider_id,
            latency: snapshot.latency,
            requests_served: snapshot.requests_served,
            errors: snapshot.errors,
            timestamp: chrono::Utc::now().timestamp_millis(),
        };
        match self.post("/heartbeat", &body).await {
            Ok(()) => {
                HEARTBEATS_TOTAL.with_label_values(&["sent"]).inc();
                tracing::debug!(requests_served = snapshot.requests_served, "heartbeat sent");
            }
            Err(e) => {
                HEARTBEATS_TOTAL.with_label_values(&["failed"]).inc();
                tracing::warn!(error = %e, "heartbeat failed (non-fatal)");
            }
        }
    }

    /// Start the periodic heartbeat. Returns `false` if it is already running
    /// or the client has been stopped.
    pub fn start_heartbeat(self: &Arc<Self>) -> bool {
        if self.stopped.load(Ordering::SeqCst) {
            tracing::warn!("heartbeat not started: registry client already stopped");
            return false;
        }
        let mut slot = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            tracing::warn!("heartbeat already running");
            return false;
        }

        let client = Arc::clone(self);
        let period = self.interval;
        *slot = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                let snapshot = client
                    .latest
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take()
                    .unwrap_or_default();
                client.send_heartbeat(snapshot).await;
            }
        }));
        tracing::info!(interval_secs = period.as_secs_f64(), "heartbeat started");
        true
    }

    /// Stop the periodic heartbeat and wait for the task to finish, then wait
    /// for any post-call heartbeats still in flight. Idempotent.
    pub async fn stop_heartbeat(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let handle = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
            // Cancelled is the expected outcome.
            let _ = handle.await;
            tracing::info!("heartbeat stopped");
        }

        let mut in_flight =
            std::mem::take(&mut *self.in_flight.lock().unwrap_or_else(PoisonError::into_inner));
        while in_flight.join_next().await.is_some() {}
    }

    pub fn is_heartbeat_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Stop heartbeating, then tell the registry the node is leaving.
    /// Safe to call more than once; only the first call notifies.
    pub async fn unregister(&self) {
        self.stop_heartbeat().await;
        if self.unregistered.swap(true, Ordering::SeqCst) {
            return;
        }
        let body = UnregisterBody {
            provider_id: &self.provider_id,
        };
        match self.post("/unregister", &body).await {
            Ok(()) => tracing::info!(provider_id = %self.provider_id, "unregistered from registry"),
            Err(e) => tracing::warn!(error = %e, "unregister failed (non-fatal)"),
        }
    }

    async fn post<T: Serialize>(&self, path: &'static str, body: &T) -> Result<(), RegistryError> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .http
            .post(&url)
            .timeout(self.request_timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| RegistryError::Request {
                path,
                message: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RegistryError::Rejected {
                path,
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}
