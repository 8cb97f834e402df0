use serde::Serialize;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Point-in-time view of node health and earnings.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStats {
    #[serde(rename = "uptime", serialize_with = "whole_secs")]
    pub uptime: Duration,
    pub requests_served: u64,
    pub total_earnings: f64,
    /// Milliseconds, over successful calls.
    pub average_latency: f64,
    pub error_rate: f64,
    pub error_count: u64,
}

fn whole_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_secs())
}

/// Usage triple sent to the registry with each heartbeat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    /// Latency of the most recent call, in milliseconds.
    pub latency: f64,
    pub requests_served: u64,
    pub errors: u64,
}

#[derive(Debug, Default)]
struct Counters {
    requests_served: u64,
    error_count: u64,
    total_earnings: f64,
    cumulative_latency_ms: f64,
}

/// Node-wide counters. Every mutation takes the same lock, so derived values
/// always agree with the counters they are computed from.
pub struct StatsAggregator {
    started_at: Instant,
    counters: Mutex<Counters>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            counters: Mutex::new(Counters::default()),
        }
    }

    /// Record a completed call. Returns the snapshot to heartbeat with.
    pub fn record_success(&self, price: f64, latency: Duration) -> HealthSnapshot {
        let latency_ms = latency.as_secs_f64() * 1000.0;
        let mut c = self.lock();
        c.requests_served += 1;
        c.total_earnings += price;
        c.cumulative_latency_ms += latency_ms;
        HealthSnapshot {
            latency: latency_ms,
            requests_served: c.requests_served,
            errors: c.error_count,
        }
    }

    pub fn record_failure(&self) {
        self.lock().error_count += 1;
    }

    pub fn snapshot(&self) -> ServerStats {
        let c = self.lock();
        let (average_latency, error_rate) = if c.requests_served == 0 {
            (0.0, 0.0)
        } else {
            let served = c.requests_served as f64;
            (c.cumulative_latency_ms / served, c.error_count as f64 / served)
        };
        ServerStats {
            uptime: self.started_at.elapsed(),
            requests_served: c.requests_served,
            total_earnings: c.total_earnings,
            average_latency,
            error_rate,
            error_count: c.error_count,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self::new()
    }
}
