use prometheus::{Counter, Histogram, HistogramOpts, IntCounterVec, Opts, Registry};
use std::sync::{LazyLock, Once};

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Call outcomes: success or a rejection code
pub static CALLS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("tollgate_calls_total", "Metered calls by outcome"),
        &["outcome"],
    )
    .expect("valid metric definition")
});

// Payment verification results: free, verified, rejected
pub static PAYMENTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("tollgate_payments_total", "Payment proofs by verification result"),
        &["result"],
    )
    .expect("valid metric definition")
});

pub static EARNINGS_TOTAL: LazyLock<Counter> = LazyLock::new(|| {
    Counter::new(
        "tollgate_earnings_total",
        "Sum of prices charged for successful calls",
    )
    .expect("valid metric definition")
});

pub static HANDLER_LATENCY: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new("tollgate_handler_latency_seconds", "Handler execution latency")
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
    )
    .expect("valid metric definition")
});

// Registry heartbeats: sent, failed
pub static HEARTBEATS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("tollgate_heartbeats_total", "Registry heartbeats by result"),
        &["result"],
    )
    .expect("valid metric definition")
});

static REGISTER: Once = Once::new();

/// Register all metrics with the registry. Safe to call more than once.
pub fn register_metrics() {
    REGISTER.call_once(|| {
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(CALLS_TOTAL.clone()),
            Box::new(PAYMENTS_TOTAL.clone()),
            Box::new(EARNINGS_TOTAL.clone()),
            Box::new(HANDLER_LATENCY.clone()),
            Box::new(HEARTBEATS_TOTAL.clone()),
        ];
        for collector in collectors {
            if let Err(e) = REGISTRY.register(collector) {
                tracing::error!(error = %e, "failed to register metric");
            }
        }
    });
}
