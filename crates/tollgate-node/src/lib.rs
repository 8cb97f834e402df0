//! Pay-per-call API node.
//!
//! Incoming `/call` requests carry a payment proof in `X-Payment`. The
//! [`MeteredDispatcher`] verifies it against the ledger, checks that the
//! claimed amount covers the API's price, runs the registered handler under
//! its timeout, and accounts the result. A [`RegistryClient`] advertises the
//! node to a discovery registry and keeps it informed with heartbeats.

pub mod catalog;
pub mod config;
pub mod cors;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod metrics;
pub mod middleware;
pub mod registry;
pub mod routes;
pub mod state;
pub mod stats;
pub mod upstream;

pub use config::NodeConfig;
pub use dispatcher::{CallReceipt, InboundCall, MeteredDispatcher};
pub use error::{CallFailure, CallRejection};
pub use handler::{
    handler_fn, ApiHandler, EchoHandler, HandlerError, HandlerOptions, HandlerRegistry, Params,
    RateLimit,
};
pub use registry::{Listing, RegistryClient, RegistryError};
pub use state::AppState;
pub use stats::{HealthSnapshot, ServerStats, StatsAggregator};
