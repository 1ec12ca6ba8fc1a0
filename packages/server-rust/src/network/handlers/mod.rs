//! Axum handlers for the function gateway.
//!
//! `AppState` is the shared state carried through axum extractors.

pub mod functions;
pub mod health;

pub use functions::function_gateway;
pub use health::{health_handler, liveness_handler, ping_handler, readiness_handler};

use std::sync::Arc;
use std::time::Instant;

use super::{NetworkConfig, ShutdownController};
use crate::service::Dispatcher;

/// Shared application state passed to all axum handlers via `State` extraction.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub shutdown: Arc<ShutdownController>,
    pub config: Arc<NetworkConfig>,
    /// Process start, for uptime.
    pub start_time: Instant,
}
