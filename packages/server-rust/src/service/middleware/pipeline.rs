//! Composes the invocation middleware around the executor.

use tower::ServiceBuilder;

use super::load_shed::{LoadShedLayer, LoadShedService};
use super::metrics::{MetricsLayer, MetricsService};
use super::timeout::{TimeoutLayer, TimeoutService};
use crate::service::config::ServerConfig;
use crate::service::executor::FunctionExecutor;

/// The assembled invocation stack. Cheap to clone; clones share the
/// load-shed semaphore.
pub type InvocationPipeline = LoadShedService<MetricsService<TimeoutService<FunctionExecutor>>>;

/// Builds the invocation pipeline.
///
/// Layer order (outermost to innermost):
/// 1. `LoadShedLayer` -- reject when every permit is held
/// 2. `MetricsLayer` -- time the call and count outcomes, timeouts included
/// 3. `TimeoutLayer` -- enforce the function deadline
#[must_use]
pub fn build_invocation_pipeline(config: &ServerConfig) -> InvocationPipeline {
    ServiceBuilder::new()
        .layer(LoadShedLayer::new(config.max_concurrent_functions))
        .layer(MetricsLayer)
        .layer(TimeoutLayer)
        .service(FunctionExecutor)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
