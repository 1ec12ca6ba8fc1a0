//! Tower middleware layers for the invocation pipeline.
//!
//! - [`timeout`]: per-invocation deadline and cancellation
//! - [`metrics`]: tracing span plus `metrics` counters and histograms
//! - [`load_shed`]: semaphore-based concurrency limiting
//! - [`pipeline`]: composes the layers around the executor

pub mod load_shed;
pub mod metrics;
pub mod pipeline;
pub mod timeout;

pub use load_shed::LoadShedLayer;
pub use metrics::MetricsLayer;
pub use pipeline::{build_invocation_pipeline, InvocationPipeline};
pub use timeout::TimeoutLayer;
