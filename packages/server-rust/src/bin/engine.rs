//! `lean-engine`: runs the function gateway with a small set of demo
//! functions.
//!
//! Credentials come from `APP_ID`, `APP_KEY`, `APP_MASTER_KEY` and
//! `APP_HOOK_KEY`. When `API_SERVER` is set, sessions are resolved against
//! the store.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use lean_core::{Client, Value};
use lean_server::{
    CredentialSet, Dispatcher, FunctionError, FunctionRegistry, FunctionRegistryBuilder,
    FunctionRequest, FunctionResult, NetworkConfig, NetworkModule, ServerConfig, TlsConfig,
    Verifier,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "lean-engine")]
#[command(about = "LeanEngine cloud function gateway")]
struct Args {
    #[arg(long, env = "LEANCLOUD_APP_HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "LEANCLOUD_APP_PORT", default_value_t = 3000)]
    port: u16,

    /// Emit logs as JSON lines.
    #[arg(long, env = "LEAN_LOG_JSON")]
    json_logs: bool,

    /// Serve Prometheus metrics on this address.
    #[arg(long, env = "LEAN_METRICS_ADDR")]
    metrics_addr: Option<SocketAddr>,

    /// Function deadline in milliseconds.
    #[arg(long, env = "LEAN_FUNCTION_TIMEOUT_MS", default_value_t = 15_000)]
    function_timeout_ms: u64,

    #[arg(long, env = "LEAN_MAX_CONCURRENT_FUNCTIONS", default_value_t = 1000)]
    max_concurrent_functions: u32,

    #[arg(long, env = "LEAN_TLS_CERT", requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    #[arg(long, env = "LEAN_TLS_KEY", requires = "tls_cert")]
    tls_key: Option<PathBuf>,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

/// Extra time the HTTP layer allows past the function deadline, so a timed
/// out call still answers with its JSON error body.
const HTTP_TIMEOUT_MARGIN: Duration = Duration::from_secs(5);

fn http_timeout(function_timeout_ms: u64) -> Duration {
    Duration::from_millis(function_timeout_ms) + HTTP_TIMEOUT_MARGIN
}

async fn hello(request: FunctionRequest) -> FunctionResult {
    let name = request
        .params
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("world")
        .to_string();
    Ok(Value::from(format!("Hello {name}!")))
}

/// Rejects todos without a title and trims the one given.
async fn todo_before_save(request: FunctionRequest) -> FunctionResult {
    let mut object = request
        .object
        .ok_or_else(|| FunctionError::new(400, "missing object"))?;
    let title = object
        .get("title")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| FunctionError::new(142, "title is required"))?
        .to_string();
    object.set("title", title);
    Ok(Value::from(object))
}

fn registry() -> Result<FunctionRegistry> {
    let mut builder = FunctionRegistryBuilder::new();
    builder
        .define("hello", hello)?
        .before_save("Todo", todo_before_save)?;
    Ok(builder.seal())
}

/// Waits for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", err);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => error!("failed to install SIGTERM handler: {}", err),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received SIGINT, initiating graceful shutdown"),
        () = terminate => info!("received SIGTERM, initiating graceful shutdown"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs);

    if let Some(addr) = args.metrics_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to start Prometheus exporter")?;
        info!(%addr, "serving Prometheus metrics");
    }

    let credentials = CredentialSet::from_env();
    if credentials.app_id.is_none() {
        warn!("APP_ID is not set; every authenticated call will be rejected");
    }

    let server_config = ServerConfig {
        function_timeout_ms: args.function_timeout_ms,
        max_concurrent_functions: args.max_concurrent_functions,
    };
    let mut dispatcher = Dispatcher::new(registry()?, Verifier::new(credentials), &server_config);
    match Client::from_env() {
        Ok(client) => dispatcher = dispatcher.with_user_resolver(Arc::new(client)),
        Err(err) => warn!(error = %err, "store client unavailable; sessions will not be resolved"),
    }

    let tls = match (args.tls_cert, args.tls_key) {
        (Some(cert_path), Some(key_path)) => Some(TlsConfig {
            cert_path,
            key_path,
        }),
        _ => None,
    };
    let network_config = NetworkConfig {
        host: args.host,
        port: args.port,
        tls,
        request_timeout: http_timeout(args.function_timeout_ms),
        ..NetworkConfig::default()
    };

    let mut module = NetworkModule::new(network_config, dispatcher);
    let port = module.start().await?;
    info!(port, "lean-engine listening");

    module.serve(shutdown_signal()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_timeout_outlasts_function_deadline() {
        assert_eq!(http_timeout(15_000), Duration::from_secs(20));
        assert!(http_timeout(30_000) > Duration::from_millis(30_000));
    }
}
