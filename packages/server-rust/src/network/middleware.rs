//! HTTP middleware stack for the function gateway.
//!
//! Middleware ordering follows the outer-to-inner convention: the first
//! layer listed is the outermost (processes the request first on the way
//! in, and the response last on the way out).

use std::time::Duration;

use axum::http::header::HeaderName;
use axum::http::{Method, StatusCode};
use tower::ServiceBuilder;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use super::config::NetworkConfig;

/// Request header carrying the per-request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Headers a LeanCloud SDK may send on a cross-origin call.
const ALLOWED_HEADERS: [&str; 21] = [
    "content-type",
    "x-avoscloud-application-id",
    "x-avoscloud-application-key",
    "x-avoscloud-application-production",
    "x-avoscloud-client-version",
    "x-avoscloud-request-sign",
    "x-avoscloud-session-token",
    "x-avoscloud-super-key",
    "x-lc-hook-key",
    "x-lc-id",
    "x-lc-key",
    "x-lc-prod",
    "x-lc-session",
    "x-lc-sign",
    "x-lc-ua",
    "x-requested-with",
    "x-uluru-application-id",
    "x-uluru-application-key",
    "x-uluru-application-production",
    "x-uluru-client-version",
    "x-uluru-session-token",
];

const CORS_MAX_AGE: Duration = Duration::from_secs(86_400);

type HttpLayers = tower::layer::util::Stack<
    PropagateRequestIdLayer,
    tower::layer::util::Stack<
        TimeoutLayer,
        tower::layer::util::Stack<
            CorsLayer,
            tower::layer::util::Stack<
                TraceLayer<
                    tower_http::classify::SharedClassifier<
                        tower_http::classify::ServerErrorsAsFailures,
                    >,
                >,
                tower::layer::util::Stack<
                    SetRequestIdLayer<MakeRequestUuid>,
                    tower::layer::util::Identity,
                >,
            >,
        >,
    >,
>;

/// Builds the HTTP-level Tower middleware stack.
///
/// **Middleware ordering (outermost to innermost):**
/// 1. `SetRequestId` -- assigns a UUID v4 `X-Request-Id` when absent
/// 2. `Tracing` -- one span per HTTP exchange
/// 3. `CORS` -- mirrored origin, answers preflights
/// 4. `Timeout` -- bounds the whole exchange with 408
/// 5. `PropagateRequestId` -- copies `X-Request-Id` onto the response
///
/// Function-level deadlines and load shedding live in the invocation
/// pipeline, not here.
#[must_use]
pub fn build_http_layers(config: &NetworkConfig) -> HttpLayers {
    let x_request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer(&config.cors_origins))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            config.request_timeout,
        ))
        .layer(PropagateRequestIdLayer::new(x_request_id))
        .into_inner()
}

/// `"*"` mirrors the request origin; otherwise only listed origins pass.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::mirror_request()
    } else {
        let parsed: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::HEAD,
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(AllowHeaders::list(
            ALLOWED_HEADERS.map(HeaderName::from_static),
        ))
        .max_age(CORS_MAX_AGE)
}
