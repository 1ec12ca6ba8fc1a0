//! The function gateway: every `/1.1/functions/*` and `/1.1/call/*` call
//! lands here.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;

use super::AppState;
use crate::auth::CredentialHeaders;
use crate::network::middleware::REQUEST_ID_HEADER;
use crate::service::{CallKind, DispatchError, InboundCall};

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Writes `{"code", "error"}` with the given status.
fn error_response(status: StatusCode, code: i64, message: &str) -> Response {
    json_response(status, &json!({ "code": code, "error": message }))
}

fn json_response(status: StatusCode, body: &serde_json::Value) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE))],
        body.to_string(),
    )
        .into_response()
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let status = self.status();
        error_response(status, self.code(), &self.to_string())
    }
}

/// Fallback handler for the function routes.
///
/// Preflights are answered with 200 before anything else. Calls arriving
/// while the gateway is not ready get 503. Unknown paths get 404.
pub async fn function_gateway(State(state): State<AppState>, request: Request) -> Response {
    if request.method() == Method::OPTIONS {
        return StatusCode::OK.into_response();
    }
    if !state.shutdown.health_state().is_accepting() {
        let status = StatusCode::SERVICE_UNAVAILABLE;
        return error_response(status, i64::from(status.as_u16()), "server is not accepting calls");
    }
    let _in_flight = state.shutdown.in_flight_guard();

    let Some(kind) = CallKind::parse(request.uri().path()) else {
        let status = StatusCode::NOT_FOUND;
        return error_response(
            status,
            i64::from(status.as_u16()),
            &format!("no route for {}", request.uri().path()),
        );
    };

    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_default();
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let headers = CredentialHeaders::from_headers(request.headers());

    let body = match read_json_body(request, state.config.max_body_bytes).await {
        Ok(body) => body,
        Err(err) => return err.into_response(),
    };

    let call = InboundCall {
        kind,
        headers,
        body,
        remote_addr,
        request_id,
    };
    match state.dispatcher.dispatch(call).await {
        Ok(body) => json_response(StatusCode::OK, &body),
        Err(err) => err.into_response(),
    }
}

/// An empty body is `None`; anything else must be JSON.
async fn read_json_body(
    request: Request,
    limit: usize,
) -> Result<Option<serde_json::Value>, DispatchError> {
    let bytes = axum::body::to_bytes(request.into_body(), limit)
        .await
        .map_err(|e| anyhow::anyhow!("unable to read request body: {e}"))?;
    if bytes.is_empty() {
        return Ok(None);
    }
    let value = serde_json::from_slice(&bytes)
        .map_err(|e| anyhow::anyhow!("request body is not valid JSON: {e}"))?;
    Ok(Some(value))
}
