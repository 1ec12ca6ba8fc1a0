//! Types carried through the invocation pipeline.

use std::sync::Arc;

use http::StatusCode;
use lean_core::{CodecError, Object, User, Value};
use tokio::sync::OwnedSemaphorePermit;
use tokio_util::sync::CancellationToken;

use super::registry::CloudFunction;

/// Transport metadata exposed to handlers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMeta {
    pub remote_addr: String,
}

/// Envelope handed to a cloud function.
#[derive(Debug, Clone)]
pub struct FunctionRequest {
    /// Decoded request body; `Null` when the body was empty.
    pub params: Value,
    /// Set only when the function fetches users and a session resolved.
    pub current_user: Option<User>,
    pub session_token: Option<String>,
    pub meta: RequestMeta,
    /// The object under mutation, for class hooks.
    pub object: Option<Object>,
    /// Cancelled when the invocation deadline expires.
    pub cancel: CancellationToken,
}

impl FunctionRequest {
    #[must_use]
    pub fn new(params: Value) -> Self {
        Self {
            params,
            current_user: None,
            session_token: None,
            meta: RequestMeta::default(),
            object: None,
            cancel: CancellationToken::new(),
        }
    }
}

/// Failure reported by a cloud function.
#[derive(Debug, thiserror::Error)]
pub enum FunctionError {
    /// Caller-facing error with an application code.
    #[error("{message}")]
    Function { code: i64, message: String },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl FunctionError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self::Function {
            code,
            message: message.into(),
        }
    }
}

/// Result type of a cloud function.
pub type FunctionResult = Result<Value, FunctionError>;

/// Every way a dispatched call can fail.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("{reason}")]
    Unauthorized { reason: String },
    #[error("no such cloud function {name}")]
    NotFound { name: String },
    #[error("{message}")]
    Function { code: i64, message: String },
    #[error("LeanEngine: /1.1/functions/{name} : function timeout ({timeout_ms}ms)")]
    Timeout { name: String, timeout_ms: u64 },
    #[error("server overloaded, try again later")]
    Overloaded,
    #[error("unable to decode request: {0}")]
    Decode(#[from] CodecError),
    #[error("unable to resolve current user: {0}")]
    UserResolution(#[source] lean_core::Error),
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl DispatchError {
    /// Application code for a timed-out function.
    pub const TIMEOUT_CODE: i64 = 124;

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Function { .. } => StatusCode::BAD_REQUEST,
            Self::Timeout { .. } => StatusCode::REQUEST_TIMEOUT,
            Self::Overloaded => StatusCode::SERVICE_UNAVAILABLE,
            Self::Decode(_) | Self::UserResolution(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// The `code` member of the error body. Function errors keep their own
    /// code; everything else reports its HTTP status.
    #[must_use]
    pub fn code(&self) -> i64 {
        match self {
            Self::Function { code, .. } => *code,
            Self::Timeout { .. } => Self::TIMEOUT_CODE,
            other => i64::from(other.status().as_u16()),
        }
    }
}

impl From<FunctionError> for DispatchError {
    fn from(err: FunctionError) -> Self {
        match err {
            FunctionError::Function { code, message } => Self::Function { code, message },
            FunctionError::Internal(source) => Self::Internal(source),
        }
    }
}

/// Per-call data the middleware layers read.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    /// Request id, used to correlate logs.
    pub call_id: String,
    /// Registered function name.
    pub function: String,
    /// `function`, `rpc` or `hook`.
    pub kind: &'static str,
    pub timeout_ms: u64,
    pub cancel: CancellationToken,
}

/// A resolved handler plus its envelope, ready to run.
pub struct Invocation {
    pub ctx: InvocationContext,
    handler: Arc<dyn CloudFunction>,
    request: FunctionRequest,
    permit: Option<OwnedSemaphorePermit>,
}

impl Invocation {
    /// The request's cancellation token becomes the context's token.
    #[must_use]
    pub fn new(
        call_id: impl Into<String>,
        function: impl Into<String>,
        kind: &'static str,
        timeout_ms: u64,
        handler: Arc<dyn CloudFunction>,
        request: FunctionRequest,
    ) -> Self {
        Self {
            ctx: InvocationContext {
                call_id: call_id.into(),
                function: function.into(),
                kind,
                timeout_ms,
                cancel: request.cancel.clone(),
            },
            handler,
            request,
            permit: None,
        }
    }

    /// Attaches a concurrency permit that lives as long as the handler runs.
    pub(crate) fn hold_permit(&mut self, permit: OwnedSemaphorePermit) {
        self.permit = Some(permit);
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        InvocationContext,
        Arc<dyn CloudFunction>,
        FunctionRequest,
        Option<OwnedSemaphorePermit>,
    ) {
        (self.ctx, self.handler, self.request, self.permit)
    }
}

impl std::fmt::Debug for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invocation")
            .field("ctx", &self.ctx)
            .field("holds_permit", &self.permit.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) fn test_invocation(handler: impl CloudFunction, timeout_ms: u64) -> Invocation {
    Invocation::new(
        "test-call",
        "test",
        "function",
        timeout_ms,
        Arc::new(handler),
        FunctionRequest::new(Value::Null),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_names_function_path() {
        let err = DispatchError::Timeout {
            name: "slow".to_string(),
            timeout_ms: 15_000,
        };
        assert_eq!(
            err.to_string(),
            "LeanEngine: /1.1/functions/slow : function timeout (15000ms)"
        );
    }

    #[test]
    fn function_errors_keep_their_classification() {
        let caller: DispatchError = FunctionError::new(142, "title required").into();
        assert!(matches!(caller, DispatchError::Function { code: 142, .. }));
        assert_eq!(caller.to_string(), "title required");

        let internal: DispatchError = FunctionError::from(anyhow::anyhow!("db down")).into();
        assert!(matches!(internal, DispatchError::Internal(_)));
    }

    #[test]
    fn status_and_code_mapping() {
        let function = DispatchError::Function {
            code: 142,
            message: String::new(),
        };
        assert_eq!(function.status(), StatusCode::BAD_REQUEST);
        assert_eq!(function.code(), 142);

        let timeout = DispatchError::Timeout {
            name: "slow".to_string(),
            timeout_ms: 1,
        };
        assert_eq!(timeout.status(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(timeout.code(), 124);

        let missing = DispatchError::NotFound {
            name: "x".to_string(),
        };
        assert_eq!(missing.code(), 404);
        assert_eq!(DispatchError::Overloaded.code(), 503);
    }
}
