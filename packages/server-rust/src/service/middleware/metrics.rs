//! Per-invocation instrumentation.
//!
//! Each call runs inside a `function` span that records `duration_ms` and
//! `outcome`, and feeds the `lean_function_calls_total` counter and the
//! `lean_function_duration_seconds` histogram.

use std::task::{Context, Poll};
use std::time::Instant;

use futures_util::future::BoxFuture;
use lean_core::Value;
use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use crate::service::invocation::{DispatchError, Invocation};

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

/// Outcome label for a finished invocation.
fn outcome(result: &Result<Value, DispatchError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(DispatchError::Function { .. }) => "function_error",
        Err(DispatchError::Timeout { .. }) => "timeout",
        Err(_) => "error",
    }
}

impl<S> Service<Invocation> for MetricsService<S>
where
    S: Service<Invocation, Response = Value, Error = DispatchError> + Send,
    S::Future: Send + 'static,
{
    type Response = Value;
    type Error = DispatchError;
    type Future = BoxFuture<'static, Result<Value, DispatchError>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, invocation: Invocation) -> Self::Future {
        let function = invocation.ctx.function.clone();
        let kind = invocation.ctx.kind;

        let span = info_span!(
            "function",
            function = %function,
            kind = kind,
            call_id = %invocation.ctx.call_id,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(invocation);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let elapsed = start.elapsed();
                let outcome = outcome(&result);

                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = elapsed.as_millis() as u64;
                let span = tracing::Span::current();
                span.record("duration_ms", duration_ms);
                span.record("outcome", outcome);

                ::metrics::counter!(
                    "lean_function_calls_total",
                    "function" => function.clone(),
                    "kind" => kind,
                    "outcome" => outcome,
                )
                .increment(1);
                ::metrics::histogram!(
                    "lean_function_duration_seconds",
                    "function" => function,
                    "kind" => kind,
                )
                .record(elapsed.as_secs_f64());

                tracing::debug!(duration_ms, outcome, "function complete");
                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use tower::ServiceExt;

    use super::*;
    use crate::service::executor::FunctionExecutor;
    use crate::service::invocation::{test_invocation, FunctionError, FunctionRequest};

    #[tokio::test]
    async fn passes_results_through() {
        let handler = |request: FunctionRequest| async move {
            Ok::<_, FunctionError>(Value::from(request.params.is_null()))
        };
        let value = MetricsLayer
            .layer(FunctionExecutor)
            .oneshot(test_invocation(handler, 1000))
            .await
            .unwrap();
        assert_eq!(value, Value::from(true));
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(outcome(&Ok(Value::Null)), "ok");
        assert_eq!(
            outcome(&Err(DispatchError::Function {
                code: 1,
                message: String::new()
            })),
            "function_error"
        );
        assert_eq!(
            outcome(&Err(DispatchError::Timeout {
                name: "f".to_string(),
                timeout_ms: 1
            })),
            "timeout"
        );
        assert_eq!(outcome(&Err(DispatchError::Overloaded)), "error");
    }
}
