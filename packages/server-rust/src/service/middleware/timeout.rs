//! Deadline enforcement for function invocations.
//!
//! Races the inner service against `ctx.timeout_ms`. On expiry the call
//! fails with `DispatchError::Timeout` and the request's cancellation token
//! fires; the handler task itself is left to finish on its own.

use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::future::BoxFuture;
use lean_core::Value;
use tower::{Layer, Service};

use crate::service::invocation::{DispatchError, Invocation};

// ---------------------------------------------------------------------------
// TimeoutLayer
// ---------------------------------------------------------------------------

/// Tower layer reading the deadline from each invocation's context.
#[derive(Debug, Clone)]
pub struct TimeoutLayer;

impl<S> Layer<S> for TimeoutLayer {
    type Service = TimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimeoutService { inner }
    }
}

// ---------------------------------------------------------------------------
// TimeoutService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TimeoutService<S> {
    inner: S,
}

impl<S> Service<Invocation> for TimeoutService<S>
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
        let timeout_ms = invocation.ctx.timeout_ms;
        let name = invocation.ctx.function.clone();
        let cancel = invocation.ctx.cancel.clone();
        let fut = self.inner.call(invocation);
        Box::pin(async move {
            match tokio::time::timeout(Duration::from_millis(timeout_ms), fut).await {
                Ok(result) => result,
                Err(_elapsed) => {
                    cancel.cancel();
                    Err(DispatchError::Timeout { name, timeout_ms })
                }
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use tokio::sync::oneshot;
    use tokio::time::Instant;
    use tower::ServiceExt;

    use super::*;
    use crate::service::executor::FunctionExecutor;
    use crate::service::invocation::{test_invocation, FunctionError, FunctionRequest};

    #[tokio::test(start_paused = true)]
    async fn completes_within_deadline() {
        let handler = |_request: FunctionRequest| async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok::<_, FunctionError>(Value::from(1))
        };
        let svc = TimeoutLayer.layer(FunctionExecutor);
        let value = svc.oneshot(test_invocation(handler, 1000)).await.unwrap();
        assert_eq!(value, Value::from(1));
    }

    #[tokio::test(start_paused = true)]
    async fn fails_no_earlier_than_deadline() {
        let handler = |_request: FunctionRequest| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, FunctionError>(Value::Null)
        };
        let invocation = test_invocation(handler, 15_000);
        let token = invocation.ctx.cancel.clone();

        let started = Instant::now();
        let err = TimeoutLayer
            .layer(FunctionExecutor)
            .oneshot(invocation)
            .await
            .unwrap_err();

        assert!(started.elapsed() >= Duration::from_millis(15_000));
        assert!(matches!(
            err,
            DispatchError::Timeout {
                timeout_ms: 15_000,
                ..
            }
        ));
        assert!(token.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn handler_observes_cancellation() {
        let (tx, rx) = oneshot::channel();
        let tx = std::sync::Mutex::new(Some(tx));
        let handler = move |request: FunctionRequest| {
            let tx = tx.lock().unwrap().take();
            async move {
                request.cancel.cancelled().await;
                if let Some(tx) = tx {
                    let _ = tx.send(());
                }
                Ok::<_, FunctionError>(Value::Null)
            }
        };

        let err = TimeoutLayer
            .layer(FunctionExecutor)
            .oneshot(test_invocation(handler, 50))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Timeout { .. }));
        rx.await.unwrap();
    }
}
