//! Innermost service of the invocation pipeline: runs the handler.

use std::task::{Context, Poll};

use futures_util::future::BoxFuture;
use lean_core::Value;
use tower::Service;

use super::invocation::{DispatchError, Invocation};

/// Runs each handler on its own tokio task.
///
/// The task owns the invocation's concurrency permit, so a handler that
/// outlives its deadline keeps counting against the load-shed limit until
/// it actually returns.
#[derive(Debug, Clone, Copy, Default)]
pub struct FunctionExecutor;

impl Service<Invocation> for FunctionExecutor {
    type Response = Value;
    type Error = DispatchError;
    type Future = BoxFuture<'static, Result<Value, DispatchError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, invocation: Invocation) -> Self::Future {
        let (ctx, handler, request, permit) = invocation.into_parts();
        let task = tokio::spawn(async move {
            let result = handler.call(request).await;
            drop(permit);
            result
        });

        Box::pin(async move {
            match task.await {
                Ok(result) => result.map_err(DispatchError::from),
                Err(join_err) => Err(DispatchError::Internal(anyhow::anyhow!(
                    "cloud function {} did not complete: {join_err}",
                    ctx.function
                ))),
            }
        })
    }
}
