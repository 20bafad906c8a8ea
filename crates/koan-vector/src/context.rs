//! Per-call context for vector operations.

use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::error::{VectorError, VectorResult};

/// Context passed to every repository operation.
///
/// Carries the caller's cancellation signal. Adapters race remote calls and
/// retry delays against it and give up with [`VectorError::Cancelled`] once it
/// fires.
#[derive(Debug, Clone, Default)]
pub struct VectorContext {
    cancellation: CancellationToken,
}

impl VectorContext {
    /// Creates a context that is never cancelled unless [`cancel`](Self::cancel) is called.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context driven by an existing cancellation token.
    pub fn with_cancellation(cancellation: CancellationToken) -> Self {
        Self { cancellation }
    }

    /// Returns the cancellation token.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Cancels every operation sharing this context.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Returns `true` once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Fails fast when the context is already cancelled.
    pub fn check(&self, operation: &'static str) -> VectorResult<()> {
        if self.is_cancelled() {
            return Err(VectorError::cancelled(operation));
        }
        Ok(())
    }

    /// Runs `future` unless cancellation fires first.
    pub async fn run<F, T>(&self, operation: &'static str, future: F) -> VectorResult<T>
    where
        F: Future<Output = T>,
    {
        tokio::select! {
            biased;

            () = self.cancellation.cancelled() => Err(VectorError::cancelled(operation)),
            output = future => Ok(output),
        }
    }

    /// Sleeps for `duration` unless cancellation fires first.
    pub async fn sleep(
        &self,
        operation: &'static str,
        duration: std::time::Duration,
    ) -> VectorResult<()> {
        self.run(operation, tokio::time::sleep(duration)).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn run_completes_when_not_cancelled() {
        let ctx = VectorContext::new();
        let value = ctx.run("test", async { 7 }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn run_yields_cancelled_once_token_fires() {
        let ctx = VectorContext::new();
        ctx.cancel();
        let err = ctx
            .sleep("upsert", Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(ctx.check("upsert").is_err());
    }
}
