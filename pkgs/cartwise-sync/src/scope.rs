//! Structured cancellation for fetches bound to a component's lifetime

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{ApiError, SyncError};

/// Run a request inside a scope
///
/// Resolves to `Cancelled` if the scope ends first, or if it ended while
/// the response was in flight, so a stale response never reaches state.
pub(crate) async fn run_scoped<T, F>(scope: &CancellationToken, request: F) -> Result<T, SyncError>
where
    F: Future<Output = Result<T, ApiError>>,
{
    tokio::select! {
        _ = scope.cancelled() => Err(SyncError::Cancelled),
        result = request => {
            let value = result?;
            if scope.is_cancelled() {
                Err(SyncError::Cancelled)
            } else {
                Ok(value)
            }
        }
    }
}

/// Sleep unless the scope ends first; returns false when cancelled
pub(crate) async fn sleep_scoped(scope: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = scope.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_completed_request_passes_through() {
        let scope = CancellationToken::new();
        let value = run_scoped(&scope, async { Ok::<_, ApiError>(7) }).await;
        assert_eq!(value.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_cancelled_scope_discards_result() {
        let scope = CancellationToken::new();
        scope.cancel();
        let value = run_scoped(&scope, async { Ok::<_, ApiError>(7) }).await;
        assert!(matches!(value, Err(SyncError::Cancelled)));
    }

    #[tokio::test]
    async fn test_api_errors_are_converted() {
        let scope = CancellationToken::new();
        let value: Result<u32, _> = run_scoped(&scope, async {
            Err(ApiError::Unavailable("down".to_string()))
        })
        .await;
        assert!(matches!(value, Err(SyncError::Api(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_interrupted_by_cancel() {
        let scope = CancellationToken::new();
        let child = scope.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            child.cancel();
        });
        assert!(!sleep_scoped(&scope, Duration::from_secs(60)).await);
        assert!(sleep_scoped(&CancellationToken::new(), Duration::from_millis(1)).await);
    }
}
