//! Cancellation and deadline wrappers for fallible futures.

use crate::error::{FsError, FsResult};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Resolve `fut`, or fail with `Aborted` as soon as `token` fires.
pub async fn abortable<T, F>(token: &CancellationToken, fut: F) -> FsResult<T>
where
    F: Future<Output = FsResult<T>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(FsError::aborted("aborted")),
        r = fut => r,
    }
}

/// Resolve `fut`, or fail with `Timeout` after `limit`.
pub async fn with_timeout<T, F>(limit: Duration, what: &str, fut: F) -> FsResult<T>
where
    F: Future<Output = FsResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(r) => r,
        Err(_) => Err(FsError::timeout(format!("{} timed out after {:?}", what, limit))),
    }
}
