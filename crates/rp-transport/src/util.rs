//! Deadline and cancellation helpers shared by dial paths.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::dialer::DialError;

/// Bounds `fut` by both a deadline and a cancellation token; whichever
/// fires first wins and the in-flight operation is dropped with it.
pub async fn with_deadline<F, T>(
    timeout: Duration,
    cancel: &CancellationToken,
    fut: F,
) -> Result<T, DialError>
where
    F: Future<Output = Result<T, DialError>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(DialError::Cancelled),
        out = tokio::time::timeout(timeout, fut) => out.map_err(DialError::from)?,
    }
}
