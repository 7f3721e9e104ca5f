//! Cancellation helpers shared by every suspension point

use std::future::Future;
use std::time::Duration;

pub use tokio_util::sync::CancellationToken;

use crate::error::{StreamError, StreamResult};

/// Sleep for `duration`, waking early with [`StreamError::Cancelled`] if `cancel` fires.
pub async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> StreamResult<()> {
    if cancel.is_cancelled() {
        return Err(StreamError::Cancelled);
    }
    if duration.is_zero() {
        return Ok(());
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StreamError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

/// Run `fut` to completion unless `cancel` fires first.
pub async fn or_cancel<F>(fut: F, cancel: &CancellationToken) -> StreamResult<F::Output>
where
    F: Future,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StreamError::Cancelled),
        out = fut => Ok(out),
    }
}
