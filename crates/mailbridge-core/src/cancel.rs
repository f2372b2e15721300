//! Caller-driven cancellation.

use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

/// Runs `fut` until it completes or `token` fires.
///
/// Store mutations run their critical section on a separate task, so a
/// canceled mutation is either fully applied or not applied at all.
///
/// # Errors
///
/// Returns [`Error::Canceled`] if the token fires first, otherwise the
/// future's own result.
pub async fn cancellable<T, F>(token: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        () = token.cancelled() => Err(Error::Canceled),
        result = fut => result,
    }
}
