//! Timeout helper.

use std::future::Future;
use std::time::Duration;

use crate::error::RuntimeError;

/// Run `future`, failing with [`RuntimeError::Timeout`] once `duration` elapses.
///
/// `None` waits indefinitely.
pub async fn with_timeout<T>(
    duration: Option<Duration>,
    future: impl Future<Output = Result<T, RuntimeError>>,
) -> Result<T, RuntimeError> {
    let Some(duration) = duration else {
        return future.await;
    };
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(RuntimeError::Timeout(duration.as_millis() as u64)),
    }
}
