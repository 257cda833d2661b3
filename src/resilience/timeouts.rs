//! Deadline and cancellation enforcement.
//!
//! # Responsibilities
//! - Race an operation against a deadline; whichever finishes first drops the other
//! - Detach a caller from an operation when its cancellation token fires
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities, so paused-clock tests control every deadline
//! - Dropping the losing future is the cancellation; spawned work must be aborted by its owner

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::error::ApiError;

/// Why an operation did not run to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Interrupted {
    #[error("deadline of {0:?} elapsed")]
    Elapsed(Duration),

    #[error("cancelled by caller")]
    Cancelled,
}

impl From<Interrupted> for ApiError {
    fn from(value: Interrupted) -> Self {
        match value {
            Interrupted::Elapsed(d) => ApiError::timeout(format!("no response within {:?}", d)),
            Interrupted::Cancelled => ApiError::Cancelled,
        }
    }
}

/// Run `fut` against a fixed deadline.
pub async fn with_deadline<F>(deadline: Duration, fut: F) -> Result<F::Output, Interrupted>
where
    F: Future,
{
    tokio::time::timeout(deadline, fut)
        .await
        .map_err(|_| Interrupted::Elapsed(deadline))
}

/// Run `fut` until it completes, `deadline` elapses, or `cancel` fires.
pub async fn run_cancellable<F>(
    fut: F,
    deadline: Option<Duration>,
    cancel: Option<&CancellationToken>,
) -> Result<F::Output, Interrupted>
where
    F: Future,
{
    let timed = async {
        match deadline {
            Some(d) => with_deadline(d, fut).await,
            None => Ok(fut.await),
        }
    };

    match cancel {
        Some(token) => {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(Interrupted::Cancelled),
                result = timed => result,
            }
        }
        None => timed.await,
    }
}
