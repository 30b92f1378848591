//! Periodic sweep loop shared by the heartbeat and cleanup controllers.

use std::fmt::{Debug, Display};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::lifecycle::LifecycleError;
use crate::store::StoreError;

/// Errors raised by a single sweep.
#[derive(Debug, Error)]
pub enum SweepError {
    /// Persistence failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Disconnect failed.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

/// Run `sweep` every `interval` until `token` is cancelled.
///
/// Cancellation is only observed between sweeps, so a sweep in progress
/// always completes. Failed sweeps are logged and the loop carries on.
/// Returns the number of sweeps run.
pub async fn run_daemon<F, Fut, T, E>(
    name: &'static str,
    interval: Duration,
    token: CancellationToken,
    mut sweep: F,
) -> usize
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    T: Debug,
    E: Display,
{
    info!(daemon = name, interval_ms = interval.as_millis() as u64, "Daemon started");

    let mut sweeps = 0;
    while !token.is_cancelled() {
        match sweep().await {
            Ok(report) => debug!(daemon = name, ?report, "Sweep complete"),
            Err(e) => error!(daemon = name, error = %e, "Sweep failed"),
        }
        sweeps += 1;

        tokio::select! {
            () = token.cancelled() => break,
            () = tokio::time::sleep(interval) => {}
        }
    }

    info!(daemon = name, sweeps, "Daemon stopped");
    sweeps
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_stops_after_current_sweep() {
        let token = CancellationToken::new();
        let mut calls = 0;

        let sweeps = run_daemon("test", Duration::from_secs(1), token.clone(), || {
            calls += 1;
            if calls == 3 {
                token.cancel();
            }
            let n = calls;
            async move { Ok::<_, String>(n) }
        })
        .await;

        assert_eq!(sweeps, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_continues_after_failure() {
        let token = CancellationToken::new();
        let mut calls = 0;

        let sweeps = run_daemon("test", Duration::from_millis(10), token.clone(), || {
            calls += 1;
            let result = if calls < 3 {
                Err(format!("failure {calls}"))
            } else {
                token.cancel();
                Ok(())
            };
            async move { result }
        })
        .await;

        assert_eq!(sweeps, 3);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let token = CancellationToken::new();
        token.cancel();

        let sweeps = run_daemon("test", Duration::from_secs(1), token, || async {
            Ok::<_, String>(())
        })
        .await;
        assert_eq!(sweeps, 0);
    }
}
