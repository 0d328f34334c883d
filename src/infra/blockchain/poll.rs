//! Bounded confirmation polling.

use std::future::Future;

use tokio::time::Instant;
use tracing::debug;

use crate::domain::{AppError, ConfirmationOutcome, ConfirmationWait};

/// Probes until the transaction is included, the wait times out or the
/// cancel signal fires; then returns the last observed outcome.
///
/// Probe errors are returned as-is. A zero timeout probes exactly once.
pub async fn poll_confirmation<F, Fut>(
    wait: &ConfirmationWait,
    mut probe: F,
) -> Result<ConfirmationOutcome, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<ConfirmationOutcome, AppError>>,
{
    let deadline = Instant::now() + wait.timeout;
    let mut cancel = wait.cancel.clone();

    loop {
        let outcome = probe().await?;
        if matches!(outcome, ConfirmationOutcome::Included(_)) {
            return Ok(outcome);
        }
        if cancel.as_ref().is_some_and(|rx| *rx.borrow()) {
            debug!("confirmation wait cancelled");
            return Ok(outcome);
        }

        let now = Instant::now();
        if now >= deadline {
            return Ok(outcome);
        }
        let sleep_until = deadline.min(now + wait.poll_interval);

        match cancel.as_mut() {
            Some(rx) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(sleep_until) => {}
                    changed = rx.changed() => {
                        // A dropped sender can never cancel; stop watching it
                        if changed.is_err() {
                            cancel = None;
                        }
                    }
                }
            }
            None => tokio::time::sleep_until(sleep_until).await,
        }
    }
}
