//! Retry with exponential backoff.

use carpenter_core::Result;
use carpenter_core::retry::RetryPolicy;
use std::future::Future;
use tracing::{debug, warn};

/// Run `operation` until it succeeds or `policy` runs out of attempts.
///
/// Every error is retried; the last one is returned once the budget is
/// spent. Errors that must not be retried have to be raised before calling
/// this.
pub async fn attempt<T, F, Fut>(policy: &RetryPolicy, step: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts();
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(step, attempt, "Step succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if attempt >= max_attempts => {
                warn!(step, attempts = attempt, error = %e, "Step failed, giving up");
                return Err(e);
            }
            Err(e) => {
                let delay = policy.delay_for(attempt);
                warn!(
                    step,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Step failed, retrying"
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
        }
    }
}
