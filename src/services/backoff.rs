use std::future::Future;

use tracing::warn;

use crate::settings::RetryPolicy;

/// Run `op` up to `policy.attempts` times with doubling delay between tries.
///
/// Only errors for which `retryable` returns true are retried; anything else
/// is returned immediately, as is the last error once attempts are spent.
/// Used by sub-requests that may race backend-side provisioning.
pub async fn retry_with_backoff<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    what: &str,
    mut op: F,
    retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let attempts = policy.attempts.max(1);
    let mut delay = policy.base_delay;
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < attempts && retryable(&err) => {
                warn!(what, attempt, error = %err, "Retrying after backoff");
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
