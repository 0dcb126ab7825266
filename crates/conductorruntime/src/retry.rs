use conductorcore::ConductorError;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const BACKOFF_BASE_MS: u64 = 1000;
const BACKOFF_CAP_MS: u64 = 5000;

/// A failed attempt, with whatever diagnostic detail the executable left
#[derive(Debug)]
pub struct AttemptFailure {
    pub error: ConductorError,
    pub stack: Option<String>,
}

impl AttemptFailure {
    pub fn new(error: ConductorError) -> Self {
        Self { error, stack: None }
    }
}

impl From<ConductorError> for AttemptFailure {
    fn from(error: ConductorError) -> Self {
        Self::new(error)
    }
}

/// Delay before retry number `attempt + 1`: `min(1000 * 2^attempt, 5000)` ms
pub fn backoff_delay(attempt: u32) -> Duration {
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    Duration::from_millis(BACKOFF_BASE_MS.saturating_mul(factor).min(BACKOFF_CAP_MS))
}

/// Run `op` up to `retries + 1` times. Only retryable errors are retried,
/// and the same inputs are used on every attempt.
pub async fn retry_with_backoff<T, F, Fut>(
    retries: u32,
    cancellation: &CancellationToken,
    mut op: F,
) -> Result<T, AttemptFailure>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AttemptFailure>>,
{
    let mut attempt = 0;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(failure) if failure.error.is_retryable() && attempt < retries => {
                let delay = backoff_delay(attempt);
                tracing::warn!(
                    attempt = attempt + 1,
                    retries,
                    delay_ms = delay.as_millis() as u64,
                    "Attempt failed, retrying: {}",
                    failure.error
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancellation.cancelled() => {
                        return Err(AttemptFailure::new(ConductorError::Cancelled));
                    }
                }
                attempt += 1;
            }
            Err(failure) => return Err(failure),
        }
    }
}
