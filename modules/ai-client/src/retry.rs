use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::AiError;

/// Exponential backoff with uniform jitter. Delay for attempt `n` is
/// `min(base * 2^n, cap)`, then scaled by a random factor in [0.5, 1.0].
/// Only retryable errors (429, connection, 5xx) are retried.
pub async fn retry_with_backoff<T, F, Fut>(
    max_retries: u32,
    base: Duration,
    cap: Duration,
    mut op: F,
) -> Result<T, AiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AiError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < max_retries => {
                let exp = base.as_secs_f64() * 2f64.powi(attempt as i32);
                let capped = exp.min(cap.as_secs_f64());
                let jitter = rand::rng().random_range(0.5..=1.0);
                let delay = Duration::from_secs_f64(capped * jitter);
                warn!(
                    attempt = attempt + 1,
                    max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient backend error, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
