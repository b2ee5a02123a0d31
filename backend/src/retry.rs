//! Bounded retry of atomic units that lost a concurrency race
//!
//! Only `ConcurrencyConflict` is retried. Every attempt re-runs the whole
//! unit from a fresh read. No backoff.

use std::future::Future;

use tracing::{debug, warn};

use crate::error::{AppError, AppResult};

/// Run `operation` up to `max_attempts` times while it reports a concurrency conflict
pub async fn retry_on_conflict<F, Fut, T>(
    max_attempts: u32,
    operation_name: &str,
    mut operation: F,
) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(
                        "Operation '{}' succeeded on attempt {} after retries",
                        operation_name, attempt
                    );
                }
                return Ok(result);
            }
            Err(error) if error.is_concurrency_conflict() && attempt < max_attempts => {
                warn!(
                    "Operation '{}' hit a concurrency conflict on attempt {}, retrying: {}",
                    operation_name, attempt, error
                );
                attempt += 1;
            }
            Err(error) => {
                if error.is_concurrency_conflict() {
                    warn!(
                        "Operation '{}' gave up after {} conflicting attempts",
                        operation_name, attempt
                    );
                }
                return Err(error);
            }
        }
    }
}
