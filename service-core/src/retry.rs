//! Retry helper for calls to flaky upstream APIs.
//!
//! Upstream clients often surface transient failures only as free-form error
//! text, so retryability is decided by matching the lowercased message against
//! a list of markers. Delays between attempts are a fixed schedule.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Default delays between attempts. Five attempts in total.
pub const DEFAULT_DELAYS_MS: [u64; 4] = [250, 600, 1200, 2000];

/// Default substrings that mark an error message as transient.
pub const DEFAULT_RETRYABLE_MARKERS: [&str; 6] = [
    "director",
    "e6716",
    "timeout",
    "temporar",
    "5xx",
    "server error",
];

/// Configuration for retry behavior.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Delay before each retry. `delays.len() + 1` attempts are made at most.
    pub delays: Vec<Duration>,
    /// Lowercase substrings; an error is retried if its message contains any.
    pub retryable_markers: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delays: DEFAULT_DELAYS_MS
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
            retryable_markers: DEFAULT_RETRYABLE_MARKERS
                .iter()
                .map(|m| m.to_string())
                .collect(),
        }
    }
}

impl RetryPolicy {
    /// Create a policy that makes a single attempt.
    pub fn no_retry() -> Self {
        Self {
            delays: Vec::new(),
            ..Default::default()
        }
    }

    pub fn max_attempts(&self) -> usize {
        self.delays.len() + 1
    }

    /// Determines if an error message denotes a transient failure.
    pub fn is_retryable(&self, message: &str) -> bool {
        let message = message.to_lowercase();
        self.retryable_markers
            .iter()
            .any(|marker| message.contains(marker.as_str()))
    }
}

/// Execute an async call, retrying transient failures per `policy`.
///
/// Returns the first success, or the last error once the error is not
/// retryable or attempts are exhausted.
pub async fn retry_call<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt = 0;

    loop {
        match f().await {
            Ok(result) => {
                if attempt > 0 {
                    info!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        "Upstream call succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) => {
                let message = err.to_string();

                if !policy.is_retryable(&message) {
                    warn!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        error = %message,
                        "Upstream call failed with non-retryable error"
                    );
                    return Err(err);
                }

                let Some(delay) = policy.delays.get(attempt).copied() else {
                    warn!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        error = %message,
                        "Upstream call failed after max attempts"
                    );
                    return Err(err);
                };

                warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    error = %message,
                    backoff_ms = delay.as_millis() as u64,
                    "Upstream call failed, retrying after backoff"
                );

                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
