//! Retry with exponential backoff and jitter for relay calls.
//!
//! Only transient failures (relay unreachable, timeout) are retried here.
//! An expired session is not: the caller re-registers instead.

use airc_types::config::RetrySettings;
use airc_types::{AircError, AircResult};
use rand::Rng;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first try).
    pub max_attempts: u32,
    /// Minimum delay between retries in milliseconds.
    pub min_delay_ms: u64,
    /// Maximum delay between retries in milliseconds.
    pub max_delay_ms: u64,
    /// Jitter factor (0.0 = no jitter, 1.0 = full jitter).
    ///
    /// The actual sleep is `delay * (1 + random_fraction * jitter)`, where
    /// `random_fraction` is in `[0, 1)`.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            min_delay_ms: settings.min_delay_ms,
            max_delay_ms: settings.max_delay_ms.max(settings.min_delay_ms),
            jitter: settings.jitter.clamp(0.0, 1.0),
        }
    }
}

/// Result of a retry operation.
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    /// The operation succeeded.
    Success {
        /// The successful result.
        result: T,
        /// Total number of attempts made (1 = first try succeeded).
        attempts: u32,
    },
    /// All retries exhausted, or the error was not retryable.
    Exhausted {
        /// The error from the last attempt.
        last_error: E,
        /// Total number of attempts made.
        attempts: u32,
    },
}

// ---------------------------------------------------------------------------
// Backoff computation
// ---------------------------------------------------------------------------

/// Compute the delay for a given attempt (0-indexed).
///
/// Formula: `min(min_delay * 2^attempt, max_delay) * (1 + random * jitter)`,
/// clamped to `max_delay`.
pub fn compute_backoff(config: &RetryConfig, attempt: u32) -> u64 {
    let base = config
        .min_delay_ms
        .saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX));
    let capped = base.min(config.max_delay_ms);

    if config.jitter <= 0.0 {
        return capped;
    }

    let frac: f64 = rand::thread_rng().gen_range(0.0..1.0);
    let with_jitter = (capped as f64) * (1.0 + frac * config.jitter);
    (with_jitter as u64).min(config.max_delay_ms)
}

// ---------------------------------------------------------------------------
// Core retry function
// ---------------------------------------------------------------------------

/// Execute an async operation with retry.
///
/// `should_retry` inspects each error; a `false` stops immediately.
pub async fn retry_async<F, Fut, T, E, P>(
    config: &RetryConfig,
    mut operation: F,
    should_retry: P,
) -> RetryOutcome<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let max = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!(
                        attempt = attempt + 1,
                        "retry succeeded after {} previous failures", attempt
                    );
                }
                return RetryOutcome::Success {
                    result,
                    attempts: attempt + 1,
                };
            }
            Err(err) => {
                let retryable = should_retry(&err);
                if !retryable || attempt + 1 >= max {
                    if retryable {
                        warn!(
                            attempt = attempt + 1,
                            max_attempts = max,
                            error = %err,
                            "all retry attempts exhausted"
                        );
                    } else {
                        debug!(attempt = attempt + 1, error = %err, "error is not retryable");
                    }
                    return RetryOutcome::Exhausted {
                        last_error: err,
                        attempts: attempt + 1,
                    };
                }

                let delay_ms = compute_backoff(config, attempt);
                debug!(attempt = attempt + 1, delay_ms, error = %err, "retrying after error");
                tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                attempt += 1;
            }
        }
    }
}

/// Transient relay failures worth another attempt.
pub fn is_transient(err: &AircError) -> bool {
    matches!(err, AircError::RelayUnreachable(_) | AircError::Timeout(_))
}

/// Run a relay call, retrying transient failures.
pub async fn retry_relay<F, Fut, T>(config: &RetryConfig, operation: F) -> AircResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = AircResult<T>>,
{
    match retry_async(config, operation, is_transient).await {
        RetryOutcome::Success { result, .. } => Ok(result),
        RetryOutcome::Exhausted { last_error, .. } => Err(last_error),
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            min_delay_ms: 1,
            max_delay_ms: 5,
            jitter: 0.0,
        }
    }

    #[test]
    fn test_from_settings() {
        let config = RetryConfig::from(&RetrySettings {
            max_attempts: 0,
            min_delay_ms: 800,
            max_delay_ms: 100,
            jitter: 3.0,
        });
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.max_delay_ms, 800);
        assert!((config.jitter - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_compute_backoff_exponential() {
        let config = RetryConfig {
            max_attempts: 5,
            min_delay_ms: 100,
            max_delay_ms: 100_000,
            jitter: 0.0,
        };
        assert_eq!(compute_backoff(&config, 0), 100);
        assert_eq!(compute_backoff(&config, 1), 200);
        assert_eq!(compute_backoff(&config, 2), 400);
        assert_eq!(compute_backoff(&config, 3), 800);
    }

    #[test]
    fn test_compute_backoff_capped() {
        let config = RetryConfig {
            max_attempts: 10,
            min_delay_ms: 1_000,
            max_delay_ms: 5_000,
            jitter: 0.0,
        };
        assert_eq!(compute_backoff(&config, 2), 4_000);
        assert_eq!(compute_backoff(&config, 3), 5_000);
        assert_eq!(compute_backoff(&config, 70), 5_000);
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let config = RetryConfig {
            max_attempts: 3,
            min_delay_ms: 1_000,
            max_delay_ms: 60_000,
            jitter: 0.5,
        };
        for _ in 0..100 {
            let d = compute_backoff(&config, 1);
            assert!((2_000..=3_000).contains(&d), "delay {d} out of range");
        }
    }

    #[tokio::test]
    async fn test_transient_errors_retried() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let result = retry_relay(&fast(5), move || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(AircError::RelayUnreachable("connection refused".into()))
                } else {
                    Ok("up")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "up");
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_surfaces_last_error() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let result: AircResult<()> = retry_relay(&fast(3), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(AircError::Timeout("30s".into()))
            }
        })
        .await;
        assert!(matches!(result, Err(AircError::Timeout(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_session_expiry_not_retried() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let result: AircResult<()> = retry_relay(&fast(5), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(AircError::SessionExpired)
            }
        })
        .await;
        assert!(matches!(result, Err(AircError::SessionExpired)));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_fatal_errors_not_retried() {
        let counter = AtomicU32::new(0);
        let result: AircResult<()> = tokio_test::block_on(retry_relay(&fast(5), || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(AircError::KeyStoreCorrupt("truncated".into())) }
        }));
        assert!(result.unwrap_err().is_fatal());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_outcome_attempts() {
        let outcome = retry_async(&fast(3), || async { Ok::<_, String>(7) }, |_| true).await;
        match outcome {
            RetryOutcome::Success { result, attempts } => {
                assert_eq!(result, 7);
                assert_eq!(attempts, 1);
            }
            _ => panic!("expected success"),
        }
    }
}
