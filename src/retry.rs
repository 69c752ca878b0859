//! Bounded retry with exponential backoff for RPC-bound calls
//!
//! Delays start at the configured base and double on every attempt. Only
//! transient errors (see [`Error::is_retryable`]) are retried; anything else
//! is returned immediately. Once the attempt budget is spent the last error is
//! surfaced as [`Error::ExecutionFailure`].

use backoff::{future::retry, ExponentialBackoff};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
    pub call_timeout: Duration,
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms.max(config.base_delay_ms)),
            max_attempts: config.max_attempts.max(1),
            call_timeout: Duration::from_millis(config.call_timeout_ms),
        }
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.base_delay,
            initial_interval: self.base_delay,
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_interval: self.max_delay,
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    /// Delay applied before attempt `n + 1` (1-based `n`)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails permanently, or the attempt budget runs out
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts;
        let call_timeout = self.call_timeout;
        let mut attempt = 0u32;

        retry(self.backoff(), || {
            attempt += 1;
            let current = attempt;
            let label = label.to_string();
            let fut = op();
            async move {
                let outcome = match tokio::time::timeout(call_timeout, fut).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::RpcTimeout(call_timeout.as_millis() as u64)),
                };

                match outcome {
                    Ok(value) => {
                        if current > 1 {
                            debug!("{} succeeded on attempt {}", label, current);
                        }
                        Ok(value)
                    }
                    Err(e) if e.is_retryable() && current < max_attempts => {
                        warn!(
                            "{} failed (attempt {}/{}), retrying: {}",
                            label, current, max_attempts, e
                        );
                        Err(backoff::Error::transient(e))
                    }
                    Err(e) if e.is_retryable() => {
                        warn!("{} giving up after {} attempts: {}", label, current, e);
                        Err(backoff::Error::permanent(Error::ExecutionFailure(format!(
                            "{} failed after {} attempts: {}",
                            label, current, e
                        ))))
                    }
                    Err(e) => Err(backoff::Error::permanent(e)),
                }
            }
        })
        .await
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(8),
            max_attempts,
            call_timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_delay_doubles_from_base() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
        assert_eq!(policy.delay_after(3), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result = fast_policy(3)
            .run("buy", || {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(Error::ConnectionLost("reset".into()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_surfaces_execution_failure() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<()> = fast_policy(4)
            .run("sell", || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(Error::RpcTimeout(10))
                }
            })
            .await;
        assert!(matches!(result, Err(Error::ExecutionFailure(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_permanent_error_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<()> = tokio_test::block_on(fast_policy(5).run("simulate", || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(Error::SimulationFailure("revert".into()))
            }
        }));
        assert!(matches!(result, Err(Error::SimulationFailure(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_slow_call_times_out() {
        let policy = RetryPolicy {
            call_timeout: Duration::from_millis(5),
            ..fast_policy(3)
        };
        let result: Result<()> = policy
            .run("price", || async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(Error::ExecutionFailure(_))));
    }
}
