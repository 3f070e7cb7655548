//! Backoff retry for transient network failures
//!
//! Used around plain HTTP calls such as downloading a source URL. Credential
//! expiry during uploads is handled by the transfer controller's retry budget,
//! not here.

use std::future::Future;
use std::time::Duration;

use crate::alias::RetryConfig;
use crate::error::{Error, Result};

/// Exponential backoff schedule with jitter
#[derive(Debug, Clone)]
pub struct Backoff {
    initial_ms: u64,
    max_ms: u64,
}

impl Backoff {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            initial_ms: config.initial_backoff_ms,
            max_ms: config.max_backoff_ms,
        }
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(10);
        let capped_ms = self.initial_ms.saturating_mul(1u64 << shift).min(self.max_ms);
        Duration::from_millis(capped_ms + jitter(capped_ms))
    }
}

// Clock-derived jitter in [0, max).
fn jitter(max: u64) -> u64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64;
    nanos % max.max(1)
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// `config.max_attempts` is reached
pub async fn retry_with_backoff<T, F, Fut, R>(
    config: &RetryConfig,
    mut operation: F,
    is_retryable: R,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    R: Fn(&Error) -> bool,
{
    let backoff = Backoff::from_config(config);
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < config.max_attempts && is_retryable(&e) => {
                let delay = backoff.delay(attempt);
                tracing::debug!(
                    attempt,
                    backoff_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying after transient error"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Whether an error is worth retrying with backoff
pub fn is_retryable_error(error: &Error) -> bool {
    match error {
        Error::Network(msg) => {
            let msg = msg.to_lowercase();
            [
                "timeout",
                "timed out",
                "connection reset",
                "connection refused",
                "connection closed",
                "500",
                "502",
                "503",
                "504",
                "service unavailable",
                "too many requests",
                "429",
                "slow down",
            ]
            .iter()
            .any(|needle| msg.contains(needle))
        }
        Error::Io(e) => matches!(
            e.kind(),
            std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::TimedOut
                | std::io::ErrorKind::Interrupted
        ),
        _ => false,
    }
}

/// Builder for [`RetryConfig`]
#[derive(Debug, Clone)]
pub struct RetryBuilder {
    config: RetryConfig,
}

impl RetryBuilder {
    pub fn new() -> Self {
        Self {
            config: RetryConfig::default(),
        }
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n.max(1);
        self
    }

    pub fn initial_backoff_ms(mut self, ms: u64) -> Self {
        self.config.initial_backoff_ms = ms;
        self
    }

    pub fn max_backoff_ms(mut self, ms: u64) -> Self {
        self.config.max_backoff_ms = ms;
        self
    }

    pub fn build(self) -> RetryConfig {
        self.config
    }
}

impl Default for RetryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryBuilder::new()
            .max_attempts(max_attempts)
            .initial_backoff_ms(1)
            .max_backoff_ms(5)
            .build()
    }

    #[test]
    fn test_backoff_doubles() {
        let backoff = Backoff::from_config(&RetryConfig {
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 10000,
        });

        let b1 = backoff.delay(1).as_millis();
        assert!((100..200).contains(&b1));
        let b2 = backoff.delay(2).as_millis();
        assert!((200..400).contains(&b2));
        let b3 = backoff.delay(3).as_millis();
        assert!((400..800).contains(&b3));
    }

    #[test]
    fn test_backoff_is_capped() {
        let backoff = Backoff::from_config(&RetryConfig {
            max_attempts: 10,
            initial_backoff_ms: 1000,
            max_backoff_ms: 5000,
        });
        assert!(backoff.delay(30).as_millis() < 10000);
    }

    #[test]
    fn test_is_retryable_error() {
        assert!(is_retryable_error(&Error::Network("request timed out".into())));
        assert!(is_retryable_error(&Error::Network(
            "HTTP 503 Service Unavailable".into()
        )));
        assert!(!is_retryable_error(&Error::Network("HTTP 404".into())));
        assert!(!is_retryable_error(&Error::Auth("access denied".into())));
        assert!(!is_retryable_error(&Error::NotFound("missing".into())));
        assert!(is_retryable_error(&Error::Io(std::io::Error::from(
            std::io::ErrorKind::ConnectionReset
        ))));
    }

    #[test]
    fn test_retry_builder() {
        let config = RetryBuilder::new()
            .max_attempts(5)
            .initial_backoff_ms(200)
            .max_backoff_ms(20000)
            .build();

        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.initial_backoff_ms, 200);
        assert_eq!(config.max_backoff_ms, 20000);
        assert_eq!(RetryBuilder::new().max_attempts(0).build().max_attempts, 1);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry_with_backoff(
            &fast_config(3),
            || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(Error::Network("connection reset by peer".into()))
                    } else {
                        Ok("body")
                    }
                }
            },
            is_retryable_error,
        )
        .await;

        assert_eq!(result.unwrap(), "body");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let mut calls = 0;

        let result: Result<()> = retry_with_backoff(
            &fast_config(2),
            || {
                calls += 1;
                async { Err(Error::Network("timeout".into())) }
            },
            is_retryable_error,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls, 2);
    }

    #[tokio::test]
    async fn test_non_retryable_error_is_returned_immediately() {
        let mut calls = 0;

        let result: Result<()> = retry_with_backoff(
            &fast_config(3),
            || {
                calls += 1;
                async { Err(Error::NotFound("gone".into())) }
            },
            is_retryable_error,
        )
        .await;

        assert!(matches!(result, Err(Error::NotFound(_))));
        assert_eq!(calls, 1);
    }
}
