//! Bounded retry loop for transient failures.
//!
//! Control-plane calls retry with a fixed pause between attempts; broker
//! reconnects back off exponentially with jitter. Both go through the same
//! loop, which carries an explicit attempt counter and stops as soon as an
//! error is classified as terminal.
//!
//! # Example
//!
//! ```ignore
//! use apk_agent::retry::{retry_while, RetryConfig};
//!
//! let body = retry_while(
//!     &RetryConfig::fixed(5, Duration::from_secs(5)),
//!     "fetch_applications",
//!     Error::is_retryable,
//!     || async { client.get_bytes("applications").await },
//! ).await?;
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

/// Retry policy for one operation
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first (0 = infinite)
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Upper bound for the delay
    pub max_delay: Duration,
    /// Delay multiplier applied after every failed attempt (1.0 = fixed)
    pub backoff_multiplier: f64,
    /// Randomize each delay between 0.5x and 1.5x
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Fixed pause between at most `max_attempts` attempts
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay: delay,
            max_delay: delay,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }

    /// Exponential backoff with jitter, forever
    pub fn infinite() -> Self {
        Self::default()
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        Duration::from_secs_f64(
            (delay.as_secs_f64() * self.backoff_multiplier).min(self.max_delay.as_secs_f64()),
        )
    }
}

/// Run `operation` until it succeeds, fails terminally, or attempts run out.
///
/// `should_retry` classifies each error. A terminal error is returned at once
/// without logging; exhaustion is logged once at error level and the last
/// error is returned.
pub async fn retry_while<F, Fut, T, E, P>(
    config: &RetryConfig,
    operation_name: &str,
    should_retry: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if !should_retry(&e) => return Err(e),
            Err(e) => {
                if config.max_attempts > 0 && attempt >= config.max_attempts {
                    error!(
                        operation = %operation_name,
                        attempt = attempt,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(e);
                }

                let pause = if config.jitter {
                    let factor = rand::thread_rng().gen_range(0.5..1.5);
                    Duration::from_secs_f64(delay.as_secs_f64() * factor)
                } else {
                    delay
                };

                warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    delay_ms = pause.as_millis(),
                    "Operation failed, retrying"
                );

                tokio::time::sleep(pause).await;
                delay = config.next_delay(delay);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn always(_: &&str) -> bool {
        true
    }

    #[tokio::test]
    async fn test_succeeds_immediately() {
        let config = RetryConfig::fixed(3, Duration::from_millis(1));
        let result: Result<i32, &str> =
            retry_while(&config, "op", always, || async { Ok(42) }).await;
        assert_eq!(result, Ok(42));
    }

    #[tokio::test]
    async fn test_succeeds_after_failures() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let config = RetryConfig::fixed(5, Duration::from_millis(1));
        let result: Result<i32, &str> = retry_while(&config, "op", always, || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("fail")
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausts_max_attempts_exactly() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let config = RetryConfig::fixed(4, Duration::from_millis(1));
        let result: Result<i32, &str> = retry_while(&config, "op", always, || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err("always fails")
            }
        })
        .await;

        assert_eq!(result, Err("always fails"));
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_terminal_error_stops_at_first_attempt() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let config = RetryConfig::fixed(5, Duration::from_millis(1));
        let result: Result<i32, &str> = retry_while(
            &config,
            "op",
            |e: &&str| *e != "terminal",
            || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err("terminal")
                }
            },
        )
        .await;

        assert_eq!(result, Err("terminal"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_delay_between_attempts() {
        let start = tokio::time::Instant::now();
        let config = RetryConfig::fixed(3, Duration::from_secs(5));

        let result: Result<(), &str> =
            retry_while(&config, "op", always, || async { Err("down") }).await;

        assert!(result.is_err());
        // two pauses between three attempts
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = RetryConfig {
            max_delay: Duration::from_secs(4),
            ..RetryConfig::default()
        };
        assert_eq!(config.next_delay(Duration::from_secs(3)), Duration::from_secs(4));
        let fixed = RetryConfig::fixed(2, Duration::from_secs(1));
        assert_eq!(fixed.next_delay(Duration::from_secs(1)), Duration::from_secs(1));
    }
}
