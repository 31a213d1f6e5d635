//! Retry utilities for network operations with exponential backoff.
//!
//! This module provides async retry functionality for operations that may
//! fail due to temporary issues like timeouts, rate limiting, or temporary
//! server unavailability. It backs the queue pass-through and the
//! root-domain probe; the scanner subprocess is deliberately not retried
//! (one subprocess per scan request).

use std::time::Duration;

use tokio::time::{sleep, Instant};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not including the initial attempt)
    pub max_attempts: u32,

    /// Initial delay between retries
    pub initial_delay: Duration,

    /// Maximum delay between retries (for exponential backoff)
    pub max_delay: Duration,

    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,

    /// Whether to add jitter to prevent thundering herd
    pub jitter: bool,

    /// Maximum total time to spend retrying
    pub max_total_duration: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
            max_total_duration: Some(Duration::from_secs(60)),
        }
    }
}

/// Policy for determining if an operation should be retried
pub trait RetryPolicy<E> {
    /// Returns true if the operation should be retried for this error
    fn should_retry(&self, error: &E, attempt: u32) -> bool;
}

/// Retry policy for queue (Pub/Sub emulator) transport errors.
pub struct QueueRetryPolicy;

impl<E> RetryPolicy<E> for QueueRetryPolicy
where
    E: std::error::Error,
{
    fn should_retry(&self, error: &E, attempt: u32) -> bool {
        if attempt >= 3 {
            return false;
        }

        let error_str = error.to_string().to_lowercase();

        // The emulator restarts freely in dev environments; transport-level
        // failures are worth retrying, 4xx-style rejections are not.
        error_str.contains("timeout")
            || error_str.contains("timed out")
            || error_str.contains("connection refused")
            || error_str.contains("connection reset")
            || error_str.contains("network unreachable")
            || error_str.contains("service unavailable")
            || error_str.contains("too many requests")
    }
}

/// Retry policy for DNS / HTTP probe lookups.
pub struct ProbeRetryPolicy;

impl<E> RetryPolicy<E> for ProbeRetryPolicy
where
    E: std::error::Error,
{
    fn should_retry(&self, error: &E, attempt: u32) -> bool {
        if attempt >= 2 {
            return false;
        }

        let error_str = error.to_string().to_lowercase();

        error_str.contains("timeout")
            || error_str.contains("timed out")
            || error_str.contains("servfail")
            || error_str.contains("temporary failure")
            || error_str.contains("connection")
    }
}

/// Retry executor that handles the retry logic
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    /// Create a new retry executor with the given configuration
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Create a retry executor with default configuration
    pub fn with_default_config() -> Self {
        Self::new(RetryConfig::default())
    }

    /// Execute an async operation with retry logic
    pub async fn execute<F, Fut, T, E, P>(&self, operation: F, policy: P) -> Result<T, E>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        P: RetryPolicy<E>,
        E: std::error::Error,
    {
        let start_time = Instant::now();
        let mut delay = self.config.initial_delay;
        let mut last_error: Option<E> = None;

        for attempt in 0..=self.config.max_attempts {
            // Stop once we've exceeded the maximum total duration
            if let Some(max_duration) = self.config.max_total_duration {
                if start_time.elapsed() >= max_duration {
                    break;
                }
            }

            match operation().await {
                Ok(result) => return Ok(result),
                Err(error) => {
                    if attempt >= self.config.max_attempts || !policy.should_retry(&error, attempt)
                    {
                        return Err(error);
                    }
                    last_error = Some(error);

                    let actual_delay = if self.config.jitter {
                        add_jitter(delay)
                    } else {
                        delay
                    };

                    sleep(actual_delay).await;

                    delay = std::cmp::min(
                        Duration::from_millis(
                            (delay.as_millis() as f64 * self.config.backoff_multiplier) as u64,
                        ),
                        self.config.max_delay,
                    );
                }
            }
        }

        // Only reachable when max_total_duration cut the loop short; the
        // last error is always set by then.
        Err(last_error.expect("retry loop exited without an error"))
    }
}

/// Add random jitter to prevent thundering herd problems
fn add_jitter(delay: Duration) -> Duration {
    use rand::Rng;

    let jitter_range = delay.as_millis() as f64 * 0.1; // 10% jitter
    let mut rng = rand::thread_rng();
    let jitter: f64 = rng.gen_range(-jitter_range..=jitter_range);

    let jittered_ms = (delay.as_millis() as f64 + jitter).max(0.0) as u64;
    Duration::from_millis(jittered_ms)
}

/// Builder pattern for creating retry configurations
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl RetryConfigBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: RetryConfig::default(),
        }
    }

    /// Set the maximum number of retry attempts
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    /// Set the initial delay between retries
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.config.initial_delay = delay;
        self
    }

    /// Set the maximum delay between retries
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.max_delay = delay;
        self
    }

    /// Set the backoff multiplier
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.config.backoff_multiplier = multiplier;
        self
    }

    /// Enable or disable jitter
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.config.jitter = enabled;
        self
    }

    /// Set the maximum total duration for all retry attempts
    pub fn max_total_duration(mut self, duration: Option<Duration>) -> Self {
        self.config.max_total_duration = duration;
        self
    }

    /// Build the final configuration
    pub fn build(self) -> RetryConfig {
        self.config
    }
}

impl Default for RetryConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, thiserror::Error)]
    #[error("{0}")]
    struct TestError(String);

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let attempts = AtomicU32::new(0);
        let executor = RetryExecutor::new(
            RetryConfigBuilder::new()
                .max_attempts(3)
                .initial_delay(Duration::from_millis(1))
                .jitter(false)
                .build(),
        );

        let result = executor
            .execute(
                || async {
                    let n = attempts.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(TestError("connection refused".into()))
                    } else {
                        Ok(n)
                    }
                },
                QueueRetryPolicy,
            )
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_on_non_retryable_errors() {
        let attempts = AtomicU32::new(0);
        let executor = RetryExecutor::with_default_config();

        let result: Result<(), _> = executor
            .execute(
                || async {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(TestError("invalid argument".into()))
                },
                QueueRetryPolicy,
            )
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn respects_max_attempts() {
        let attempts = AtomicU32::new(0);
        let executor = RetryExecutor::new(
            RetryConfigBuilder::new()
                .max_attempts(2)
                .initial_delay(Duration::from_millis(1))
                .jitter(false)
                .build(),
        );

        let result: Result<(), _> = executor
            .execute(
                || async {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(TestError("timeout".into()))
                },
                QueueRetryPolicy,
            )
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3); // initial + 2 retries
    }

    #[test]
    fn probe_policy_caps_attempts() {
        let err = TestError("timeout".into());
        assert!(ProbeRetryPolicy.should_retry(&err, 0));
        assert!(ProbeRetryPolicy.should_retry(&err, 1));
        assert!(!ProbeRetryPolicy.should_retry(&err, 2));
    }

    #[test]
    fn jitter_stays_close_to_base() {
        let base = Duration::from_millis(100);
        for _ in 0..50 {
            let jittered = add_jitter(base);
            assert!(jittered >= Duration::from_millis(90));
            assert!(jittered <= Duration::from_millis(110));
        }
    }
}
