//! Retry and timeout helpers
//!
//! Shared by the transports (connect retries) and by the call layer
//! (negotiation step timeouts). Any error type that can classify itself as
//! recoverable plugs in through [`RecoverableError`].

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, error, warn};

/// Errors that know whether a retry may help
pub trait RecoverableError: fmt::Display + Sized {
    /// Check if this error is worth retrying
    fn is_recoverable(&self) -> bool;

    /// Error category for structured logs
    fn category(&self) -> &'static str;

    /// Build the error reported when an operation exceeds its deadline
    fn timed_out(duration_ms: u64) -> Self;
}

/// Configuration for retry behavior
///
/// # Examples
///
/// ```rust
/// # use peercall_signal_core::RetryConfig;
/// # use std::time::Duration;
/// let config = RetryConfig::default();
/// assert_eq!(config.max_attempts, 3);
/// assert_eq!(config.initial_delay, Duration::from_millis(100));
/// assert!(config.use_jitter);
///
/// // Deterministic delays for a socket that should come back quickly
/// let custom = RetryConfig {
///     max_attempts: 4,
///     use_jitter: false,
///     ..RetryConfig::quick()
/// };
/// assert_eq!(custom.initial_delay, Duration::from_millis(50));
/// ```
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Whether to add ±10% jitter to delays
    pub use_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            use_jitter: true,
        }
    }
}

impl RetryConfig {
    /// Quick retries for socket connects
    pub fn quick() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 1.5,
            use_jitter: true,
        }
    }

    /// Slow retries for relay-level recovery
    pub fn slow() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 3.0,
            use_jitter: false,
        }
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if !self.use_jitter {
            return delay;
        }
        let jitter = (rand::random::<f64>() - 0.5) * 0.2;
        let millis = delay.as_millis() as f64;
        Duration::from_millis((millis * (1.0 + jitter)).max(0.0) as u64)
    }
}

/// Retry an operation with exponential backoff
///
/// Non-recoverable errors are returned immediately.
pub async fn retry_with_backoff<T, E, F, Fut>(
    operation_name: &str,
    config: RetryConfig,
    mut operation: F,
) -> Result<T, E>
where
    E: RecoverableError,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;
        debug!(
            operation = operation_name,
            attempt = attempt,
            max_attempts = config.max_attempts,
            "Attempting operation"
        );

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(
                        operation = operation_name,
                        attempt = attempt,
                        "Operation succeeded after retries"
                    );
                }
                return Ok(result);
            }
            Err(e) if e.is_recoverable() && attempt < config.max_attempts => {
                warn!(
                    operation = operation_name,
                    attempt = attempt,
                    error = %e,
                    category = e.category(),
                    next_delay_ms = delay.as_millis() as u64,
                    "Recoverable error, will retry"
                );

                sleep(config.jittered(delay)).await;

                let next_delay_ms = (delay.as_millis() as f64 * config.backoff_multiplier) as u64;
                delay = Duration::from_millis(next_delay_ms).min(config.max_delay);
            }
            Err(e) => {
                if attempt >= config.max_attempts {
                    error!(
                        operation = operation_name,
                        attempts = attempt,
                        error = %e,
                        "Operation failed after all retry attempts"
                    );
                } else {
                    error!(
                        operation = operation_name,
                        error = %e,
                        category = e.category(),
                        "Non-recoverable error, not retrying"
                    );
                }
                return Err(e);
            }
        }
    }
}

/// Bound an operation by a deadline
pub async fn with_timeout<T, E, F>(operation_name: &str, timeout: Duration, future: F) -> Result<T, E>
where
    E: RecoverableError,
    F: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => {
            error!(
                operation = operation_name,
                timeout_ms = timeout.as_millis() as u64,
                "Operation timed out"
            );
            Err(E::timed_out(timeout.as_millis() as u64))
        }
    }
}
