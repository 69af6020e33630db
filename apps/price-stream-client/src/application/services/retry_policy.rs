//! Retry Policy
//!
//! Decides whether a classified connection failure is worth another attempt
//! and how long to wait before it. Deterministic: a fixed ascending backoff
//! table with no jitter, so tests can assert exact delays.

use std::time::Duration;

use crate::domain::connection::ErrorKind;

/// Configuration for retry decisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Attempts allowed before the policy gives up.
    pub max_attempts: u32,
    /// Ascending delays indexed by attempt number.
    pub backoff: Vec<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(5),
            ],
        }
    }
}

impl RetryConfig {
    /// Create a configuration with custom values.
    #[must_use]
    pub const fn new(max_attempts: u32, backoff: Vec<Duration>) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }
}

/// Pure retry policy over a `RetryConfig`.
///
/// # Example
///
/// ```rust
/// use price_stream_client::application::services::{RetryConfig, RetryPolicy};
/// use price_stream_client::ErrorKind;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::new(RetryConfig::default());
///
/// assert!(policy.should_retry(&ErrorKind::Timeout, 0));
/// assert!(!policy.should_retry(&ErrorKind::InvalidUrl, 0));
/// assert_eq!(policy.delay_for(7), Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl RetryPolicy {
    /// Create a new retry policy.
    #[must_use]
    pub const fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Maximum attempts before giving up.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Whether a failure of this kind is ever retried.
    ///
    /// Kinds not explicitly excluded are retryable.
    #[must_use]
    pub const fn is_retryable(error: &ErrorKind) -> bool {
        !matches!(
            error,
            ErrorKind::InvalidUrl | ErrorKind::EncodingFailed(_) | ErrorKind::DecodingFailed(_)
        )
    }

    /// Whether attempt number `attempt` (zero-based) should follow `error`.
    #[must_use]
    pub const fn should_retry(&self, error: &ErrorKind, attempt: u32) -> bool {
        attempt < self.config.max_attempts && Self::is_retryable(error)
    }

    /// Delay before attempt number `attempt`.
    ///
    /// Past the end of the table the last entry repeats. An empty table
    /// yields no delay.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let index = usize::try_from(attempt).unwrap_or(usize::MAX);
        self.config
            .backoff
            .get(index)
            .or_else(|| self.config.backoff.last())
            .copied()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::default()
    }

    #[test]
    fn default_config_values() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(
            config.backoff,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(5)
            ]
        );
    }

    #[test_case(ErrorKind::Timeout ; "timeout")]
    #[test_case(ErrorKind::ConnectionFailed("refused".to_string()) ; "connection failed")]
    #[test_case(ErrorKind::NetworkUnavailable ; "network unavailable")]
    #[test_case(ErrorKind::SendFailed("broken pipe".to_string()) ; "unlisted send failure")]
    #[test_case(ErrorKind::ReceiveFailed("reset".to_string()) ; "unlisted receive failure")]
    fn retryable_below_limit(error: ErrorKind) {
        let policy = policy();
        for attempt in 0..policy.max_attempts() {
            assert!(policy.should_retry(&error, attempt), "attempt {attempt}");
        }
    }

    #[test_case(ErrorKind::InvalidUrl ; "invalid url")]
    #[test_case(ErrorKind::EncodingFailed("nan".to_string()) ; "encoding failed")]
    #[test_case(ErrorKind::DecodingFailed("bad json".to_string()) ; "decoding failed")]
    fn never_retried(error: ErrorKind) {
        let policy = policy();
        for attempt in 0..10 {
            assert!(!policy.should_retry(&error, attempt), "attempt {attempt}");
        }
    }

    #[test]
    fn exhausted_attempts_stop_every_kind() {
        let policy = policy();
        let kinds = [
            ErrorKind::Timeout,
            ErrorKind::ConnectionFailed(String::new()),
            ErrorKind::NetworkUnavailable,
            ErrorKind::SendFailed(String::new()),
            ErrorKind::ReceiveFailed(String::new()),
            ErrorKind::InvalidUrl,
        ];
        for attempt in policy.max_attempts()..policy.max_attempts() + 50 {
            for kind in &kinds {
                assert!(!policy.should_retry(kind, attempt));
            }
        }
        assert!(!policy.should_retry(&ErrorKind::Timeout, u32::MAX));
    }

    #[test_case(0, 1 ; "first")]
    #[test_case(1, 2 ; "second")]
    #[test_case(2, 5 ; "third")]
    fn delay_table(attempt: u32, secs: u64) {
        assert_eq!(policy().delay_for(attempt), Duration::from_secs(secs));
    }

    #[test]
    fn delay_past_table_repeats_last() {
        let policy = policy();
        let last = policy.delay_for(2);
        for attempt in 3..100 {
            assert_eq!(policy.delay_for(attempt), last);
        }
        assert_eq!(policy.delay_for(u32::MAX), last);
    }

    #[test]
    fn custom_table() {
        let policy = RetryPolicy::new(RetryConfig::new(
            1,
            vec![Duration::from_millis(10), Duration::from_millis(20)],
        ));
        assert!(policy.should_retry(&ErrorKind::Timeout, 0));
        assert!(!policy.should_retry(&ErrorKind::Timeout, 1));
        assert_eq!(policy.delay_for(5), Duration::from_millis(20));
    }

    #[test]
    fn empty_table_yields_zero_delay() {
        let policy = RetryPolicy::new(RetryConfig::new(3, vec![]));
        assert_eq!(policy.delay_for(0), Duration::ZERO);
    }
}
