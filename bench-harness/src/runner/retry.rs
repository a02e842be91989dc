//! Retry classification for provider failures

use std::time::Duration;

use crate::config::ExecutionConfig;
use crate::providers::ProviderError;

/// HTTP statuses treated as rate limiting or brief overload
pub const TRANSIENT_STATUS_CODES: [u16; 3] = [429, 500, 503];

const RATE_LIMIT_SIGNAL: &str = "rate limit reached";

/// Known-flaky upstream condition among transient failures; retried without
/// spending the retry budget
const SPECIAL_SIGNAL: &str = "something went wrong";

/// What the executor should do with a failed provider call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifiedError {
    /// Wait and retry, consuming one retry attempt
    Transient,
    /// Wait and retry without consuming an attempt
    SpecialTransient,
    /// Record the error as the case result
    Terminal,
}

/// Classify a provider failure by its status code and message
pub fn classify(error: &ProviderError) -> ClassifiedError {
    let message = error.to_string().to_lowercase();

    let transient_status = error
        .status_code()
        .map(|code| TRANSIENT_STATUS_CODES.contains(&code))
        .unwrap_or(false);

    if !transient_status && !message.contains(RATE_LIMIT_SIGNAL) {
        return ClassifiedError::Terminal;
    }

    if message.contains(SPECIAL_SIGNAL) {
        ClassifiedError::SpecialTransient
    } else {
        ClassifiedError::Transient
    }
}

/// Bounded, fixed-delay retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Transient retries allowed per case
    pub limit: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            limit: 30,
            delay: Duration::from_secs(65),
        }
    }
}

impl From<&ExecutionConfig> for RetryPolicy {
    fn from(config: &ExecutionConfig) -> Self {
        Self {
            limit: config.retry_limit,
            delay: config.retry_delay(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(status: u16, message: &str) -> ProviderError {
        ProviderError::Api {
            status,
            message: message.to_string(),
        }
    }

    #[test]
    fn test_transient_statuses() {
        for status in TRANSIENT_STATUS_CODES {
            assert_eq!(classify(&api(status, "busy")), ClassifiedError::Transient);
        }
        assert_eq!(
            classify(&ProviderError::RateLimited { retry_after_ms: 1000 }),
            ClassifiedError::Transient
        );
    }

    #[test]
    fn test_rate_limit_message_without_status() {
        let err = ProviderError::Other("Rate limit reached for gpt-4o in organization".into());
        assert_eq!(classify(&err), ClassifiedError::Transient);
    }

    #[test]
    fn test_special_signal() {
        assert_eq!(
            classify(&api(500, "Something went wrong, please try again")),
            ClassifiedError::SpecialTransient
        );
        assert_eq!(
            classify(&ProviderError::Other("Rate limit reached: something went wrong".into())),
            ClassifiedError::SpecialTransient
        );
    }

    #[test]
    fn test_terminal() {
        assert_eq!(classify(&api(400, "invalid tool name")), ClassifiedError::Terminal);
        assert_eq!(classify(&api(502, "bad gateway")), ClassifiedError::Terminal);
        assert_eq!(classify(&ProviderError::Parse("not json".into())), ClassifiedError::Terminal);
        assert_eq!(classify(&ProviderError::Timeout { timeout_ms: 10 }), ClassifiedError::Terminal);
    }

    #[test]
    fn test_special_signal_needs_transient_failure() {
        assert_eq!(
            classify(&api(400, "Something went wrong: invalid schema")),
            ClassifiedError::Terminal
        );
        assert_eq!(
            classify(&ProviderError::Other("something went wrong".into())),
            ClassifiedError::Terminal
        );
    }

    #[test]
    fn test_policy_from_config() {
        let mut config = ExecutionConfig::default();
        config.retry_limit = 3;
        config.retry_delay_ms = 5;
        let policy = RetryPolicy::from(&config);
        assert_eq!(policy.limit, 3);
        assert_eq!(policy.delay, Duration::from_millis(5));
        assert_eq!(RetryPolicy::default().limit, 30);
    }
}
