// Copyright 2026 Covenant Labs

//! Retry/backoff policy: exponential backoff with
//! jitter, capped, applied only to transient errors.

use crate::config::ExecutorConfig;
use crate::error::Error;
use rand_core::{OsRng, RngCore};
use std::time::Duration;

/// Whether `attempt_count` (0-indexed attempts already made) still has
/// budget left under `max_retries`, and `error` is a class the policy
/// allows retrying at all.
pub fn should_retry(error: &Error, attempt_count: u32, config: &ExecutorConfig) -> bool {
    error.retryable() && attempt_count < config.max_retries
}

/// `base * factor^attempt`, capped, with +-`jitter` fractional noise
/// (base 100ms, factor 2, jitter +-20%, cap 5s).
pub fn backoff_delay(attempt: u32, config: &ExecutorConfig) -> Duration {
    let base = config.retry_backoff_base_ms as f64;
    let raw = base * config.retry_backoff_factor.powi(attempt as i32);
    let capped = raw.min(config.retry_backoff_cap_ms as f64);

    let unit = OsRng.next_u32() as f64 / u32::MAX as f64; // in [0, 1]
    let noise = 1.0 + config.retry_backoff_jitter * (unit * 2.0 - 1.0); // in [1-j, 1+j]
    let jittered = (capped * noise).max(0.0);
    Duration::from_millis(jittered as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_before_cap() {
        let config = ExecutorConfig { retry_backoff_jitter: 0.0, ..ExecutorConfig::default() };
        let d0 = backoff_delay(0, &config).as_millis();
        let d1 = backoff_delay(1, &config).as_millis();
        assert_eq!(d0, config.retry_backoff_base_ms as u128);
        assert_eq!(d1, (config.retry_backoff_base_ms as f64 * config.retry_backoff_factor) as u128);
    }

    #[test]
    fn backoff_respects_cap() {
        let config = ExecutorConfig { retry_backoff_jitter: 0.0, max_retries: 10, ..ExecutorConfig::default() };
        let d = backoff_delay(20, &config).as_millis();
        assert_eq!(d, config.retry_backoff_cap_ms as u128);
    }

    #[test]
    fn non_retryable_errors_are_never_retried() {
        let config = ExecutorConfig::default();
        assert!(!should_retry(&Error::ValidationFailure { tool: "t".to_string(), reason: "x".to_string() }, 0, &config));
    }

    #[test]
    fn retryable_errors_stop_at_max_retries() {
        let config = ExecutorConfig { max_retries: 2, ..ExecutorConfig::default() };
        assert!(should_retry(&Error::Timeout("t".to_string()), 1, &config));
        assert!(!should_retry(&Error::Timeout("t".to_string()), 2, &config));
    }
}
