//! Retrying sync requests
//!
//! Connect errors, timeouts and 429/5xx responses are retried with a doubling
//! backoff plus random jitter. Anything else fails on the first attempt.

use rand::Rng;
use std::time::Duration;

use crate::config::SyncConfig;
use crate::error::{LixError, Result};

const RETRYABLE_STATUS: [u16; 5] = [429, 500, 502, 503, 504];

/// How often and how patiently a request is repeated
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts per request, including the first one
    pub max_attempts: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Share of the backoff added on top at random; `0.0` turns jitter off
    pub jitter_factor: f64,
}

impl From<&SyncConfig> for RetryConfig {
    fn from(config: &SyncConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: config.initial_backoff,
            max_backoff: config.max_backoff,
            jitter_factor: 0.25,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

impl RetryConfig {
    /// Backoff before the given retry (1-based), without jitter
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }

    fn with_jitter(&self, backoff: Duration) -> Duration {
        let range = (backoff.as_millis() as f64 * self.jitter_factor) as u64;
        if range == 0 {
            return backoff;
        }
        backoff + Duration::from_millis(rand::rng().random_range(0..=range))
    }

    /// Whether a failed request is worth repeating
    pub fn is_transient(&self, error: &LixError) -> bool {
        match error {
            LixError::Http(e) => e.is_connect() || e.is_timeout(),
            LixError::Server { status, .. } => RETRYABLE_STATUS.contains(status),
            _ => false,
        }
    }
}

/// Run `request` until it succeeds, fails permanently or runs out of attempts
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, request: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut failures: u32 = 0;
    loop {
        let error = match request().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };
        failures += 1;
        if failures as usize >= config.max_attempts || !config.is_transient(&error) {
            return Err(error);
        }

        let delay = config.with_jitter(config.backoff(failures));
        tracing::warn!(
            attempt = failures,
            max_attempts = config.max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Sync request failed, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn unavailable() -> LixError {
        LixError::Server {
            status: 503,
            message: "unavailable".into(),
        }
    }

    fn fast(max_attempts: usize) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(20),
            jitter_factor: 0.0,
        }
    }

    #[test]
    fn test_backoff_doubles_up_to_max() {
        let config = RetryConfig {
            jitter_factor: 0.0,
            max_backoff: Duration::from_secs(1),
            ..Default::default()
        };
        assert_eq!(config.backoff(1), Duration::from_millis(100));
        assert_eq!(config.backoff(2), Duration::from_millis(200));
        assert_eq!(config.backoff(3), Duration::from_millis(400));
        assert_eq!(config.backoff(10), Duration::from_secs(1));
        assert_eq!(config.backoff(64), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_stays_within_factor() {
        let config = RetryConfig::default();
        let base = Duration::from_millis(400);
        for _ in 0..50 {
            let delay = config.with_jitter(base);
            assert!(delay >= base && delay <= Duration::from_millis(500));
        }
        assert_eq!(fast(1).with_jitter(base), base);
    }

    #[test]
    fn test_from_sync_config() {
        let sync = SyncConfig {
            max_attempts: 0,
            ..Default::default()
        };
        let config = RetryConfig::from(&sync);
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.initial_backoff, sync.initial_backoff);
    }

    #[test]
    fn test_transient_classification() {
        let config = RetryConfig::default();
        assert!(config.is_transient(&unavailable()));
        assert!(!config.is_transient(&LixError::Server {
            status: 400,
            message: "bad sql".into()
        }));
        assert!(!config.is_transient(&LixError::LixNotFound("x".into())));
    }

    #[tokio::test]
    async fn test_eventual_success() {
        let attempts = AtomicUsize::new(0);
        let result = with_retry(&fast(3), || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err(unavailable())
                } else {
                    Ok("synced")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "synced");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let attempts = AtomicUsize::new(0);
        let result: Result<()> = with_retry(&fast(3), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(LixError::InvalidTable("branch".into())) }
        })
        .await;

        assert!(matches!(result, Err(LixError::InvalidTable(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempts_exhausted() {
        let attempts = AtomicUsize::new(0);
        let result: Result<()> = with_retry(&fast(2), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(unavailable()) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
