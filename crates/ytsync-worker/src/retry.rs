//! Retry utilities with exponential backoff.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not including the initial attempt).
    pub max_retries: u32,
    /// Base delay for exponential backoff (doubles each attempt).
    pub base_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Operation name for logging.
    pub operation_name: String,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            operation_name: "operation".to_string(),
        }
    }
}

impl RetryConfig {
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            operation_name: operation_name.into(),
            ..Default::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.saturating_mul(2u32.pow(attempt.min(16)));
        delay.min(self.max_delay)
    }
}

/// Execute an async operation, retrying errors the predicate accepts.
pub async fn retry_async<F, Fut, T, E, P>(
    config: &RetryConfig,
    should_retry: P,
    operation: F,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < config.max_retries && should_retry(&e) => {
                attempt += 1;
                let delay = config.delay_for_attempt(attempt);
                debug!(
                    "{} attempt {} failed, retrying in {:?}: {}",
                    config.operation_name, attempt, delay, e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Per-key eligibility tracking for work that fails transiently.
///
/// A failed key becomes due again only after an exponentially growing
/// cool-down, so a flaky video does not hot-loop through its stage.
#[derive(Debug)]
pub struct BackoffTracker {
    base_delay: Duration,
    max_delay: Duration,
    entries: HashMap<String, BackoffEntry>,
}

#[derive(Debug)]
struct BackoffEntry {
    failures: u32,
    due_at: Instant,
}

impl BackoffTracker {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            entries: HashMap::new(),
        }
    }

    /// Whether work on this key is currently admitted.
    pub fn is_due(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .map(|e| Instant::now() >= e.due_at)
            .unwrap_or(true)
    }

    /// Record a transient failure, pushing the key's next attempt out.
    pub fn note_failure(&mut self, key: &str) {
        let (failures, delay) = match self.entries.get(key) {
            Some(entry) => {
                let failures = entry.failures + 1;
                let delay = self
                    .base_delay
                    .saturating_mul(2u32.pow(failures.min(16)))
                    .min(self.max_delay);
                (failures, delay)
            }
            None => (1, self.base_delay),
        };
        self.entries.insert(
            key.to_string(),
            BackoffEntry {
                failures,
                due_at: Instant::now() + delay,
            },
        );
    }

    /// Clear a key after success or a terminal transition.
    pub fn clear(&mut self, key: &str) {
        self.entries.remove(key);
    }

    pub fn failure_count(&self, key: &str) -> u32 {
        self.entries.get(key).map(|e| e.failures).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_and_caps() {
        let config = RetryConfig::new("test").with_base_delay(Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(400));
        assert!(config.delay_for_attempt(10) <= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_retry_async_eventual_success() {
        let config = RetryConfig::new("test").with_base_delay(Duration::from_millis(1));
        let calls = std::sync::atomic::AtomicU32::new(0);

        let result = retry_async(&config, |_| true, || {
            let n = calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("transient")
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_async_respects_predicate() {
        let config = RetryConfig::new("test").with_base_delay(Duration::from_millis(1));
        let calls = std::sync::atomic::AtomicU32::new(0);

        let result: Result<u32, &str> = retry_async(&config, |_| false, || {
            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async { Err("terminal") }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_tracker_cooldown() {
        let mut tracker = BackoffTracker::new(Duration::from_secs(10), Duration::from_secs(300));
        assert!(tracker.is_due("vid-1"));

        tracker.note_failure("vid-1");
        assert!(!tracker.is_due("vid-1"));
        assert_eq!(tracker.failure_count("vid-1"), 1);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(tracker.is_due("vid-1"));

        // Second failure doubles the cool-down.
        tracker.note_failure("vid-1");
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(!tracker.is_due("vid-1"));
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(tracker.is_due("vid-1"));

        tracker.clear("vid-1");
        assert_eq!(tracker.failure_count("vid-1"), 0);
    }
}
