//! Retry logic with exponential backoff and jitter.
//!
//! Transient persistence failures are retried a bounded number of times.
//! Everything else, including constraint violations, is returned on the
//! first attempt.

use rand::Rng;
use std::time::Duration;
use tracing::warn;

use crate::config::PersistenceConfig;
use crate::AceflowResult;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt (0 = no retries).
    pub max_retries: u32,

    /// Delay before the first retry.
    pub initial_delay: Duration,

    /// Maximum delay between retries.
    pub max_delay: Duration,

    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,

    /// Whether to add up to 25% jitter to delays.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&PersistenceConfig::default())
    }
}

impl From<&PersistenceConfig> for RetryPolicy {
    fn from(config: &PersistenceConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_delay: Duration::from_millis(config.initial_backoff_ms),
            max_delay: Duration::from_millis(config.max_backoff_ms),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Fail fast, no retries
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Calculate delay before the given retry (1-based).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }

        let base = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi(retry as i32 - 1);
        let capped = base.min(self.max_delay.as_millis() as f64);

        let delay = if self.jitter {
            capped * (1.0 + rand::thread_rng().gen_range(0.0..0.25))
        } else {
            capped
        };

        Duration::from_millis(delay as u64)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// retry budget is spent. The last error is returned unchanged.
    pub fn run<T, F>(&self, operation: &str, mut op: F) -> AceflowResult<T>
    where
        F: FnMut() -> AceflowResult<T>,
    {
        let mut retry = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && retry < self.max_retries => {
                    retry += 1;
                    let delay = self.delay_for_retry(retry);
                    warn!(
                        operation,
                        retry,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying after persistence failure: {}",
                        e
                    );
                    std::thread::sleep(delay);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AceflowError;
    use std::cell::Cell;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
            backoff_multiplier: 2.0,
            jitter: false,
        };
        assert_eq!(policy.delay_for_retry(0), Duration::ZERO);
        assert_eq!(policy.delay_for_retry(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_retry(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_retry(3), Duration::from_millis(300));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy {
            jitter: true,
            ..fast_policy()
        };
        for _ in 0..20 {
            let delay = policy.delay_for_retry(1).as_micros();
            assert!((1000..=1250).contains(&delay));
        }
    }

    #[test]
    fn test_retries_persistence_errors_until_success() {
        let attempts = Cell::new(0);
        let result = fast_policy().run("save", || {
            attempts.set(attempts.get() + 1);
            if attempts.get() < 3 {
                Err(AceflowError::persistence("disk busy"))
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.get(), 3);
    }

    #[test]
    fn test_gives_up_after_max_retries() {
        let attempts = Cell::new(0);
        let result: AceflowResult<()> = fast_policy().run("save", || {
            attempts.set(attempts.get() + 1);
            Err(AceflowError::persistence("disk gone"))
        });
        assert!(result.is_err());
        assert_eq!(attempts.get(), 4);
    }

    #[test]
    fn test_constraint_violations_are_not_retried() {
        let db = crate::db::Database::open_in_memory().unwrap();
        db.lock()
            .unwrap()
            .execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY); INSERT INTO t (id) VALUES (1);")
            .unwrap();

        let attempts = Cell::new(0);
        let result: AceflowResult<usize> = fast_policy().run("insert", || {
            attempts.set(attempts.get() + 1);
            let conn = db.lock()?;
            Ok(conn.execute("INSERT INTO t (id) VALUES (1)", [])?)
        });
        assert!(result.is_err());
        assert_eq!(attempts.get(), 1);
    }

    #[test]
    fn test_validation_errors_are_not_retried() {
        let attempts = Cell::new(0);
        let result: AceflowResult<()> = fast_policy().run("save", || {
            attempts.set(attempts.get() + 1);
            Err(AceflowError::validation("bad input"))
        });
        assert!(result.is_err());
        assert_eq!(attempts.get(), 1);
    }
}
