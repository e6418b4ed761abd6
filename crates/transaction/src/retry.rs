//! Retrying resource changes that declare `tries` / `try_sleep`

use anyhow::Result;
use catalog::Resource;
use std::thread;
use std::time::Duration;

/// How often to attempt a change and how long to wait in between
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub tries: u32,
    pub try_sleep: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            tries: 1,
            try_sleep: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    /// Read `tries` and `try_sleep` off a resource; invalid values fall back
    /// to a single attempt with no delay
    pub fn from_resource(resource: &Resource) -> Self {
        let tries = resource
            .get("tries")
            .and_then(catalog::Value::as_integer)
            .filter(|t| *t >= 1)
            .map_or(1, |t| t as u32);
        let try_sleep = resource
            .get("try_sleep")
            .and_then(catalog::Value::as_integer)
            .filter(|s| *s >= 0)
            .map_or(Duration::ZERO, |s| Duration::from_secs(s as u64));
        Self { tries, try_sleep }
    }
}

/// Callback for retry progress notifications
pub trait RetryCallback {
    /// Called when an attempt failed and another one will follow
    fn on_retry(&self, attempt: u32, tries: u32, error: &anyhow::Error, delay: Duration);
}

/// Callback that logs each retry at warn level
pub struct LogCallback<'a> {
    pub reference: &'a str,
}

impl RetryCallback for LogCallback<'_> {
    fn on_retry(&self, attempt: u32, tries: u32, error: &anyhow::Error, delay: Duration) {
        log::warn!(
            "{}: attempt {}/{} failed: {:#}. Retrying in {}s...",
            self.reference,
            attempt,
            tries,
            error,
            delay.as_secs()
        );
    }
}

/// Run `operation` until it succeeds or the policy's tries are used up
///
/// Returns the last error when every attempt failed.
pub fn with_retry<T, F>(
    policy: &RetryPolicy,
    callback: Option<&dyn RetryCallback>,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let tries = policy.tries.max(1);
    let mut attempt = 1;
    loop {
        match operation() {
            Ok(result) => return Ok(result),
            Err(e) if attempt >= tries => return Err(e),
            Err(e) => {
                if let Some(cb) = callback {
                    cb.on_retry(attempt, tries, &e, policy.try_sleep);
                }
                thread::sleep(policy.try_sleep);
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(tries: u32) -> RetryPolicy {
        RetryPolicy {
            tries,
            try_sleep: Duration::ZERO,
        }
    }

    #[test]
    fn test_success_first_try() {
        let result = with_retry(&policy(3), None, || Ok::<_, anyhow::Error>(42));
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn test_eventual_success() {
        let attempts = Cell::new(0);
        let result = with_retry(&policy(3), None, || {
            attempts.set(attempts.get() + 1);
            if attempts.get() < 3 {
                anyhow::bail!("not yet")
            }
            Ok(attempts.get())
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn test_all_attempts_fail() {
        let attempts = Cell::new(0);
        let result: Result<()> = with_retry(&policy(2), None, || {
            attempts.set(attempts.get() + 1);
            anyhow::bail!("attempt {}", attempts.get())
        });
        assert_eq!(result.unwrap_err().to_string(), "attempt 2");
        assert_eq!(attempts.get(), 2);
    }

    #[test]
    fn test_callback_invoked_between_attempts() {
        struct Counting(Arc<AtomicU32>);
        impl RetryCallback for Counting {
            fn on_retry(&self, _: u32, _: u32, _: &anyhow::Error, _: Duration) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let count = Arc::new(AtomicU32::new(0));
        let callback = Counting(count.clone());
        let _: Result<()> = with_retry(&policy(3), Some(&callback), || anyhow::bail!("boom"));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_policy_from_resource() {
        let resource = Resource::new("exec", "make")
            .with_param("tries", "3")
            .with_param("try_sleep", 2_i64);
        let policy = RetryPolicy::from_resource(&resource);
        assert_eq!(policy.tries, 3);
        assert_eq!(policy.try_sleep, Duration::from_secs(2));

        let bad = Resource::new("exec", "make").with_param("tries", "zero");
        assert_eq!(RetryPolicy::from_resource(&bad), RetryPolicy::default());
    }
}
