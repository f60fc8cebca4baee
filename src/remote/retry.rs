use std::{fmt, thread, time::{Duration, Instant}};

use anyhow::Result;
use tracing::{debug, warn};

/// Outcome of one failed provider call.
#[derive(Debug)]
pub enum CallError {
    /// Worth retrying: timeouts, connection resets, 429 and 5xx responses.
    Transient(anyhow::Error),
    /// Aborts the batch: rejected credentials or a malformed request.
    Fatal(anyhow::Error),
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient(err) => write!(f, "transient: {err:#}"),
            Self::Fatal(err) => write!(f, "fatal: {err:#}"),
        }
    }
}

/// Answer of one provider query.
///
/// `Failed` means the provider kept erroring for this query; unlike
/// `NoMatch` it says nothing about the query and is never cached.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Lookup<T> {
    Found(T),
    NoMatch,
    Failed,
}

impl<T> Lookup<T> {
    /// `Found` for `Some`, `NoMatch` for `None`.
    pub fn from_option(value: Option<T>) -> Self {
        value.map_or(Self::NoMatch, Self::Found)
    }

    /// The value, with both kinds of miss collapsed to `None`.
    pub fn found(self) -> Option<T> {
        match self {
            Self::Found(value) => Some(value),
            Self::NoMatch | Self::Failed => None,
        }
    }

    #[inline] pub fn is_failed(&self) -> bool { matches!(self, Self::Failed) }

    /// Parse a decoded response, or pass through an exhausted retry as `Failed`.
    pub fn from_response<B>(body: Option<B>, parse: impl FnOnce(&B) -> Option<T>) -> Self {
        match body {
            Some(body) => Self::from_option(parse(&body)),
            None => Self::Failed,
        }
    }
}

/// Bounded exponential backoff.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3, base_delay: Duration::from_millis(500), max_delay: Duration::from_secs(8) }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self { max_retries, base_delay, ..Self::default() }
    }

    /// Delay before retry number `attempt` (0-based): base × 2^attempt, capped.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `call` until it succeeds, fails fatally or runs out of retries.
    ///
    /// Exhausted retries degrade to `Ok(None)`; a fatal failure is returned as `Err`.
    pub fn run<T>(&self, label: &str, mut call: impl FnMut() -> Result<T, CallError>) -> Result<Option<T>> {
        let mut attempt = 0;
        loop {
            match call() {
                Ok(value) => return Ok(Some(value)),
                Err(CallError::Fatal(err)) => return Err(err.context(format!("[remote] {label}"))),
                Err(CallError::Transient(err)) if attempt < self.max_retries => {
                    let delay = self.delay(attempt);
                    debug!(label, attempt, ?delay, err = %format!("{err:#}"), "retrying");
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(CallError::Transient(err)) => {
                    warn!(label, attempts = attempt + 1, err = %format!("{err:#}"), "giving up on item");
                    return Ok(None);
                }
            }
        }
    }
}

/// Keeps successive calls at least `min_interval` apart.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last: Option<Instant>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self { Self { min_interval, last: None } }

    /// Block until the next call is allowed, then mark it as made.
    pub fn wait(&mut self) {
        if let Some(last) = self.last {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                thread::sleep(self.min_interval - elapsed);
            }
        }
        self.last = Some(Instant::now());
    }
}

impl Default for RateLimiter {
    fn default() -> Self { Self::new(Duration::from_millis(200)) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    fn instant() -> RetryPolicy { RetryPolicy::new(2, Duration::ZERO) }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(10, Duration::from_millis(100));
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(400));
        assert_eq!(policy.delay(40), policy.max_delay);
    }

    #[test]
    fn transient_failures_are_retried_then_succeed() {
        let mut calls = 0;
        let result = instant().run("test", || {
            calls += 1;
            if calls < 3 { Err(CallError::Transient(anyhow!("503"))) } else { Ok(7) }
        });
        assert_eq!(result.unwrap(), Some(7));
        assert_eq!(calls, 3);
    }

    #[test]
    fn exhausted_retries_degrade_to_none() {
        let mut calls = 0;
        let result: Result<Option<u8>> = instant().run("test", || {
            calls += 1;
            Err(CallError::Transient(anyhow!("timeout")))
        });
        assert_eq!(result.unwrap(), None);
        assert_eq!(calls, 3);
    }

    #[test]
    fn fatal_failures_abort_immediately() {
        let mut calls = 0;
        let result: Result<Option<u8>> = instant().run("test", || {
            calls += 1;
            Err(CallError::Fatal(anyhow!("401 Unauthorized")))
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn responses_become_lookups() {
        let parse = |b: &u8| (*b > 0).then_some(*b);
        assert_eq!(Lookup::from_response(Some(3u8), parse), Lookup::Found(3));
        assert_eq!(Lookup::from_response(Some(0u8), parse), Lookup::NoMatch);
        assert_eq!(Lookup::from_response(None, parse), Lookup::Failed);
        assert_eq!(Lookup::<u8>::Failed.found(), None);
        assert!(Lookup::<u8>::Failed.is_failed());
    }

    #[test]
    fn limiter_spaces_calls() {
        let mut limiter = RateLimiter::new(Duration::from_millis(20));
        let start = Instant::now();
        limiter.wait();
        limiter.wait();
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
