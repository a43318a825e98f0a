//! Retry budgets and backoff scheduling
//!
//! A [`RetryPolicy`] holds one budget per failure class (connect, read,
//! redirect, status) plus an optional total cap. The default transport maps
//! a single `max_retries` onto every budget and the total, so all classes
//! draw from one pool. The cloud storage transport keeps them independent.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;

use crate::error::{Error, Result};

/// Status codes retried by the default transport
pub const DEFAULT_RETRY_CODES: [u16; 3] = [429, 500, 503];

/// Status codes that generally indicate a transient failure of a storage service
pub const TRANSIENT_FAILURE_CODES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Statuses whose `Retry-After` header is honoured
pub const RETRY_AFTER_STATUS_CODES: [u16; 3] = [413, 429, 503];

/// Upper bound on `max_retries` (exclusive)
pub const MAX_RETRIES_LIMIT: u32 = 10;

/// Upper bound on `backoff_factor` in seconds (exclusive)
pub const BACKOFF_FACTOR_LIMIT: f64 = 120.0;

/// Longest single delay between two attempts
pub const MAX_BACKOFF: Duration = Duration::from_secs(120);

/// Caller-facing retry settings of the default transport
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Additional attempts after the first one
    pub max_retries: u32,
    /// Seconds; delay before retry `i` is `backoff_factor * 2^(i-1)`, 0 disables it
    pub backoff_factor: f64,
    /// Response status codes that qualify for a retry
    pub retry_codes: BTreeSet<u16>,
    /// Per-attempt connect and read timeout
    pub timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_factor: 5.0,
            retry_codes: DEFAULT_RETRY_CODES.into_iter().collect(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl RetryConfig {
    /// Create a config with the given retry count and default everything else
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    pub fn with_backoff_factor(mut self, seconds: f64) -> Self {
        self.backoff_factor = seconds;
        self
    }

    pub fn with_retry_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.retry_codes = codes.into_iter().collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Check the bounds; called before any request is sent
    pub fn validate(&self) -> Result<()> {
        if self.max_retries >= MAX_RETRIES_LIMIT {
            return Err(Error::configuration(
                "max_retries",
                format!(
                    "must satisfy 0 <= max_retries < {}, got {}",
                    MAX_RETRIES_LIMIT, self.max_retries
                ),
            ));
        }

        if !self.backoff_factor.is_finite()
            || self.backoff_factor < 0.0
            || self.backoff_factor >= BACKOFF_FACTOR_LIMIT
        {
            return Err(Error::configuration(
                "backoff_factor",
                format!(
                    "must satisfy 0 <= backoff_factor < {}, got {}",
                    BACKOFF_FACTOR_LIMIT, self.backoff_factor
                ),
            ));
        }

        if self.timeout.is_zero() {
            return Err(Error::configuration("timeout", "timeout cannot be zero"));
        }

        Ok(())
    }
}

/// How long to wait between two attempts
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackoffStrategy {
    /// `factor * 2^(retry - 1)` seconds, capped at [`MAX_BACKOFF`]
    Exponential { factor: f64 },
    /// The same delay before every retry
    Fixed(Duration),
}

impl BackoffStrategy {
    fn create_backoff(&self) -> Option<ExponentialBackoff> {
        match self {
            BackoffStrategy::Exponential { factor } => {
                let initial = Duration::try_from_secs_f64(*factor).unwrap_or(Duration::ZERO);
                Some(ExponentialBackoff {
                    current_interval: initial,
                    initial_interval: initial,
                    randomization_factor: 0.0,
                    multiplier: 2.0,
                    max_interval: MAX_BACKOFF,
                    max_elapsed_time: None,
                    ..Default::default()
                })
            }
            BackoffStrategy::Fixed(_) => None,
        }
    }
}

/// Independent retry budgets per failure class
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Cap on retries of any class; `None` leaves only the per-class budgets
    pub total: Option<u32>,
    /// Failures before a connection was established
    pub connect: u32,
    /// Failures after connecting, while reading the response
    pub read: u32,
    /// Redirect hops followed
    pub redirect: u32,
    /// Responses with a status in `status_codes`
    pub status: u32,
    pub status_codes: BTreeSet<u16>,
    pub backoff: BackoffStrategy,
}

impl RetryPolicy {
    /// One shared budget of `max_retries` across every failure class
    pub fn shared(config: &RetryConfig) -> Self {
        Self {
            total: Some(config.max_retries),
            connect: config.max_retries,
            read: config.max_retries,
            redirect: config.max_retries,
            status: config.max_retries,
            status_codes: config.retry_codes.clone(),
            backoff: BackoffStrategy::Exponential {
                factor: config.backoff_factor,
            },
        }
    }

    /// Budgets for pre-signed storage URLs
    ///
    /// Connect failures are not retried (usually a bad or expired URL), read
    /// failures once, redirects up to three hops, transient statuses
    /// `status_retries` times with a fixed one second pause.
    pub fn cloud_storage(status_retries: u32) -> Self {
        Self {
            total: None,
            connect: 0,
            read: 1,
            redirect: 3,
            status: status_retries,
            status_codes: TRANSIENT_FAILURE_CODES.into_iter().collect(),
            backoff: BackoffStrategy::Fixed(Duration::from_secs(1)),
        }
    }

    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.status_codes.contains(&status)
    }
}

/// Why an attempt did not produce a final outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryCause {
    Connect,
    Read,
    Redirect,
    Status(u16),
}

impl fmt::Display for RetryCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryCause::Connect => write!(f, "connect failure"),
            RetryCause::Read => write!(f, "read failure"),
            RetryCause::Redirect => write!(f, "redirect"),
            RetryCause::Status(code) => write!(f, "status {}", code),
        }
    }
}

/// Decision on whether to retry a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the request after the specified delay
    Retry { delay: Duration },
    /// Do not retry the request
    NoRetry,
}

/// Per-call retry bookkeeping
#[derive(Debug)]
pub struct RetryHandler {
    policy: RetryPolicy,
    total: u32,
    connect: u32,
    read: u32,
    redirect: u32,
    status: u32,
    backoff: Option<ExponentialBackoff>,
}

impl RetryHandler {
    pub fn new(policy: RetryPolicy) -> Self {
        let backoff = policy.backoff.create_backoff();
        Self {
            policy,
            total: 0,
            connect: 0,
            read: 0,
            redirect: 0,
            status: 0,
            backoff,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Consume one unit of the budget for `cause` if any is left
    ///
    /// `retry_after` is the server's `Retry-After` hint; it replaces the
    /// computed delay when the status is one of [`RETRY_AFTER_STATUS_CODES`].
    pub fn should_retry(
        &mut self,
        cause: RetryCause,
        retry_after: Option<Duration>,
    ) -> RetryDecision {
        if let Some(total) = self.policy.total {
            if self.total >= total {
                return RetryDecision::NoRetry;
            }
        }

        let (used, budget) = match cause {
            RetryCause::Connect => (&mut self.connect, self.policy.connect),
            RetryCause::Read => (&mut self.read, self.policy.read),
            RetryCause::Redirect => (&mut self.redirect, self.policy.redirect),
            RetryCause::Status(_) => (&mut self.status, self.policy.status),
        };

        if *used >= budget {
            return RetryDecision::NoRetry;
        }

        *used += 1;
        self.total += 1;

        if cause == RetryCause::Redirect {
            return RetryDecision::Retry {
                delay: Duration::ZERO,
            };
        }

        let computed = self.next_delay();
        let delay = match (cause, retry_after) {
            (RetryCause::Status(code), Some(hint)) if RETRY_AFTER_STATUS_CODES.contains(&code) => {
                hint.min(MAX_BACKOFF)
            }
            _ => computed,
        };

        RetryDecision::Retry { delay }
    }

    fn next_delay(&mut self) -> Duration {
        match (&mut self.backoff, self.policy.backoff) {
            (Some(backoff), _) => backoff.next_backoff().unwrap_or(MAX_BACKOFF).min(MAX_BACKOFF),
            (None, BackoffStrategy::Fixed(delay)) => delay,
            (None, BackoffStrategy::Exponential { .. }) => Duration::ZERO,
        }
    }

    /// Retries granted so far, across all classes
    pub fn attempts(&self) -> u32 {
        self.total
    }
}

/// Blocks the calling thread between attempts; injectable for tests
pub trait Sleeper: Send + Sync + fmt::Debug {
    fn sleep(&self, duration: Duration);
}

/// [`Sleeper`] backed by `std::thread::sleep`
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}
