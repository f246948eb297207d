//! Activity contract, retry policies and per-activity options.

use crate::error::ActivityError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Type-safe activity name wrapper.
///
/// # Examples
///
/// ```
/// use orderflow_core::ActivityName;
///
/// let name = ActivityName::new("checkInventory");
/// assert_eq!(name.as_str(), "checkInventory");
///
/// let name: ActivityName = "processPayment".into();
/// assert_eq!(name.to_string(), "processPayment");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActivityName(String);

impl ActivityName {
    /// Creates a new ActivityName
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the activity name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActivityName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ActivityName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ActivityName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for ActivityName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for ActivityName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for ActivityName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Retry policy for activity execution.
///
/// Attempt counts include the first invocation, so `max_attempts == 3`
/// means one call plus up to two retries.
///
/// # Examples
///
/// ```
/// use orderflow_core::RetryPolicy;
/// use std::time::Duration;
///
/// // Single attempt, no retry
/// let policy = RetryPolicy::None;
/// assert_eq!(policy.max_attempts(), 1);
///
/// // Three attempts, one second apart
/// let policy = RetryPolicy::fixed(3, Duration::from_secs(1));
///
/// // Three attempts with doubling backoff starting at 1s
/// let policy = RetryPolicy::exponential(3, Duration::from_secs(1));
/// assert_eq!(policy.delay_for_attempt(1), Some(Duration::from_secs(2)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// Fail on the first error.
    #[default]
    None,
    /// Fixed delay between attempts.
    Fixed {
        /// Maximum number of attempts, first call included
        max_attempts: u32,
        /// Delay between attempts
        delay: Duration,
    },
    /// Exponential backoff between attempts.
    ExponentialBackoff {
        /// Maximum number of attempts, first call included
        max_attempts: u32,
        /// Delay after the first failed attempt
        initial_delay: Duration,
        /// Upper bound for any single delay
        max_delay: Duration,
        /// Factor applied to the delay after each failed attempt
        multiplier: u32,
    },
}

/// Error returned when [`RetryPolicy`] configuration is invalid.
///
/// ```
/// use orderflow_core::RetryPolicy;
/// use std::time::Duration;
///
/// let result = RetryPolicy::exponential_backoff(
///     3,
///     Duration::from_millis(100),
///     Duration::from_secs(10),
///     0,
/// );
/// assert!(result.is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicyError(pub &'static str);

impl fmt::Display for RetryPolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for RetryPolicyError {}

impl RetryPolicy {
    /// Creates a fixed-delay policy.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        RetryPolicy::Fixed {
            max_attempts,
            delay,
        }
    }

    /// Creates an exponential backoff policy with `multiplier = 2` and a
    /// 10 second cap.
    ///
    /// ```
    /// use orderflow_core::RetryPolicy;
    /// use std::time::Duration;
    ///
    /// let policy = RetryPolicy::exponential(5, Duration::from_millis(100));
    ///
    /// // Delays: 100ms, 200ms, 400ms, 800ms
    /// assert_eq!(policy.delay_for_attempt(0), Some(Duration::from_millis(100)));
    /// assert_eq!(policy.delay_for_attempt(2), Some(Duration::from_millis(400)));
    /// ```
    pub fn exponential(max_attempts: u32, initial_delay: Duration) -> Self {
        RetryPolicy::ExponentialBackoff {
            max_attempts,
            initial_delay,
            max_delay: Duration::from_secs(10).max(initial_delay),
            multiplier: 2,
        }
    }

    /// Creates an exponential backoff policy with custom settings.
    ///
    /// # Errors
    ///
    /// Returns [`RetryPolicyError`] if:
    /// - `max_attempts` is 0
    /// - `multiplier` is 0 or greater than 10
    /// - `max_delay` is less than `initial_delay`
    pub fn exponential_backoff(
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
        multiplier: u32,
    ) -> Result<Self, RetryPolicyError> {
        if max_attempts == 0 {
            return Err(RetryPolicyError("max_attempts must be at least 1"));
        }
        if multiplier == 0 {
            return Err(RetryPolicyError("multiplier must be greater than 0"));
        }
        if multiplier > 10 {
            return Err(RetryPolicyError(
                "multiplier must be 10 or less to avoid overflow",
            ));
        }
        if max_delay < initial_delay {
            return Err(RetryPolicyError("max_delay must be >= initial_delay"));
        }
        Ok(RetryPolicy::ExponentialBackoff {
            max_attempts,
            initial_delay,
            max_delay,
            multiplier,
        })
    }

    /// Returns the total number of attempts allowed, never less than one.
    pub fn max_attempts(&self) -> u32 {
        match self {
            RetryPolicy::None => 1,
            RetryPolicy::Fixed { max_attempts, .. } => (*max_attempts).max(1),
            RetryPolicy::ExponentialBackoff { max_attempts, .. } => (*max_attempts).max(1),
        }
    }

    /// Delay to wait after failed attempt number `attempt` (0-indexed).
    ///
    /// Returns `None` for [`RetryPolicy::None`].
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        match self {
            RetryPolicy::None => None,
            RetryPolicy::Fixed { delay, .. } => Some(*delay),
            RetryPolicy::ExponentialBackoff {
                initial_delay,
                max_delay,
                multiplier,
                ..
            } => {
                let factor = (*multiplier as u64).saturating_pow(attempt);
                let delay = (initial_delay.as_millis() as u64).saturating_mul(factor);
                Some(Duration::from_millis(
                    delay.min(max_delay.as_millis() as u64),
                ))
            }
        }
    }
}

/// Execution options for an activity.
///
/// ```
/// use orderflow_core::{ActivityOptions, RetryPolicy};
/// use std::time::Duration;
///
/// let options = ActivityOptions {
///     start_to_close_timeout: Duration::from_secs(15),
///     retry_policy: RetryPolicy::exponential(3, Duration::from_secs(1)),
/// };
/// assert_eq!(options.retry_policy.max_attempts(), 3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityOptions {
    /// Maximum duration of a single attempt.
    pub start_to_close_timeout: Duration,
    /// Retry policy applied when an attempt fails or times out.
    pub retry_policy: RetryPolicy,
}

impl Default for ActivityOptions {
    fn default() -> Self {
        Self {
            start_to_close_timeout: Duration::from_secs(10),
            retry_policy: RetryPolicy::exponential(3, Duration::from_secs(1)),
        }
    }
}

/// A side-effecting step invoked by the workflow through the retry executor.
///
/// Activities receive only their declared input. They may be non-deterministic;
/// the workflow only ever sees the recorded output.
///
/// # Examples
///
/// ```
/// use orderflow_core::{Activity, ActivityError, ActivityName};
/// use async_trait::async_trait;
///
/// struct Echo;
///
/// #[async_trait]
/// impl Activity for Echo {
///     type Input = String;
///     type Output = String;
///
///     async fn execute(&self, input: &String) -> Result<String, ActivityError> {
///         Ok(input.clone())
///     }
///
///     fn name(&self) -> ActivityName {
///         ActivityName::new("echo")
///     }
/// }
/// ```
#[async_trait]
pub trait Activity: Send + Sync {
    /// Activity input, recorded in history when the attempt is scheduled.
    type Input: Serialize + Send + Sync;
    /// Activity output, recorded in history and replayed on recovery.
    type Output: Serialize + DeserializeOwned + Send;

    /// Runs one attempt.
    async fn execute(&self, input: &Self::Input) -> Result<Self::Output, ActivityError>;

    /// Returns the activity name.
    fn name(&self) -> ActivityName;

    /// Returns the timeout and retry configuration.
    fn options(&self) -> ActivityOptions {
        ActivityOptions::default()
    }
}
