//! Retry Policy Module
//!
//! Bounded retry for backend errors tagged transient. The policy decides
//! *whether* another attempt is allowed and *how long* to wait; the executor
//! owns the loop and the sleep.
//!
//! Backoff strategies:
//!
//! - **Constant**: same delay between every attempt
//! - **Linear**: delay grows by `base` each attempt
//! - **Exponential**: delay doubles with each attempt
//! - **DecorrelatedJitter**: AWS-style randomized growth
//!
//! # Example
//!
//! ```rust,ignore
//! use stackplan::retry::{RetryPolicy, BackoffStrategy};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::builder()
//!     .max_retries(5)
//!     .backoff(BackoffStrategy::Exponential {
//!         base: Duration::from_millis(200),
//!         max: Duration::from_secs(20),
//!     })
//!     .jitter(0.25)
//!     .build();
//! ```

use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Trait for errors that can indicate whether they're retryable
pub trait RetryableError: std::error::Error {
    /// Check if this error is retryable
    fn is_retryable(&self) -> bool;

    /// Get the recommended delay before retry (if any)
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Action to take after an error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryAction {
    /// Retry after the specified delay
    Retry { delay: Duration },
    /// Stop retrying
    Stop { reason: String },
}

/// Context for retry operations
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Name of the operation being retried
    pub operation_name: String,
    /// Number of failed attempts recorded so far
    pub attempt: u32,
    /// Time when the first attempt started
    pub started_at: Instant,
    /// Total time spent so far
    pub elapsed: Duration,
    /// Last error message (if any)
    pub last_error: Option<String>,
    /// Delay chosen before the most recent retry
    pub last_delay: Option<Duration>,
    /// Accumulated delay time
    pub total_delay: Duration,
}

impl RetryContext {
    /// Create a new retry context
    pub fn new(operation_name: &str) -> Self {
        Self {
            operation_name: operation_name.to_string(),
            attempt: 0,
            started_at: Instant::now(),
            elapsed: Duration::ZERO,
            last_error: None,
            last_delay: None,
            total_delay: Duration::ZERO,
        }
    }

    /// Record a failed attempt
    pub fn record_attempt<E: std::error::Error>(&mut self, error: &E) {
        self.attempt += 1;
        self.elapsed = self.started_at.elapsed();
        self.last_error = Some(error.to_string());
    }

    /// Add delay to total
    pub fn add_delay(&mut self, delay: Duration) {
        self.last_delay = Some(delay);
        self.total_delay += delay;
    }
}

/// Backoff strategy for calculating delay between retries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Constant delay between retries
    Constant {
        #[serde(with = "humantime_serde")]
        delay: Duration,
    },

    /// Linear increase: delay = base * (attempt + 1)
    Linear {
        #[serde(with = "humantime_serde")]
        base: Duration,
        #[serde(with = "humantime_serde")]
        max: Duration,
    },

    /// Exponential increase: delay = base * 2^attempt
    Exponential {
        #[serde(with = "humantime_serde")]
        base: Duration,
        #[serde(with = "humantime_serde")]
        max: Duration,
    },

    /// Decorrelated jitter (AWS-style)
    DecorrelatedJitter {
        #[serde(with = "humantime_serde")]
        base: Duration,
        #[serde(with = "humantime_serde")]
        max: Duration,
    },
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_millis(500),
            max: Duration::from_secs(30),
        }
    }
}

impl BackoffStrategy {
    /// Calculate delay for a given attempt (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32, last_delay: Option<Duration>) -> Duration {
        match self {
            BackoffStrategy::Constant { delay } => *delay,

            BackoffStrategy::Linear { base, max } => {
                let delay = base.saturating_mul(attempt.saturating_add(1));
                delay.min(*max)
            }

            BackoffStrategy::Exponential { base, max } => {
                // Prevent overflow by capping the exponent
                let exp = attempt.min(30);
                let multiplier = 2u32.saturating_pow(exp);
                base.saturating_mul(multiplier).min(*max)
            }

            BackoffStrategy::DecorrelatedJitter { base, max } => {
                // sleep = min(max, random_between(base, last * 3))
                let last = last_delay.unwrap_or(*base);
                let low = base.as_millis() as u64;
                let high = (last.as_millis() as u64).saturating_mul(3).max(low);
                let sleep = rand::thread_rng().gen_range(low..=high);
                Duration::from_millis(sleep).min(*max)
            }
        }
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts after the first failure
    pub max_retries: u32,

    /// Backoff strategy for calculating delays
    pub backoff: BackoffStrategy,

    /// Maximum total time to spend retrying
    #[serde(with = "humantime_serde")]
    pub max_duration: Option<Duration>,

    /// Jitter factor (0.0 to 1.0) to add randomness to delays
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: BackoffStrategy::default(),
            max_duration: Some(Duration::from_secs(300)),
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Create a simple retry policy with constant delay and no jitter
    pub fn constant(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            backoff: BackoffStrategy::Constant { delay },
            jitter: 0.0,
            ..Default::default()
        }
    }

    /// Create an exponential backoff policy
    pub fn exponential_backoff(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            backoff: BackoffStrategy::Exponential {
                base: base_delay,
                max: Duration::from_secs(30),
            },
            ..Default::default()
        }
    }

    /// Create a builder for custom configuration
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::new()
    }

    /// Determine whether to retry based on context and error.
    ///
    /// Only errors that report themselves retryable are retried; the
    /// classification is the backend's, never inferred from the message.
    pub fn should_retry<E: RetryableError>(&self, context: &RetryContext, error: &E) -> RetryAction {
        if !error.is_retryable() {
            return RetryAction::Stop {
                reason: "Error is not retryable".to_string(),
            };
        }

        if context.attempt > self.max_retries {
            return RetryAction::Stop {
                reason: format!("Maximum retries ({}) exceeded", self.max_retries),
            };
        }

        if let Some(max_duration) = self.max_duration {
            if context.elapsed >= max_duration {
                return RetryAction::Stop {
                    reason: format!("Maximum duration ({:?}) exceeded", max_duration),
                };
            }
        }

        if let Some(retry_after) = error.retry_after() {
            return RetryAction::Retry { delay: retry_after };
        }

        // `attempt` counts failures, the first retry uses backoff step 0
        let step = context.attempt.saturating_sub(1);
        let base_delay = self.backoff.delay_for_attempt(step, context.last_delay);

        // Config files bypass the builder's clamp
        let jitter = if self.jitter.is_finite() {
            self.jitter.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let delay = if jitter > 0.0 {
            let mut rng = rand::thread_rng();
            let jitter_factor = 1.0 + rng.gen_range(-jitter..jitter);
            Duration::from_millis((base_delay.as_millis() as f64 * jitter_factor) as u64)
        } else {
            base_delay
        };

        RetryAction::Retry { delay }
    }
}

/// Builder for RetryPolicy
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self {
            policy: RetryPolicy::default(),
        }
    }

    /// Set maximum retries
    pub fn max_retries(mut self, max: u32) -> Self {
        self.policy.max_retries = max;
        self
    }

    /// Set backoff strategy
    pub fn backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.policy.backoff = strategy;
        self
    }

    /// Set maximum duration
    pub fn max_duration(mut self, duration: Duration) -> Self {
        self.policy.max_duration = Some(duration);
        self
    }

    /// Set jitter factor (0.0 to 1.0)
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.policy.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Build the policy
    pub fn build(self) -> RetryPolicy {
        self.policy
    }
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}
