//! Retry-governed access to an [`AggregationSource`].
//!
//! Rate limits and dropped connections are retried with exponential
//! backoff plus jitter. Everything else, including running out of
//! attempts, comes back as [`Fetched::Failed`] so that callers can
//! degrade to "no data" without losing sight of what went wrong.

use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::error::Error;
use crate::model::Entity;
use crate::openalex::{AggregationSource, GroupQuery};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled for every further one.
    pub base_delay: Duration,
    /// Upper bound of the uniform jitter added to each delay.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_jitter: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Retry immediately. Meant for tests and local sources.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_jitter: Duration::ZERO,
        }
    }

    /// How long to wait after the failed attempt number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let backoff = self.base_delay.saturating_mul(2u32.saturating_pow(attempt));
        let jitter = if self.max_jitter.is_zero() {
            Duration::ZERO
        } else {
            self.max_jitter.mul_f64(rand::thread_rng().gen::<f64>())
        };
        backoff + jitter
    }
}

/// Outcome of one grouped query after retries.
#[derive(Debug)]
pub enum Fetched {
    Groups(Vec<Entity>),
    Empty,
    Failed(Error),
}

impl Fetched {
    /// The groups, or nothing for an empty or failed fetch.
    pub fn into_groups(self) -> Vec<Entity> {
        match self {
            Fetched::Groups(groups) => groups,
            Fetched::Empty | Fetched::Failed(_) => Vec::new(),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Fetched::Failed(_))
    }
}

pub struct Fetcher<S> {
    source: S,
    policy: RetryPolicy,
}

impl<S: AggregationSource> Fetcher<S> {
    pub fn new(source: S) -> Self {
        Self::with_policy(source, RetryPolicy::default())
    }

    pub fn with_policy(source: S, policy: RetryPolicy) -> Self {
        Self { source, policy }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub async fn fetch(&self, query: &GroupQuery) -> Fetched {
        for attempt in 0..self.policy.max_attempts {
            match self.source.group(query).await {
                Ok(groups) if groups.is_empty() => return Fetched::Empty,
                Ok(groups) => return Fetched::Groups(groups),
                Err(err) if err.is_retryable() => {
                    let wait = self.policy.delay(attempt);
                    if attempt > 2 {
                        warn!(
                            attempt,
                            wait_secs = wait.as_secs_f64(),
                            "rate limited, pausing: {err}"
                        );
                    } else {
                        debug!(attempt, wait_secs = wait.as_secs_f64(), "retrying: {err}");
                    }
                    if attempt + 1 < self.policy.max_attempts {
                        tokio::time::sleep(wait).await;
                    }
                }
                Err(err) => {
                    warn!(
                        filter = query.filter_param().unwrap_or_default(),
                        "query failed: {err}"
                    );
                    return Fetched::Failed(err);
                }
            }
        }
        warn!(
            attempts = self.policy.max_attempts,
            filter = query.filter_param().unwrap_or_default(),
            "giving up on query"
        );
        Fetched::Failed(Error::RetriesExhausted {
            attempts: self.policy.max_attempts,
        })
    }
}
