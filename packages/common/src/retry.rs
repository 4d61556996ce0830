use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

/// Bounded exponential backoff settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Total attempts including the first one. Always at least 1.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl BackoffPolicy {
    pub fn new(max_attempts: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms,
            max_delay_ms,
        }
    }

    /// Delay to wait after the given 1-based failed attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self.base_delay_ms, self.max_delay_ms)
    }

    /// Whether another attempt is allowed after `attempt` failures.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(3, 200, 5_000)
    }
}

/// Calculate exponential backoff delay with jitter.
///
/// Formula: `min(base_ms * 2^(attempt-1) + jitter, max_ms)` (0-25% jitter)
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let exp_factor = 2u64.saturating_pow(attempt - 1);
    let delay_ms = base_ms.saturating_mul(exp_factor);

    let jitter = if delay_ms > 0 {
        rand::rng().random_range(0..=delay_ms / 4)
    } else {
        0
    };

    Duration::from_millis(delay_ms.saturating_add(jitter).min(max_ms))
}

/// A single failed attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryAttempt {
    /// 1-based attempt number.
    pub attempt: u32,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

impl RetryAttempt {
    pub fn new(attempt: u32, error: impl Into<String>) -> Self {
        Self {
            attempt,
            error: error.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Result of recording a failure in the [`RetryTracker`].
#[derive(Debug, Clone)]
pub enum RetryDecision {
    Retry { attempt: u32, delay: Duration },
    Exhausted { history: Vec<RetryAttempt> },
}

#[derive(Debug, Clone)]
struct RetryState {
    history: Vec<RetryAttempt>,
    last_updated: Instant,
}

/// Tracks failures across redeliveries of the same unit of work, keyed by id.
#[derive(Debug)]
pub struct RetryTracker<K> {
    state: HashMap<K, RetryState>,
    policy: BackoffPolicy,
}

impl<K: Eq + Hash + Clone + Debug> RetryTracker<K> {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            state: HashMap::new(),
            policy,
        }
    }

    /// Record a failure and decide whether the work should be retried.
    pub fn record_failure(&mut self, key: &K, error: &str) -> RetryDecision {
        let entry = self.state.entry(key.clone()).or_insert_with(|| RetryState {
            history: Vec::new(),
            last_updated: Instant::now(),
        });

        let attempt = entry.history.len() as u32 + 1;
        entry.history.push(RetryAttempt::new(attempt, error));
        entry.last_updated = Instant::now();

        if self.policy.should_retry(attempt) {
            RetryDecision::Retry {
                attempt,
                delay: self.policy.delay(attempt),
            }
        } else {
            let history = self
                .state
                .remove(key)
                .map(|s| s.history)
                .unwrap_or_default();
            RetryDecision::Exhausted { history }
        }
    }

    pub fn clear(&mut self, key: &K) {
        self.state.remove(key);
    }

    pub fn attempts(&self, key: &K) -> u32 {
        self.state
            .get(key)
            .map(|s| s.history.len() as u32)
            .unwrap_or(0)
    }

    /// Remove entries that haven't been updated within `max_age`.
    pub fn cleanup_stale(&mut self, max_age: Duration) {
        let now = Instant::now();
        self.state
            .retain(|_, state| now.duration_since(state.last_updated) < max_age);
    }

    pub fn len(&self) -> usize {
        self.state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }
}

/// Spawn a background task that periodically drops stale tracker entries.
pub fn spawn_cleanup_task<K>(
    tracker: Arc<Mutex<RetryTracker<K>>>,
    cleanup_interval: Duration,
    max_age: Duration,
) -> tokio::task::JoinHandle<()>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(cleanup_interval);

        loop {
            interval.tick().await;
            let removed = {
                let mut guard = tracker.lock().await;
                let before = guard.len();
                guard.cleanup_stale(max_age);
                before - guard.len()
            };
            if removed > 0 {
                info!(removed, "Cleaned up stale retry tracker entries");
            }
        }
    })
}
