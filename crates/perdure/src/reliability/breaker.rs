//! Store-backed circuit breaker
//!
//! Breaker state lives in the persistent store so that an open breaker
//! stays open across process restarts and is shared by every execution
//! that references the same breaker name.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::{CircuitBreakerConfig, CircuitState};
use crate::persistence::{BreakerRecord, StoreError, WorkflowStore};

/// Listener invoked on every state transition: `(name, from, to)`
pub type StateChangeListener = Arc<dyn Fn(&str, CircuitState, CircuitState) + Send + Sync>;

/// Named admission controller over the persistent store
///
/// Every decision reads the breaker row; there is no local cache, so two
/// processes sharing a store observe the same admission state.
///
/// # Example
///
/// ```ignore
/// use perdure::{CircuitBreaker, CircuitBreakerConfig};
///
/// let breaker = CircuitBreaker::new("payments-gateway", config, store);
///
/// if breaker.allow().await? {
///     match call_gateway().await {
///         Ok(_) => breaker.record_success().await?,
///         Err(_) => breaker.record_failure().await?,
///     }
/// }
/// ```
pub struct CircuitBreaker {
    /// Unique key identifying this circuit breaker
    name: String,
    /// Circuit breaker configuration
    config: CircuitBreakerConfig,
    /// Store for persisting state
    store: Arc<dyn WorkflowStore>,
    /// Optional state-change listener
    listener: Option<StateChangeListener>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    pub fn new(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        store: Arc<dyn WorkflowStore>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            store,
            listener: None,
        }
    }

    /// Attach a state-change listener
    pub fn with_listener(mut self, listener: StateChangeListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Get the circuit breaker name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the circuit breaker configuration
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Check current state without recording anything
    pub async fn state(&self) -> Result<CircuitState, StoreError> {
        let record = self.store.fetch_or_create_breaker(&self.name).await?;
        Ok(record.state)
    }

    /// Check whether a call should be admitted
    ///
    /// Returns true in closed and half-open. In open, admission is denied
    /// until `next_attempt_at`; the first query at or past it transitions
    /// the breaker to half-open and admits the probe call.
    pub async fn allow(&self) -> Result<bool, StoreError> {
        let record = self.store.fetch_or_create_breaker(&self.name).await?;

        match record.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(true),
            CircuitState::Open => match record.next_attempt_at {
                Some(at) if Utc::now() >= at => {
                    self.transition(record, CircuitState::HalfOpen, |r| {
                        r.next_attempt_at = None;
                    })
                    .await?;
                    Ok(true)
                }
                _ => {
                    debug!(breaker = %self.name, "admission denied, circuit open");
                    Ok(false)
                }
            },
        }
    }

    /// Record a successful call
    pub async fn record_success(&self) -> Result<(), StoreError> {
        let mut record = self.store.fetch_or_create_breaker(&self.name).await?;

        match record.state {
            CircuitState::Closed => {
                if record.failure_count > 0 {
                    record.failure_count = 0;
                    record.updated_at = Utc::now();
                    self.store.update_breaker(&record).await?;
                }
                Ok(())
            }
            CircuitState::HalfOpen => {
                let successes = record.success_count + 1;
                if successes >= self.config.success_threshold {
                    self.transition(record, CircuitState::Closed, |r| {
                        r.failure_count = 0;
                        r.success_count = 0;
                        r.last_failure_at = None;
                        r.next_attempt_at = None;
                    })
                    .await
                } else {
                    record.success_count = successes;
                    record.updated_at = Utc::now();
                    self.store.update_breaker(&record).await
                }
            }
            // No successes to record while open
            CircuitState::Open => Ok(()),
        }
    }

    /// Record a failed call
    pub async fn record_failure(&self) -> Result<(), StoreError> {
        let mut record = self.store.fetch_or_create_breaker(&self.name).await?;
        let now = Utc::now();

        match record.state {
            CircuitState::Closed => {
                let failures = record.failure_count + 1;
                if failures >= self.config.failure_threshold {
                    warn!(breaker = %self.name, failures, "failure threshold reached, opening circuit");
                    self.transition(record, CircuitState::Open, |r| {
                        r.failure_count = failures;
                        r.last_failure_at = Some(now);
                        r.next_attempt_at = Some(next_attempt(now, self.config.reset_timeout));
                    })
                    .await
                } else {
                    record.failure_count = failures;
                    record.last_failure_at = Some(now);
                    record.updated_at = now;
                    self.store.update_breaker(&record).await
                }
            }
            CircuitState::HalfOpen => {
                warn!(breaker = %self.name, "probe call failed, reopening circuit");
                self.transition(record, CircuitState::Open, |r| {
                    r.success_count = 0;
                    r.last_failure_at = Some(now);
                    r.next_attempt_at = Some(next_attempt(now, self.config.reset_timeout));
                })
                .await
            }
            // Failures while open were never admitted
            CircuitState::Open => Ok(()),
        }
    }

    /// Force the breaker closed and clear its counters
    pub async fn reset(&self) -> Result<(), StoreError> {
        let record = self.store.fetch_or_create_breaker(&self.name).await?;
        if record.state == CircuitState::Closed && record.failure_count == 0 {
            return Ok(());
        }
        self.transition(record, CircuitState::Closed, |r| {
            r.failure_count = 0;
            r.success_count = 0;
            r.last_failure_at = None;
            r.next_attempt_at = None;
        })
        .await
    }

    async fn transition(
        &self,
        mut record: BreakerRecord,
        to: CircuitState,
        apply: impl FnOnce(&mut BreakerRecord),
    ) -> Result<(), StoreError> {
        let from = record.state;
        record.state = to;
        record.updated_at = Utc::now();
        apply(&mut record);
        self.store.update_breaker(&record).await?;

        if from != to {
            debug!(breaker = %self.name, %from, %to, "circuit state changed");
            if let Some(listener) = &self.listener {
                listener(&self.name, from, to);
            }
        }
        Ok(())
    }
}

fn next_attempt(now: DateTime<Utc>, reset_timeout: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(reset_timeout)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
