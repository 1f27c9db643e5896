//! Handler-facing execution context
//!
//! The [`WorkflowContext`] is the surface a workflow handler programs
//! against: named steps via [`step`](WorkflowContext::step) and durable
//! pauses via [`sleep`](WorkflowContext::sleep).

mod step;

pub use step::StepBuilder;

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::debug;

use crate::persistence::{StepRecord, StepStatus, WorkflowStore};
use crate::workflow::StepError;

/// Context handed to a workflow handler for one workflow attempt
///
/// # Determinism contract
///
/// A handler must be **deterministic in its control flow** given the same
/// input and the outputs of previously completed steps: on every re-entry
/// it must reach the same step names in the same order. Step function
/// *bodies* may be non-deterministic (wall clocks, network calls) — their
/// outputs are frozen in the store on first completion and replayed from
/// there ever after. Step and sleep names are the memoization keys within
/// an execution, so they must be stable across re-entries.
#[derive(Clone)]
pub struct WorkflowContext {
    execution_id: String,
    workflow_name: String,
    input: Value,
    attempt: u32,
    metadata: Value,
    store: Arc<dyn WorkflowStore>,
    cancelled: Arc<AtomicBool>,
    default_step_attempts: u32,
}

impl WorkflowContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        execution_id: String,
        workflow_name: String,
        input: Value,
        attempt: u32,
        metadata: Value,
        store: Arc<dyn WorkflowStore>,
        cancelled: Arc<AtomicBool>,
        default_step_attempts: u32,
    ) -> Self {
        Self {
            execution_id,
            workflow_name,
            input,
            attempt,
            metadata,
            store,
            cancelled,
            default_step_attempts,
        }
    }

    /// Caller-supplied execution id
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Name of the workflow being executed
    pub fn workflow_name(&self) -> &str {
        &self.workflow_name
    }

    /// Input payload the execution was started with
    pub fn input(&self) -> &Value {
        &self.input
    }

    /// Current workflow attempt (1-based)
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Metadata payload persisted on the execution row
    pub fn metadata(&self) -> &Value {
        &self.metadata
    }

    /// Check whether cancellation was requested
    ///
    /// Cancellation is cooperative: `step` and `sleep` check this flag at
    /// entry, and long-running step bodies may poll it to bail out early.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub(crate) fn store(&self) -> &Arc<dyn WorkflowStore> {
        &self.store
    }

    pub(crate) fn default_step_attempts(&self) -> u32 {
        self.default_step_attempts
    }

    /// Begin a named step
    ///
    /// The returned builder accumulates error handlers, an optional circuit
    /// breaker, and the attempt budget; nothing runs until
    /// [`execute`](StepBuilder::execute) is called.
    pub fn step<F, Fut>(&self, name: impl Into<String>, f: F) -> StepBuilder<F>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Value, StepError>> + Send,
    {
        StepBuilder::new(self.clone(), name.into(), f)
    }

    /// Durable sleep
    ///
    /// A degenerate step: the pause is recorded before blocking and its
    /// completion after, so a resumed execution does not re-sleep a
    /// completed sleep, while a sleep interrupted by a crash is slept
    /// again in full.
    pub async fn sleep(&self, name: &str, duration: Duration) -> Result<(), StepError> {
        if self.is_cancelled() {
            return Err(StepError::cancelled(&self.execution_id));
        }

        if let Some(row) = self.store.find_step(&self.execution_id, name).await? {
            if row.status == StepStatus::Completed {
                debug!(sleep = name, execution_id = %self.execution_id, "sleep already completed, skipping");
                return Ok(());
            }
        }

        let duration_ms = duration.as_millis() as u64;
        let started_at = Utc::now();
        let mut row = StepRecord {
            execution_id: self.execution_id.clone(),
            step_name: name.to_string(),
            status: StepStatus::Running,
            input: Some(json!({ "duration_ms": duration_ms })),
            output: None,
            error: None,
            attempt: 1,
            max_attempts: 1,
            started_at: Some(started_at),
            completed_at: None,
        };
        self.store.upsert_step(&row).await?;

        debug!(sleep = name, execution_id = %self.execution_id, duration_ms, "sleeping");
        tokio::time::sleep(duration).await;

        row.status = StepStatus::Completed;
        row.output = Some(json!({ "slept_ms": duration_ms }));
        row.completed_at = Some(Utc::now());
        self.store.upsert_step(&row).await?;

        Ok(())
    }
}

impl std::fmt::Debug for WorkflowContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowContext")
            .field("execution_id", &self.execution_id)
            .field("workflow_name", &self.workflow_name)
            .field("attempt", &self.attempt)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{ExecutionRecord, ExecutionStatus, InMemoryWorkflowStore};

    async fn test_context(store: Arc<dyn WorkflowStore>) -> WorkflowContext {
        let now = Utc::now();
        store
            .create_execution(&ExecutionRecord {
                id: "e1".to_string(),
                workflow_name: "w".to_string(),
                status: ExecutionStatus::Running,
                input: json!({}),
                output: None,
                error: None,
                metadata: json!({}),
                started_at: Some(now),
                completed_at: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();

        WorkflowContext::new(
            "e1".to_string(),
            "w".to_string(),
            json!({}),
            1,
            json!({}),
            store,
            Arc::new(AtomicBool::new(false)),
            3,
        )
    }

    #[tokio::test]
    async fn test_sleep_creates_completed_row() {
        let store: Arc<dyn WorkflowStore> = Arc::new(InMemoryWorkflowStore::new());
        let ctx = test_context(store.clone()).await;

        ctx.sleep("pause", Duration::from_millis(10)).await.unwrap();

        let row = store.find_step("e1", "pause").await.unwrap().unwrap();
        assert_eq!(row.status, StepStatus::Completed);
        assert_eq!(row.input, Some(json!({ "duration_ms": 10 })));
        assert_eq!(row.output, Some(json!({ "slept_ms": 10 })));
        assert!(row.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_zero_duration_sleep_still_recorded() {
        let store: Arc<dyn WorkflowStore> = Arc::new(InMemoryWorkflowStore::new());
        let ctx = test_context(store.clone()).await;

        ctx.sleep("instant", Duration::ZERO).await.unwrap();

        let row = store.find_step("e1", "instant").await.unwrap().unwrap();
        assert_eq!(row.status, StepStatus::Completed);
        assert_eq!(row.output, Some(json!({ "slept_ms": 0 })));
    }

    #[tokio::test]
    async fn test_sleep_is_memoized() {
        let store: Arc<dyn WorkflowStore> = Arc::new(InMemoryWorkflowStore::new());
        let ctx = test_context(store.clone()).await;

        ctx.sleep("nap", Duration::from_millis(20)).await.unwrap();

        let first = store.find_step("e1", "nap").await.unwrap().unwrap();

        // The second call must return without re-sleeping or rewriting
        let started = std::time::Instant::now();
        ctx.sleep("nap", Duration::from_millis(500)).await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(100));

        let second = store.find_step("e1", "nap").await.unwrap().unwrap();
        assert_eq!(first.output, second.output);
    }

    #[tokio::test]
    async fn test_sleep_rejected_when_cancelled() {
        let store: Arc<dyn WorkflowStore> = Arc::new(InMemoryWorkflowStore::new());
        let ctx = test_context(store.clone()).await;
        ctx.cancelled.store(true, Ordering::Relaxed);

        let result = ctx.sleep("pause", Duration::from_millis(10)).await;
        assert!(result.is_err());
        assert!(store.find_step("e1", "pause").await.unwrap().is_none());
    }
}
