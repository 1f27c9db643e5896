//! In-memory implementation of WorkflowStore for testing

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::Value;

use super::store::*;
use crate::workflow::WorkflowFailure;

/// In-memory implementation of WorkflowStore
///
/// This is primarily for testing and for the `in_memory` engine
/// constructor. It stores all data in memory and provides the same
/// semantics as the SQLite implementation.
///
/// # Example
///
/// ```
/// use perdure::InMemoryWorkflowStore;
///
/// let store = InMemoryWorkflowStore::new();
/// ```
pub struct InMemoryWorkflowStore {
    definitions: RwLock<HashMap<String, DefinitionRecord>>,
    executions: RwLock<HashMap<String, ExecutionRecord>>,
    steps: RwLock<HashMap<(String, String), StepRecord>>,
    breakers: RwLock<HashMap<String, BreakerRecord>>,
}

impl InMemoryWorkflowStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self {
            definitions: RwLock::new(HashMap::new()),
            executions: RwLock::new(HashMap::new()),
            steps: RwLock::new(HashMap::new()),
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Get the number of executions
    pub fn execution_count(&self) -> usize {
        self.executions.read().len()
    }

    /// Get the number of step rows across all executions
    pub fn step_count(&self) -> usize {
        self.steps.read().len()
    }

    /// Clear all data (for testing)
    pub fn clear(&self) {
        self.definitions.write().clear();
        self.executions.write().clear();
        self.steps.write().clear();
        self.breakers.write().clear();
    }
}

impl Default for InMemoryWorkflowStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn upsert_definition(&self, definition: &DefinitionRecord) -> Result<(), StoreError> {
        let mut definitions = self.definitions.write();
        match definitions.get_mut(&definition.name) {
            Some(existing) => {
                let created_at = existing.created_at;
                *existing = definition.clone();
                existing.created_at = created_at;
                existing.updated_at = Utc::now();
            }
            None => {
                definitions.insert(definition.name.clone(), definition.clone());
            }
        }
        Ok(())
    }

    async fn list_definitions(&self) -> Result<Vec<DefinitionRecord>, StoreError> {
        let definitions = self.definitions.read();
        let mut active: Vec<_> = definitions
            .values()
            .filter(|d| d.active)
            .cloned()
            .collect();
        active.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(active)
    }

    async fn create_execution(&self, execution: &ExecutionRecord) -> Result<(), StoreError> {
        let mut executions = self.executions.write();
        if executions.contains_key(&execution.id) {
            return Err(StoreError::DuplicateExecution(execution.id.clone()));
        }
        executions.insert(execution.id.clone(), execution.clone());
        Ok(())
    }

    async fn find_execution(
        &self,
        execution_id: &str,
    ) -> Result<Option<ExecutionRecord>, StoreError> {
        Ok(self.executions.read().get(execution_id).cloned())
    }

    async fn update_execution_status(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
        output: Option<Value>,
        error: Option<WorkflowFailure>,
    ) -> Result<(), StoreError> {
        let mut executions = self.executions.write();
        let execution = executions
            .get_mut(execution_id)
            .ok_or_else(|| StoreError::ExecutionNotFound(execution_id.to_string()))?;

        let now = Utc::now();
        execution.status = status;
        execution.updated_at = now;

        match status {
            ExecutionStatus::Running => {
                execution.started_at = Some(now);
                execution.output = None;
                execution.error = None;
                execution.completed_at = None;
            }
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled => {
                execution.completed_at = Some(now);
                if output.is_some() {
                    execution.output = output;
                }
                if error.is_some() {
                    execution.error = error;
                }
            }
            ExecutionStatus::Pending | ExecutionStatus::Paused => {
                if output.is_some() {
                    execution.output = output;
                }
                if error.is_some() {
                    execution.error = error;
                }
            }
        }
        Ok(())
    }

    async fn list_executions(
        &self,
        workflow_name: &str,
        status: Option<ExecutionStatus>,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        let executions = self.executions.read();
        let mut matched: Vec<_> = executions
            .values()
            .filter(|e| e.workflow_name == workflow_name)
            .filter(|e| status.map_or(true, |s| e.status == s))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matched)
    }

    async fn find_interrupted(&self) -> Result<Vec<ExecutionRecord>, StoreError> {
        let executions = self.executions.read();
        let mut matched: Vec<_> = executions
            .values()
            .filter(|e| {
                matches!(
                    e.status,
                    ExecutionStatus::Running | ExecutionStatus::Paused
                )
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matched)
    }

    async fn find_step(
        &self,
        execution_id: &str,
        step_name: &str,
    ) -> Result<Option<StepRecord>, StoreError> {
        let key = (execution_id.to_string(), step_name.to_string());
        Ok(self.steps.read().get(&key).cloned())
    }

    async fn upsert_step(&self, step: &StepRecord) -> Result<(), StoreError> {
        // Mirror the SQLite foreign key: step rows require an owning execution
        if !self.executions.read().contains_key(&step.execution_id) {
            return Err(StoreError::ExecutionNotFound(step.execution_id.clone()));
        }

        let key = (step.execution_id.clone(), step.step_name.clone());
        let mut steps = self.steps.write();
        match steps.get_mut(&key) {
            Some(existing) => {
                let max_attempts = existing.max_attempts.max(step.max_attempts);
                let input = step.input.clone().or_else(|| existing.input.clone());
                let started_at = step.started_at.or(existing.started_at);
                *existing = step.clone();
                existing.max_attempts = max_attempts;
                existing.input = input;
                existing.started_at = started_at;
            }
            None => {
                steps.insert(key, step.clone());
            }
        }
        Ok(())
    }

    async fn fetch_or_create_breaker(&self, name: &str) -> Result<BreakerRecord, StoreError> {
        let mut breakers = self.breakers.write();
        let record = breakers
            .entry(name.to_string())
            .or_insert_with(|| BreakerRecord::closed(name));
        Ok(record.clone())
    }

    async fn update_breaker(&self, breaker: &BreakerRecord) -> Result<(), StoreError> {
        let mut breakers = self.breakers.write();
        breakers.insert(breaker.name.clone(), breaker.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::ErrorKind;

    fn execution(id: &str, workflow: &str) -> ExecutionRecord {
        let now = Utc::now();
        ExecutionRecord {
            id: id.to_string(),
            workflow_name: workflow.to_string(),
            status: ExecutionStatus::Pending,
            input: serde_json::json!({}),
            output: None,
            error: None,
            metadata: serde_json::json!({}),
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn step(execution_id: &str, name: &str) -> StepRecord {
        StepRecord {
            execution_id: execution_id.to_string(),
            step_name: name.to_string(),
            status: StepStatus::Running,
            input: None,
            output: None,
            error: None,
            attempt: 1,
            max_attempts: 3,
            started_at: Some(Utc::now()),
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn test_duplicate_execution_rejected() {
        let store = InMemoryWorkflowStore::new();
        store.create_execution(&execution("e1", "w")).await.unwrap();

        let result = store.create_execution(&execution("e1", "w")).await;
        assert!(matches!(result, Err(StoreError::DuplicateExecution(_))));
    }

    #[tokio::test]
    async fn test_step_requires_execution() {
        let store = InMemoryWorkflowStore::new();
        let result = store.upsert_step(&step("missing", "a")).await;
        assert!(matches!(result, Err(StoreError::ExecutionNotFound(_))));
    }

    #[tokio::test]
    async fn test_max_attempts_never_decreased() {
        let store = InMemoryWorkflowStore::new();
        store.create_execution(&execution("e1", "w")).await.unwrap();

        let mut row = step("e1", "a");
        row.max_attempts = 5;
        store.upsert_step(&row).await.unwrap();

        row.max_attempts = 3;
        store.upsert_step(&row).await.unwrap();

        let found = store.find_step("e1", "a").await.unwrap().unwrap();
        assert_eq!(found.max_attempts, 5);
    }

    #[tokio::test]
    async fn test_running_transition_clears_prior_failure() {
        let store = InMemoryWorkflowStore::new();
        store.create_execution(&execution("e1", "w")).await.unwrap();

        let failure = WorkflowFailure::new(ErrorKind::Network, "boom", 3);
        store
            .update_execution_status("e1", ExecutionStatus::Failed, None, Some(failure))
            .await
            .unwrap();

        store
            .update_execution_status("e1", ExecutionStatus::Running, None, None)
            .await
            .unwrap();

        let found = store.find_execution("e1").await.unwrap().unwrap();
        assert_eq!(found.status, ExecutionStatus::Running);
        assert!(found.error.is_none());
        assert!(found.completed_at.is_none());
        assert!(found.started_at.is_some());
    }

    #[tokio::test]
    async fn test_list_executions_filters_by_status() {
        let store = InMemoryWorkflowStore::new();
        store.create_execution(&execution("e1", "w")).await.unwrap();
        store.create_execution(&execution("e2", "w")).await.unwrap();
        store.create_execution(&execution("e3", "other")).await.unwrap();

        store
            .update_execution_status("e2", ExecutionStatus::Running, None, None)
            .await
            .unwrap();

        let all = store.list_executions("w", None).await.unwrap();
        assert_eq!(all.len(), 2);

        let running = store
            .list_executions("w", Some(ExecutionStatus::Running))
            .await
            .unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, "e2");
    }

    #[tokio::test]
    async fn test_fetch_or_create_breaker_is_idempotent() {
        let store = InMemoryWorkflowStore::new();

        let first = store.fetch_or_create_breaker("svc").await.unwrap();
        let mut updated = first.clone();
        updated.failure_count = 2;
        store.update_breaker(&updated).await.unwrap();

        let second = store.fetch_or_create_breaker("svc").await.unwrap();
        assert_eq!(second.failure_count, 2);
    }
}
