//! Workflow engine
//!
//! The `WorkflowEngine` owns the lifecycle of workflow executions:
//! - Defining handlers and persisting their definition rows
//! - Starting, resuming, and cancelling executions
//! - The workflow-level retry loop with exponential backoff
//! - Recovering executions interrupted by a crash

use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::{json, Value};
use tracing::{debug, error, info, instrument, warn};

use super::registry::{RegisteredWorkflow, WorkflowRegistry};
use crate::context::WorkflowContext;
use crate::persistence::{
    DefinitionRecord, ExecutionRecord, ExecutionStatus, InMemoryWorkflowStore, SqliteWorkflowStore,
    StoreError, WorkflowStore,
};
use crate::reliability::RetryPolicy;
use crate::workflow::{
    handler_fn, DefineOptions, ErrorKind, HandlerOutput, ResumeOptions, StartOptions, StepError,
    WorkflowFailure,
};

/// Configuration for the workflow engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Workflow retry policy applied when start/resume options omit one
    pub default_retry: RetryPolicy,

    /// Per-step attempt budget applied when the step builder omits one
    pub default_step_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_retry: RetryPolicy::exponential(),
            default_step_attempts: 3,
        }
    }
}

impl EngineConfig {
    /// Create the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default workflow retry policy
    pub fn with_default_retry(mut self, retry: RetryPolicy) -> Self {
        self.default_retry = retry;
        self
    }

    /// Set the default per-step attempt budget
    pub fn with_default_step_attempts(mut self, attempts: u32) -> Self {
        self.default_step_attempts = attempts.max(1);
        self
    }
}

/// Errors from engine operations
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Workflow name is not registered
    #[error("workflow not defined: {0}")]
    NotDefined(String),

    /// Workflow name is already registered
    #[error("workflow already defined: {0}")]
    AlreadyDefined(String),

    /// Execution id is currently running
    #[error("execution already running: {0}")]
    AlreadyRunning(String),

    /// Execution id does not exist
    #[error("execution not found: {0}")]
    NotFound(String),

    /// Execution was cancelled and will not be restarted
    #[error("execution cancelled: {0}")]
    Cancelled(String),

    /// Store error
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The workflow exhausted its retries; the final handler error
    #[error("workflow execution failed: {0}")]
    Execution(StepError),
}

/// Durable workflow engine
///
/// Executions run concurrently; within one execution the handler's own
/// control flow is the scheduler, and every step transition is persisted
/// before the next step may begin. A crashed process leaves executions in
/// `running`; [`resume_interrupted`](Self::resume_interrupted) drives them
/// forward from the last persisted step boundary.
///
/// # Example
///
/// ```ignore
/// use perdure::prelude::*;
///
/// let engine = WorkflowEngine::open("workflows.db").await?;
///
/// engine.define("order", |ctx: WorkflowContext| async move {
///     let order = ctx
///         .step("validate", || async { validate().await })
///         .execute()
///         .await?;
///     ctx.sleep("settle", Duration::from_secs(60)).await?;
///     Ok(order)
/// }, DefineOptions::default()).await?;
///
/// let output = engine.start("order", "order-1041", input, StartOptions::default()).await?;
/// ```
pub struct WorkflowEngine {
    store: Arc<dyn WorkflowStore>,
    registry: WorkflowRegistry,
    config: EngineConfig,
    /// Cancellation flags for in-flight executions
    active: DashMap<String, Arc<AtomicBool>>,
}

impl WorkflowEngine {
    /// Open (creating if missing) a SQLite-backed engine at `path`
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let store = SqliteWorkflowStore::open(path).await?;
        Ok(Self::with_store(store))
    }

    /// Engine over an in-memory store (testing, ephemeral workflows)
    pub fn in_memory() -> Self {
        Self::with_store(InMemoryWorkflowStore::new())
    }

    /// Engine over a caller-provided store
    pub fn with_store(store: impl WorkflowStore) -> Self {
        Self {
            store: Arc::new(store),
            registry: WorkflowRegistry::new(),
            config: EngineConfig::default(),
            active: DashMap::new(),
        }
    }

    /// Replace the engine configuration
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Get a reference to the store
    pub fn store(&self) -> &Arc<dyn WorkflowStore> {
        &self.store
    }

    /// Check whether a workflow name is registered in this process
    pub fn is_defined(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    /// Release the store's resources
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        self.store.close().await?;
        info!("workflow engine shut down");
        Ok(())
    }

    /// Register a workflow handler under a unique name
    ///
    /// The in-memory registration is authoritative; the definition row is
    /// upserted best-effort, so a persistence hiccup does not unregister a
    /// perfectly usable handler.
    #[instrument(skip(self, handler, options))]
    pub async fn define<F, Fut>(
        &self,
        name: &str,
        handler: F,
        options: DefineOptions,
    ) -> Result<(), EngineError>
    where
        F: Fn(WorkflowContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerOutput> + Send + 'static,
    {
        self.registry
            .register(name, handler_fn(handler), options.clone())?;

        let now = Utc::now();
        let definition = DefinitionRecord {
            name: name.to_string(),
            version: options.version,
            description: options.description,
            schema: options.schema,
            active: true,
            created_at: now,
            updated_at: now,
        };
        if let Err(store_error) = self.store.upsert_definition(&definition).await {
            warn!(workflow = name, %store_error, "failed to persist workflow definition");
        }

        info!(workflow = name, "registered workflow");
        Ok(())
    }

    /// Start a new execution, or pick up an existing one
    ///
    /// A completed execution returns its stored output without re-invoking
    /// anything; a running one fails with [`EngineError::AlreadyRunning`];
    /// any other existing execution is resumed.
    #[instrument(skip(self, input, options), fields(workflow = name))]
    pub async fn start(
        &self,
        name: &str,
        execution_id: &str,
        input: Value,
        options: StartOptions,
    ) -> Result<Value, EngineError> {
        if let Some(existing) = self.store.find_execution(execution_id).await? {
            return match existing.status {
                ExecutionStatus::Completed => {
                    debug!(%execution_id, "execution already completed, returning stored output");
                    Ok(existing.output.unwrap_or(Value::Null))
                }
                ExecutionStatus::Running => {
                    Err(EngineError::AlreadyRunning(execution_id.to_string()))
                }
                _ => {
                    self.resume(
                        execution_id,
                        ResumeOptions {
                            retry: options.retry,
                            timeout: options.timeout,
                        },
                    )
                    .await
                }
            };
        }

        let registered = self
            .registry
            .lookup(name)
            .ok_or_else(|| EngineError::NotDefined(name.to_string()))?;

        let now = Utc::now();
        let execution = ExecutionRecord {
            id: execution_id.to_string(),
            workflow_name: name.to_string(),
            status: ExecutionStatus::Pending,
            input,
            output: None,
            error: None,
            metadata: options.metadata.unwrap_or_else(|| json!({})),
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };
        self.store.create_execution(&execution).await?;

        info!(%execution_id, workflow = name, "starting workflow execution");
        self.run_with_retry(registered, execution, options.retry, options.timeout)
            .await
    }

    /// Resume an existing execution
    ///
    /// Completed executions return their stored output; cancelled ones are
    /// never restarted. Anything else — including `running`, which after a
    /// crash means "was interrupted mid-flight" — re-enters the retry loop
    /// with the persisted input. Step memoization skips work that already
    /// completed.
    #[instrument(skip(self, options))]
    pub async fn resume(
        &self,
        execution_id: &str,
        options: ResumeOptions,
    ) -> Result<Value, EngineError> {
        let execution = self
            .store
            .find_execution(execution_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(execution_id.to_string()))?;

        match execution.status {
            ExecutionStatus::Completed => {
                debug!(%execution_id, "execution already completed, returning stored output");
                Ok(execution.output.unwrap_or(Value::Null))
            }
            ExecutionStatus::Cancelled => Err(EngineError::Cancelled(execution_id.to_string())),
            _ => {
                let registered = self
                    .registry
                    .lookup(&execution.workflow_name)
                    .ok_or_else(|| EngineError::NotDefined(execution.workflow_name.clone()))?;

                info!(%execution_id, workflow = %execution.workflow_name, "resuming workflow execution");
                self.run_with_retry(registered, execution, options.retry, options.timeout)
                    .await
            }
        }
    }

    /// Cancel a running or paused execution
    ///
    /// Marks the row cancelled and flips the cooperative cancellation flag
    /// seen by the execution's context; in-flight handler code is not
    /// interrupted forcibly. Returns false when the execution is in any
    /// other status.
    #[instrument(skip(self))]
    pub async fn cancel(&self, execution_id: &str) -> Result<bool, EngineError> {
        let execution = self
            .store
            .find_execution(execution_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(execution_id.to_string()))?;

        match execution.status {
            ExecutionStatus::Running | ExecutionStatus::Paused => {
                self.store
                    .update_execution_status(execution_id, ExecutionStatus::Cancelled, None, None)
                    .await?;
                if let Some(flag) = self.active.get(execution_id) {
                    flag.value().store(true, Ordering::Relaxed);
                }
                info!(%execution_id, "cancelled execution");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Fetch an execution record
    pub async fn get_execution(&self, execution_id: &str) -> Result<ExecutionRecord, EngineError> {
        self.store
            .find_execution(execution_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(execution_id.to_string()))
    }

    /// List executions for a workflow, newest first
    pub async fn list_executions(
        &self,
        workflow_name: &str,
        status: Option<ExecutionStatus>,
    ) -> Result<Vec<ExecutionRecord>, EngineError> {
        Ok(self.store.list_executions(workflow_name, status).await?)
    }

    /// List active workflow definitions
    pub async fn list_definitions(&self) -> Result<Vec<DefinitionRecord>, EngineError> {
        Ok(self.store.list_definitions().await?)
    }

    /// Resume every execution left in `running` or `paused`
    ///
    /// Intended to be invoked once at process start, after all `define`
    /// calls. Returns the number of interrupted executions driven;
    /// per-execution failures are recorded on their rows, not returned.
    #[instrument(skip(self))]
    pub async fn resume_interrupted(&self) -> Result<usize, EngineError> {
        let interrupted = self.store.find_interrupted().await?;
        let count = interrupted.len();
        if count == 0 {
            debug!("no interrupted executions found");
            return Ok(0);
        }

        info!(count, "resuming interrupted executions");
        for execution in interrupted {
            let execution_id = execution.id.clone();
            if let Err(engine_error) = self.resume(&execution_id, ResumeOptions::default()).await {
                warn!(%execution_id, %engine_error, "interrupted execution did not resume cleanly");

                // The retry loop records Execution failures itself, and a
                // cancellation that raced the scan must stay cancelled
                if !matches!(
                    engine_error,
                    EngineError::Execution(_) | EngineError::Cancelled(_)
                ) {
                    let failure = WorkflowFailure::new(
                        ErrorKind::user("resume"),
                        engine_error.to_string(),
                        0,
                    );
                    if let Err(store_error) = self
                        .store
                        .update_execution_status(
                            &execution_id,
                            ExecutionStatus::Failed,
                            None,
                            Some(failure),
                        )
                        .await
                    {
                        error!(%execution_id, %store_error, "failed to record resume failure");
                    }
                }
            }
        }
        Ok(count)
    }

    // =========================================================================
    // Internal Methods
    // =========================================================================

    async fn run_with_retry(
        &self,
        registered: RegisteredWorkflow,
        execution: ExecutionRecord,
        retry: Option<RetryPolicy>,
        timeout: Option<Duration>,
    ) -> Result<Value, EngineError> {
        let retry = retry.unwrap_or_else(|| self.config.default_retry.clone());
        let execution_id = execution.id.clone();

        let cancel_flag = {
            let entry = self
                .active
                .entry(execution_id.clone())
                .or_insert_with(|| Arc::new(AtomicBool::new(false)));
            entry.value().clone()
        };

        let result = self
            .drive(&registered, &execution, &retry, timeout, &cancel_flag)
            .await;
        self.active.remove(&execution_id);
        result
    }

    /// The workflow retry loop
    ///
    /// Each attempt re-invokes the whole handler with a fresh context;
    /// step memoization makes re-entry pick up where the prior attempt
    /// left off.
    async fn drive(
        &self,
        registered: &RegisteredWorkflow,
        execution: &ExecutionRecord,
        retry: &RetryPolicy,
        timeout: Option<Duration>,
        cancel_flag: &Arc<AtomicBool>,
    ) -> Result<Value, EngineError> {
        let execution_id = &execution.id;

        self.store
            .update_execution_status(execution_id, ExecutionStatus::Running, None, None)
            .await?;

        let mut last_error: Option<StepError> = None;

        for attempt in 1..=retry.max_attempts {
            let ctx = WorkflowContext::new(
                execution_id.clone(),
                execution.workflow_name.clone(),
                execution.input.clone(),
                attempt,
                execution.metadata.clone(),
                self.store.clone(),
                cancel_flag.clone(),
                self.config.default_step_attempts,
            );

            let invocation = (registered.handler)(ctx);
            let outcome = match timeout {
                Some(deadline) => match tokio::time::timeout(deadline, invocation).await {
                    Ok(result) => result,
                    Err(_) => Err(StepError::timeout(format!(
                        "workflow did not complete within {deadline:?}"
                    ))),
                },
                None => invocation.await,
            };

            if cancel_flag.load(Ordering::Relaxed) {
                info!(%execution_id, attempt, "execution cancelled mid-flight");
                return Err(EngineError::Cancelled(execution_id.clone()));
            }

            match outcome {
                Ok(output) => {
                    // A cancel from another process must win over completion
                    let current = self.store.find_execution(execution_id).await?;
                    if matches!(current.map(|e| e.status), Some(ExecutionStatus::Cancelled)) {
                        info!(%execution_id, "execution cancelled externally, discarding output");
                        return Err(EngineError::Cancelled(execution_id.clone()));
                    }

                    self.store
                        .update_execution_status(
                            execution_id,
                            ExecutionStatus::Completed,
                            Some(output.clone()),
                            None,
                        )
                        .await?;
                    info!(%execution_id, attempt, "workflow execution completed");
                    return Ok(output);
                }
                Err(step_error) => {
                    warn!(
                        %execution_id, attempt,
                        max_attempts = retry.max_attempts,
                        kind = %step_error.kind,
                        "workflow attempt failed: {}", step_error.message
                    );
                    let has_more = attempt < retry.max_attempts;
                    last_error = Some(step_error);
                    if has_more {
                        tokio::time::sleep(retry.delay_after_attempt(attempt)).await;
                    }
                }
            }
        }

        let step_error = last_error.unwrap_or_else(|| {
            StepError::user("internal", "workflow failed without recording an error")
        });
        let failure = WorkflowFailure::from_error(&step_error, retry.max_attempts);
        self.store
            .update_execution_status(
                execution_id,
                ExecutionStatus::Failed,
                None,
                Some(failure),
            )
            .await?;

        error!(%execution_id, attempts = retry.max_attempts, "workflow execution failed");
        Err(EngineError::Execution(step_error))
    }
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("registry", &self.registry)
            .field("active", &self.active.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::fixed(Duration::from_millis(5), max_attempts)
    }

    #[tokio::test]
    async fn test_start_unknown_workflow() {
        let engine = WorkflowEngine::in_memory();
        let result = engine
            .start("missing", "e1", json!({}), StartOptions::default())
            .await;
        assert!(matches!(result, Err(EngineError::NotDefined(_))));
    }

    #[tokio::test]
    async fn test_duplicate_define_rejected() {
        let engine = WorkflowEngine::in_memory();
        engine
            .define("w", |_ctx| async { Ok(json!({})) }, DefineOptions::default())
            .await
            .unwrap();

        let result = engine
            .define("w", |_ctx| async { Ok(json!({})) }, DefineOptions::default())
            .await;
        assert!(matches!(result, Err(EngineError::AlreadyDefined(_))));
    }

    #[tokio::test]
    async fn test_start_runs_to_completion() {
        let engine = WorkflowEngine::in_memory();
        engine
            .define(
                "double",
                |ctx: WorkflowContext| async move {
                    let n = ctx.input().get("n").and_then(Value::as_i64).unwrap_or(0);
                    ctx.step("double", move || async move { Ok(json!({ "n": n * 2 })) })
                        .execute()
                        .await
                },
                DefineOptions::default(),
            )
            .await
            .unwrap();

        let output = engine
            .start("double", "e1", json!({ "n": 21 }), StartOptions::default())
            .await
            .unwrap();
        assert_eq!(output, json!({ "n": 42 }));

        let execution = engine.get_execution("e1").await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.output, Some(json!({ "n": 42 })));
        assert!(execution.started_at.is_some());
        assert!(execution.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_start_is_idempotent_on_completed_execution() {
        let engine = WorkflowEngine::in_memory();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        engine
            .define(
                "once",
                move |ctx: WorkflowContext| {
                    let counter = counter.clone();
                    async move {
                        ctx.step("tick", move || async move {
                            Ok(json!({ "call": counter.fetch_add(1, Ordering::SeqCst) }))
                        })
                        .execute()
                        .await
                    }
                },
                DefineOptions::default(),
            )
            .await
            .unwrap();

        let first = engine
            .start("once", "e1", json!({}), StartOptions::default())
            .await
            .unwrap();
        let second = engine
            .start("once", "e1", json!({}), StartOptions::default())
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_record_failure() {
        let engine = WorkflowEngine::in_memory();
        engine
            .define(
                "doomed",
                |_ctx| async { Err(StepError::validation("always wrong")) },
                DefineOptions::default(),
            )
            .await
            .unwrap();

        let result = engine
            .start(
                "doomed",
                "e1",
                json!({}),
                StartOptions::new().with_retry(fast_retry(2)),
            )
            .await;

        match result {
            Err(EngineError::Execution(step_error)) => {
                assert_eq!(step_error.kind, ErrorKind::Validation);
            }
            other => panic!("expected execution failure, got {other:?}"),
        }

        let execution = engine.get_execution("e1").await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Failed);
        let failure = execution.error.unwrap();
        assert_eq!(failure.attempts, 2);
        assert_eq!(failure.kind, ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_workflow_retry_re_enters_handler() {
        let engine = WorkflowEngine::in_memory();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        engine
            .define(
                "flaky",
                move |ctx: WorkflowContext| {
                    let counter = counter.clone();
                    async move {
                        ctx.step("s", move || async move {
                            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                                Err(StepError::network("first call fails"))
                            } else {
                                Ok(json!({ "ok": true }))
                            }
                        })
                        .execute()
                        .await
                    }
                },
                DefineOptions::default(),
            )
            .await
            .unwrap();

        let output = engine
            .start(
                "flaky",
                "e1",
                json!({}),
                StartOptions::new().with_retry(fast_retry(3)),
            )
            .await
            .unwrap();

        assert_eq!(output, json!({ "ok": true }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_workflow_timeout_drives_retry_loop() {
        let engine = WorkflowEngine::in_memory();
        engine
            .define(
                "slow",
                |_ctx| async {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok(json!({}))
                },
                DefineOptions::default(),
            )
            .await
            .unwrap();

        let result = engine
            .start(
                "slow",
                "e1",
                json!({}),
                StartOptions::new()
                    .with_retry(RetryPolicy::no_retry())
                    .with_timeout(Duration::from_millis(20)),
            )
            .await;

        match result {
            Err(EngineError::Execution(step_error)) => {
                assert_eq!(step_error.kind, ErrorKind::Timeout);
            }
            other => panic!("expected timeout failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_resume_unknown_execution() {
        let engine = WorkflowEngine::in_memory();
        let result = engine.resume("missing", ResumeOptions::default()).await;
        assert!(matches!(result, Err(EngineError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_cancel_unknown_execution() {
        let engine = WorkflowEngine::in_memory();
        let result = engine.cancel("missing").await;
        assert!(matches!(result, Err(EngineError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_cancel_completed_execution_is_noop() {
        let engine = WorkflowEngine::in_memory();
        engine
            .define("w", |_ctx| async { Ok(json!({})) }, DefineOptions::default())
            .await
            .unwrap();
        engine
            .start("w", "e1", json!({}), StartOptions::default())
            .await
            .unwrap();

        assert!(!engine.cancel("e1").await.unwrap());

        let execution = engine.get_execution("e1").await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn test_resume_interrupted_drives_abandoned_executions() {
        let engine = WorkflowEngine::in_memory();
        engine
            .define(
                "recoverable",
                |ctx: WorkflowContext| async move {
                    ctx.step("work", || async { Ok(json!({ "done": true })) })
                        .execute()
                        .await
                },
                DefineOptions::default(),
            )
            .await
            .unwrap();

        // Simulate an execution abandoned by a crashed process
        let now = Utc::now();
        engine
            .store()
            .create_execution(&ExecutionRecord {
                id: "e1".to_string(),
                workflow_name: "recoverable".to_string(),
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

        let count = engine.resume_interrupted().await.unwrap();
        assert_eq!(count, 1);

        let execution = engine.get_execution("e1").await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.output, Some(json!({ "done": true })));
    }

    #[tokio::test]
    async fn test_resume_interrupted_skips_terminal_executions() {
        let engine = WorkflowEngine::in_memory();
        engine
            .define("w", |_ctx| async { Ok(json!({})) }, DefineOptions::default())
            .await
            .unwrap();
        engine
            .start("w", "e1", json!({}), StartOptions::default())
            .await
            .unwrap();

        assert_eq!(engine.resume_interrupted().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_definitions_listed_after_define() {
        let engine = WorkflowEngine::in_memory();
        engine
            .define(
                "orders",
                |_ctx| async { Ok(json!({})) },
                DefineOptions::new()
                    .with_version("2.1.0")
                    .with_description("order processing"),
            )
            .await
            .unwrap();

        let definitions = engine.list_definitions().await.unwrap();
        assert_eq!(definitions.len(), 1);
        assert_eq!(definitions[0].name, "orders");
        assert_eq!(definitions[0].version, "2.1.0");
        assert!(definitions[0].active);
    }

    #[tokio::test]
    async fn test_list_executions_by_status() {
        let engine = WorkflowEngine::in_memory();
        engine
            .define("w", |_ctx| async { Ok(json!({})) }, DefineOptions::default())
            .await
            .unwrap();
        engine
            .define(
                "failing",
                |_ctx| async { Err(StepError::network("down")) },
                DefineOptions::default(),
            )
            .await
            .unwrap();

        engine
            .start("w", "good", json!({}), StartOptions::default())
            .await
            .unwrap();
        let _ = engine
            .start(
                "failing",
                "bad",
                json!({}),
                StartOptions::new().with_retry(fast_retry(1)),
            )
            .await;

        let completed = engine
            .list_executions("w", Some(ExecutionStatus::Completed))
            .await
            .unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].id, "good");

        let failed = engine
            .list_executions("failing", Some(ExecutionStatus::Failed))
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, "bad");
    }
}
