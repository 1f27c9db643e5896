//! WorkflowStore trait definition

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::reliability::CircuitState;
use crate::workflow::{StepFailure, WorkflowFailure};

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Execution not found
    #[error("execution not found: {0}")]
    ExecutionNotFound(String),

    /// Execution id already exists
    #[error("execution already exists: {0}")]
    DuplicateExecution(String),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Workflow execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Execution created but not started
    Pending,

    /// Execution is running (or was interrupted mid-flight)
    Running,

    /// Execution completed successfully
    Completed,

    /// Execution failed after exhausting workflow retries
    Failed,

    /// Execution is paused awaiting external intervention
    Paused,

    /// Execution was cancelled
    Cancelled,
}

impl ExecutionStatus {
    /// Terminal statuses are never re-entered by the engine
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Paused => write!(f, "paused"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Step execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Step row created but not yet running
    Pending,

    /// Step function is executing
    Running,

    /// Step completed; output is frozen and the row is immutable
    Completed,

    /// Step exhausted its attempt budget
    Failed,

    /// Step failed with attempts remaining; the next workflow attempt
    /// will re-run it
    Retrying,

    /// Step was skipped
    Skipped,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Retrying => write!(f, "retrying"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// Workflow definition row
///
/// Definitions exist for administrative queries and cross-process listing;
/// the in-memory handler registry is authoritative for execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DefinitionRecord {
    /// Unique workflow name
    pub name: String,

    /// Version string
    pub version: String,

    /// Human-readable description
    pub description: Option<String>,

    /// Declared input/output schema; opaque to the engine
    pub schema: Option<Value>,

    /// Whether the definition is active
    pub active: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Workflow execution row
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionRecord {
    /// Caller-supplied execution id (unique)
    pub id: String,

    /// Name of the owning workflow definition
    pub workflow_name: String,

    /// Current status
    pub status: ExecutionStatus,

    /// Input payload supplied at start
    pub input: Value,

    /// Output payload; set exactly when status is `completed`
    pub output: Option<Value>,

    /// Error payload; set on terminal failure
    pub error: Option<WorkflowFailure>,

    /// Caller-supplied metadata payload
    pub metadata: Value,

    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Step execution row, unique per `(execution_id, step_name)`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepRecord {
    /// Owning execution id
    pub execution_id: String,

    /// Step name; the memoization key within the execution
    pub step_name: String,

    /// Current status
    pub status: StepStatus,

    /// Input payload, when the handler supplied one
    pub input: Option<Value>,

    /// Output payload; set exactly when status is `completed`
    pub output: Option<Value>,

    /// Error payload; set when status is `failed` or `retrying`
    pub error: Option<StepFailure>,

    /// Attempts consumed so far (1-based once running)
    pub attempt: u32,

    /// Attempt budget; never decreased once persisted
    pub max_attempts: u32,

    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Circuit breaker state row
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BreakerRecord {
    /// Caller-chosen breaker name; shared rows throttle shared dependencies
    pub name: String,

    /// Current state
    pub state: CircuitState,

    /// Consecutive failures observed in the closed state
    pub failure_count: u32,

    /// Successes observed in the half-open state
    pub success_count: u32,

    /// When the most recent failure was recorded
    pub last_failure_at: Option<DateTime<Utc>>,

    /// When an open breaker may transition to half-open
    pub next_attempt_at: Option<DateTime<Utc>>,

    pub updated_at: DateTime<Utc>,
}

impl BreakerRecord {
    /// A fresh closed breaker
    pub fn closed(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_at: None,
            next_attempt_at: None,
            updated_at: Utc::now(),
        }
    }
}

/// Typed persistence for definitions, executions, steps, and breakers
///
/// The store is the only component that touches the database. Every write
/// for a single step or execution transition is atomic: concurrent readers
/// see either the pre-transition or post-transition row, never a partial
/// one. Implementations must be thread-safe.
#[async_trait]
pub trait WorkflowStore: Send + Sync + 'static {
    // =========================================================================
    // Definition Operations
    // =========================================================================

    /// Insert or update a workflow definition by name
    async fn upsert_definition(&self, definition: &DefinitionRecord) -> Result<(), StoreError>;

    /// List active definitions
    async fn list_definitions(&self) -> Result<Vec<DefinitionRecord>, StoreError>;

    // =========================================================================
    // Execution Operations
    // =========================================================================

    /// Create a new execution row
    ///
    /// Fails with [`StoreError::DuplicateExecution`] if the id exists.
    async fn create_execution(&self, execution: &ExecutionRecord) -> Result<(), StoreError>;

    /// Find an execution by id
    async fn find_execution(&self, execution_id: &str)
        -> Result<Option<ExecutionRecord>, StoreError>;

    /// Apply an atomic status transition to an execution
    ///
    /// Entering `running` stamps `started_at` and clears any stale
    /// output/error/completion left by a prior attempt; entering a terminal
    /// status stamps `completed_at`.
    async fn update_execution_status(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
        output: Option<Value>,
        error: Option<WorkflowFailure>,
    ) -> Result<(), StoreError>;

    /// List executions for a workflow, newest first, optionally filtered
    /// by status
    async fn list_executions(
        &self,
        workflow_name: &str,
        status: Option<ExecutionStatus>,
    ) -> Result<Vec<ExecutionRecord>, StoreError>;

    /// Find executions abandoned mid-flight (`running` or `paused`)
    async fn find_interrupted(&self) -> Result<Vec<ExecutionRecord>, StoreError>;

    // =========================================================================
    // Step Operations
    // =========================================================================

    /// Find a step row by its memoization key
    async fn find_step(
        &self,
        execution_id: &str,
        step_name: &str,
    ) -> Result<Option<StepRecord>, StoreError>;

    /// Insert or update a step row in one atomic write
    ///
    /// The persisted `max_attempts` is never decreased.
    async fn upsert_step(&self, step: &StepRecord) -> Result<(), StoreError>;

    // =========================================================================
    // Circuit Breaker Operations
    // =========================================================================

    /// Fetch the breaker row, creating it closed on first reference
    async fn fetch_or_create_breaker(&self, name: &str) -> Result<BreakerRecord, StoreError>;

    /// Persist a breaker transition
    async fn update_breaker(&self, breaker: &BreakerRecord) -> Result<(), StoreError>;

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Release any held resources (connection pools)
    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
