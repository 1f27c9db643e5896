//! SQLite implementation of WorkflowStore
//!
//! Embedded persistence using SQLite with:
//! - WAL journal mode and foreign keys ON
//! - Single-statement atomic step and execution transitions
//! - Prepared-statement reuse via the per-connection statement cache

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::Row;
use tracing::{debug, error, instrument};

use super::store::*;
use crate::reliability::CircuitState;
use crate::workflow::WorkflowFailure;

/// Schema bootstrap, executed on open
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS workflow_definitions (
    name        TEXT PRIMARY KEY,
    version     TEXT NOT NULL,
    description TEXT,
    schema      TEXT,
    active      INTEGER NOT NULL DEFAULT 1,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS workflow_executions (
    id            TEXT PRIMARY KEY,
    workflow_name TEXT NOT NULL,
    status        TEXT NOT NULL,
    input         TEXT NOT NULL,
    output        TEXT,
    error         TEXT,
    metadata      TEXT NOT NULL,
    started_at    TEXT,
    completed_at  TEXT,
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS step_executions (
    execution_id TEXT NOT NULL REFERENCES workflow_executions(id) ON DELETE CASCADE,
    step_name    TEXT NOT NULL,
    status       TEXT NOT NULL,
    input        TEXT,
    output       TEXT,
    error        TEXT,
    attempt      INTEGER NOT NULL DEFAULT 0,
    max_attempts INTEGER NOT NULL DEFAULT 3,
    started_at   TEXT,
    completed_at TEXT,
    PRIMARY KEY (execution_id, step_name)
);

CREATE TABLE IF NOT EXISTS circuit_breaker_state (
    name            TEXT PRIMARY KEY,
    state           TEXT NOT NULL,
    failure_count   INTEGER NOT NULL DEFAULT 0,
    success_count   INTEGER NOT NULL DEFAULT 0,
    last_failure_at TEXT,
    next_attempt_at TEXT,
    updated_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_executions_workflow_status_created
    ON workflow_executions(workflow_name, status, created_at DESC);
"#;

/// SQLite implementation of WorkflowStore
///
/// Uses a small connection pool; WAL mode keeps readers unblocked while a
/// writer commits a transition.
///
/// # Example
///
/// ```ignore
/// use perdure::SqliteWorkflowStore;
///
/// let store = SqliteWorkflowStore::open("workflows.db").await?;
/// ```
#[derive(Clone)]
pub struct SqliteWorkflowStore {
    pool: SqlitePool,
}

impl SqliteWorkflowStore {
    /// Open (creating if missing) the database at `path` and bootstrap
    /// the schema
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5))
            .statement_cache_capacity(256);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("failed to initialize schema: {}", e);
                StoreError::Database(e.to_string())
            })?;
        debug!("schema initialized");
        Ok(())
    }
}

#[async_trait]
impl WorkflowStore for SqliteWorkflowStore {
    #[instrument(skip(self, definition), fields(workflow = %definition.name))]
    async fn upsert_definition(&self, definition: &DefinitionRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO workflow_definitions (name, version, description, schema, active, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(name) DO UPDATE SET
                version = excluded.version,
                description = excluded.description,
                schema = excluded.schema,
                active = excluded.active,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&definition.name)
        .bind(&definition.version)
        .bind(&definition.description)
        .bind(opt_to_json(&definition.schema)?)
        .bind(definition.active)
        .bind(definition.created_at)
        .bind(definition.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("failed to upsert definition: {}", e);
            StoreError::Database(e.to_string())
        })?;

        debug!("upserted definition");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_definitions(&self) -> Result<Vec<DefinitionRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT name, version, description, schema, active, created_at, updated_at
            FROM workflow_definitions
            WHERE active = 1
            ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        rows.iter().map(definition_from_row).collect()
    }

    #[instrument(skip(self, execution), fields(execution_id = %execution.id))]
    async fn create_execution(&self, execution: &ExecutionRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO workflow_executions
                (id, workflow_name, status, input, output, error, metadata,
                 started_at, completed_at, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(&execution.id)
        .bind(&execution.workflow_name)
        .bind(execution.status.to_string())
        .bind(to_json(&execution.input)?)
        .bind(opt_to_json(&execution.output)?)
        .bind(opt_to_json(&execution.error)?)
        .bind(to_json(&execution.metadata)?)
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .bind(execution.created_at)
        .bind(execution.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::DuplicateExecution(execution.id.clone())
            }
            _ => {
                error!("failed to create execution: {}", e);
                StoreError::Database(e.to_string())
            }
        })?;

        debug!("created execution");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_execution(
        &self,
        execution_id: &str,
    ) -> Result<Option<ExecutionRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, workflow_name, status, input, output, error, metadata,
                   started_at, completed_at, created_at, updated_at
            FROM workflow_executions
            WHERE id = ?1
            "#,
        )
        .bind(execution_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        row.as_ref().map(execution_from_row).transpose()
    }

    #[instrument(skip(self, output, error))]
    async fn update_execution_status(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
        output: Option<Value>,
        error: Option<WorkflowFailure>,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        let status_str = status.to_string();

        let query = match status {
            // A (re)started execution must not carry a stale outcome
            ExecutionStatus::Running => sqlx::query(
                r#"
                UPDATE workflow_executions
                SET status = ?2,
                    started_at = ?3,
                    output = NULL,
                    error = NULL,
                    completed_at = NULL,
                    updated_at = ?3
                WHERE id = ?1
                "#,
            )
            .bind(execution_id)
            .bind(&status_str)
            .bind(now),

            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled => {
                sqlx::query(
                    r#"
                    UPDATE workflow_executions
                    SET status = ?2,
                        output = COALESCE(?3, output),
                        error = COALESCE(?4, error),
                        completed_at = ?5,
                        updated_at = ?5
                    WHERE id = ?1
                    "#,
                )
                .bind(execution_id)
                .bind(&status_str)
                .bind(opt_to_json(&output)?)
                .bind(opt_to_json(&error)?)
                .bind(now)
            }

            ExecutionStatus::Pending | ExecutionStatus::Paused => sqlx::query(
                r#"
                UPDATE workflow_executions
                SET status = ?2,
                    output = COALESCE(?3, output),
                    error = COALESCE(?4, error),
                    updated_at = ?5
                WHERE id = ?1
                "#,
            )
            .bind(execution_id)
            .bind(&status_str)
            .bind(opt_to_json(&output)?)
            .bind(opt_to_json(&error)?)
            .bind(now),
        };

        query.execute(&self.pool).await.map_err(|e| {
            error!("failed to update execution status: {}", e);
            StoreError::Database(e.to_string())
        })?;

        debug!(%status_str, "updated execution status");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_executions(
        &self,
        workflow_name: &str,
        status: Option<ExecutionStatus>,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, workflow_name, status, input, output, error, metadata,
                   started_at, completed_at, created_at, updated_at
            FROM workflow_executions
            WHERE workflow_name = ?1
              AND (?2 IS NULL OR status = ?2)
            ORDER BY created_at DESC
            "#,
        )
        .bind(workflow_name)
        .bind(status.map(|s| s.to_string()))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        rows.iter().map(execution_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn find_interrupted(&self) -> Result<Vec<ExecutionRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, workflow_name, status, input, output, error, metadata,
                   started_at, completed_at, created_at, updated_at
            FROM workflow_executions
            WHERE status IN ('running', 'paused')
            ORDER BY created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        rows.iter().map(execution_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn find_step(
        &self,
        execution_id: &str,
        step_name: &str,
    ) -> Result<Option<StepRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT execution_id, step_name, status, input, output, error,
                   attempt, max_attempts, started_at, completed_at
            FROM step_executions
            WHERE execution_id = ?1 AND step_name = ?2
            "#,
        )
        .bind(execution_id)
        .bind(step_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        row.as_ref().map(step_from_row).transpose()
    }

    #[instrument(skip(self, step), fields(execution_id = %step.execution_id, step = %step.step_name))]
    async fn upsert_step(&self, step: &StepRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO step_executions
                (execution_id, step_name, status, input, output, error,
                 attempt, max_attempts, started_at, completed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(execution_id, step_name) DO UPDATE SET
                status = excluded.status,
                input = COALESCE(excluded.input, input),
                output = excluded.output,
                error = excluded.error,
                attempt = excluded.attempt,
                max_attempts = MAX(max_attempts, excluded.max_attempts),
                started_at = COALESCE(excluded.started_at, started_at),
                completed_at = excluded.completed_at
            "#,
        )
        .bind(&step.execution_id)
        .bind(&step.step_name)
        .bind(step.status.to_string())
        .bind(opt_to_json(&step.input)?)
        .bind(opt_to_json(&step.output)?)
        .bind(opt_to_json(&step.error)?)
        .bind(step.attempt)
        .bind(step.max_attempts)
        .bind(step.started_at)
        .bind(step.completed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                StoreError::ExecutionNotFound(step.execution_id.clone())
            }
            _ => {
                error!("failed to upsert step: {}", e);
                StoreError::Database(e.to_string())
            }
        })?;

        debug!(status = %step.status, attempt = step.attempt, "persisted step transition");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn fetch_or_create_breaker(&self, name: &str) -> Result<BreakerRecord, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO circuit_breaker_state (name, state, failure_count, success_count, updated_at)
            VALUES (?1, 'closed', 0, 0, ?2)
            ON CONFLICT(name) DO NOTHING
            "#,
        )
        .bind(name)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        let row = sqlx::query(
            r#"
            SELECT name, state, failure_count, success_count,
                   last_failure_at, next_attempt_at, updated_at
            FROM circuit_breaker_state
            WHERE name = ?1
            "#,
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        breaker_from_row(&row)
    }

    #[instrument(skip(self, breaker), fields(breaker = %breaker.name))]
    async fn update_breaker(&self, breaker: &BreakerRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE circuit_breaker_state
            SET state = ?2,
                failure_count = ?3,
                success_count = ?4,
                last_failure_at = ?5,
                next_attempt_at = ?6,
                updated_at = ?7
            WHERE name = ?1
            "#,
        )
        .bind(&breaker.name)
        .bind(breaker.state.to_string())
        .bind(breaker.failure_count)
        .bind(breaker.success_count)
        .bind(breaker.last_failure_at)
        .bind(breaker.next_attempt_at)
        .bind(breaker.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("failed to update circuit breaker: {}", e);
            StoreError::Database(e.to_string())
        })?;

        debug!(state = %breaker.state, "persisted breaker transition");
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.pool.close().await;
        Ok(())
    }
}

// =============================================================================
// Row mapping and JSON codec
// =============================================================================

fn to_json<T: Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn opt_to_json<T: Serialize>(value: &Option<T>) -> Result<Option<String>, StoreError> {
    value.as_ref().map(to_json).transpose()
}

fn from_json<T: DeserializeOwned>(raw: &str) -> Result<T, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn opt_from_json<T: DeserializeOwned>(raw: Option<String>) -> Result<Option<T>, StoreError> {
    raw.as_deref().map(from_json).transpose()
}

fn parse_execution_status(raw: &str) -> Result<ExecutionStatus, StoreError> {
    match raw {
        "pending" => Ok(ExecutionStatus::Pending),
        "running" => Ok(ExecutionStatus::Running),
        "completed" => Ok(ExecutionStatus::Completed),
        "failed" => Ok(ExecutionStatus::Failed),
        "paused" => Ok(ExecutionStatus::Paused),
        "cancelled" => Ok(ExecutionStatus::Cancelled),
        other => Err(StoreError::Serialization(format!(
            "unknown execution status: {other}"
        ))),
    }
}

fn parse_step_status(raw: &str) -> Result<StepStatus, StoreError> {
    match raw {
        "pending" => Ok(StepStatus::Pending),
        "running" => Ok(StepStatus::Running),
        "completed" => Ok(StepStatus::Completed),
        "failed" => Ok(StepStatus::Failed),
        "retrying" => Ok(StepStatus::Retrying),
        "skipped" => Ok(StepStatus::Skipped),
        other => Err(StoreError::Serialization(format!(
            "unknown step status: {other}"
        ))),
    }
}

fn parse_circuit_state(raw: &str) -> Result<CircuitState, StoreError> {
    match raw {
        "closed" => Ok(CircuitState::Closed),
        "open" => Ok(CircuitState::Open),
        "half_open" => Ok(CircuitState::HalfOpen),
        other => Err(StoreError::Serialization(format!(
            "unknown circuit state: {other}"
        ))),
    }
}

fn definition_from_row(row: &SqliteRow) -> Result<DefinitionRecord, StoreError> {
    Ok(DefinitionRecord {
        name: row.get("name"),
        version: row.get("version"),
        description: row.get("description"),
        schema: opt_from_json(row.get::<Option<String>, _>("schema"))?,
        active: row.get("active"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn execution_from_row(row: &SqliteRow) -> Result<ExecutionRecord, StoreError> {
    let status: String = row.get("status");
    Ok(ExecutionRecord {
        id: row.get("id"),
        workflow_name: row.get("workflow_name"),
        status: parse_execution_status(&status)?,
        input: from_json(row.get::<String, _>("input").as_str())?,
        output: opt_from_json(row.get::<Option<String>, _>("output"))?,
        error: opt_from_json(row.get::<Option<String>, _>("error"))?,
        metadata: from_json(row.get::<String, _>("metadata").as_str())?,
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn step_from_row(row: &SqliteRow) -> Result<StepRecord, StoreError> {
    let status: String = row.get("status");
    Ok(StepRecord {
        execution_id: row.get("execution_id"),
        step_name: row.get("step_name"),
        status: parse_step_status(&status)?,
        input: opt_from_json(row.get::<Option<String>, _>("input"))?,
        output: opt_from_json(row.get::<Option<String>, _>("output"))?,
        error: opt_from_json(row.get::<Option<String>, _>("error"))?,
        attempt: row.get("attempt"),
        max_attempts: row.get("max_attempts"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
    })
}

fn breaker_from_row(row: &SqliteRow) -> Result<BreakerRecord, StoreError> {
    let state: String = row.get("state");
    Ok(BreakerRecord {
        name: row.get("name"),
        state: parse_circuit_state(&state)?,
        failure_count: row.get("failure_count"),
        success_count: row.get("success_count"),
        last_failure_at: row.get("last_failure_at"),
        next_attempt_at: row.get("next_attempt_at"),
        updated_at: row.get("updated_at"),
    })
}
