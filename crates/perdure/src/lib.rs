//! # Perdure — Durable Workflow Engine
//!
//! An embedded, SQLite-backed workflow engine for long-running business
//! processes that must survive process crashes.
//!
//! ## Features
//!
//! - **Step memoization**: every step transition is persisted; a completed
//!   step is never re-run, so resume and retry pick up exactly where the
//!   prior attempt left off
//! - **Two retry layers**: workflow-level retries with exponential backoff
//!   re-enter the whole handler; per-step budgets bound each named step
//! - **Typed error dispatch**: per-kind recovery handlers with a reserved
//!   default slot and a final catch-all
//! - **Persistent circuit breakers**: named breakers gate step admission
//!   and stay open across restarts
//! - **Durable sleep**: pauses are recorded before blocking, so an
//!   interrupted sleep is re-observed and slept again on resume
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       WorkflowEngine                         │
//! │   (start / resume / cancel, workflow retry loop, recovery)   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 WorkflowContext + StepBuilder                │
//! │  (memoized steps, error dispatch, breakers, durable sleep)   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       WorkflowStore                          │
//! │   (SQLite: definitions, executions, steps, breaker state)    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use perdure::prelude::*;
//! use serde_json::json;
//!
//! let engine = WorkflowEngine::open("workflows.db").await?;
//!
//! engine.define("order", |ctx: WorkflowContext| async move {
//!     let validated = ctx
//!         .step("validate", || async { validate_order().await })
//!         .execute()
//!         .await?;
//!
//!     let receipt = ctx
//!         .step("charge", || async { charge_card().await })
//!         .with_circuit_breaker(CircuitBreakerConfig::default().with_name("gateway"))
//!         .on_error(ErrorKind::Network, |_, _| async { Ok(json!({ "queued": true })) })
//!         .execute()
//!         .await?;
//!
//!     ctx.sleep("settle", std::time::Duration::from_secs(60)).await?;
//!
//!     Ok(json!({ "validated": validated, "receipt": receipt }))
//! }, DefineOptions::default()).await?;
//!
//! let output = engine
//!     .start("order", "order-1041", json!({ "amount": 99 }), StartOptions::default())
//!     .await?;
//! ```
//!
//! ## Semantics
//!
//! Handlers must be deterministic in their control flow given the input and
//! the outputs of previously completed steps; step bodies may do anything,
//! because their outputs are frozen after first completion. Step side
//! effects run at-least-once (a crash mid-step re-runs the attempt on
//! resume), so steps are required to be idempotent; at-most-once holds per
//! completed step.

pub mod context;
pub mod engine;
pub mod persistence;
pub mod reliability;
pub mod workflow;

/// Prelude for common imports
pub mod prelude {
    pub use crate::context::{StepBuilder, WorkflowContext};
    pub use crate::engine::{EngineConfig, EngineError, WorkflowEngine};
    pub use crate::persistence::{
        ExecutionRecord, ExecutionStatus, InMemoryWorkflowStore, SqliteWorkflowStore, StepStatus,
        StoreError, WorkflowStore,
    };
    pub use crate::reliability::{CircuitBreaker, CircuitBreakerConfig, CircuitState, RetryPolicy};
    pub use crate::workflow::{
        DefineOptions, ErrorKind, ResumeOptions, StartOptions, StepError,
    };
}

// Re-export key types at crate root
pub use context::{StepBuilder, WorkflowContext};
pub use engine::{EngineConfig, EngineError, WorkflowEngine, WorkflowRegistry};
pub use persistence::{
    BreakerRecord, DefinitionRecord, ExecutionRecord, ExecutionStatus, InMemoryWorkflowStore,
    SqliteWorkflowStore, StepRecord, StepStatus, StoreError, WorkflowStore,
};
pub use reliability::{CircuitBreaker, CircuitBreakerConfig, CircuitState, RetryPolicy};
pub use workflow::{
    handler_fn, DefineOptions, ErrorKind, ResumeOptions, StartOptions, StepError, StepFailure,
    WorkflowFailure, WorkflowHandler,
};
