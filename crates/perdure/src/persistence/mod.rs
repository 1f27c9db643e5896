//! Persistence layer
//!
//! The store is the only component that touches the database.

mod memory;
mod sqlite;
mod store;

pub use memory::InMemoryWorkflowStore;
pub use sqlite::SqliteWorkflowStore;
pub use store::{
    BreakerRecord, DefinitionRecord, ExecutionRecord, ExecutionStatus, StepRecord, StepStatus,
    StoreError, WorkflowStore,
};
