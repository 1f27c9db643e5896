//! Workflow-facing types: handlers, options, and the step error taxonomy

mod error;
mod handler;
mod options;

pub use error::{ErrorKind, StepError, StepFailure, WorkflowFailure};
pub use handler::{handler_fn, HandlerFuture, HandlerOutput, WorkflowHandler};
pub use options::{DefineOptions, ResumeOptions, StartOptions};
