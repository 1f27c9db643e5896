//! Type-erased workflow handler
//!
//! Handlers are stored in the registry behind a boxed-future signature so
//! the engine can invoke them without knowing the concrete closure type.

use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;

use crate::context::WorkflowContext;
use crate::workflow::StepError;

/// Result of a single handler invocation
pub type HandlerOutput = Result<Value, StepError>;

/// Boxed future returned by a type-erased handler
pub type HandlerFuture = BoxFuture<'static, HandlerOutput>;

/// Type-erased workflow handler
///
/// A handler receives a fresh [`WorkflowContext`] per workflow attempt and
/// expresses the workflow as calls to `ctx.step(...)` and `ctx.sleep(...)`.
/// The same handler may be invoked many times for one execution (workflow
/// retries, resume after a crash); step memoization makes re-entry cheap.
pub type WorkflowHandler = Arc<dyn Fn(WorkflowContext) -> HandlerFuture + Send + Sync>;

/// Wrap an async closure into a [`WorkflowHandler`]
///
/// # Example
///
/// ```ignore
/// let handler = handler_fn(|ctx: WorkflowContext| async move {
///     let order = ctx
///         .step("validate", || async { Ok(json!({ "ok": true })) })
///         .execute()
///         .await?;
///     Ok(order)
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> WorkflowHandler
where
    F: Fn(WorkflowContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerOutput> + Send + 'static,
{
    Arc::new(move |ctx| f(ctx).boxed())
}
