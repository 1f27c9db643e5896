//! Step builder and execution
//!
//! A step is the smallest unit of at-most-once execution. The builder
//! accumulates optional configuration (error handlers, circuit breaker,
//! attempt budget) and `execute` runs the transition protocol: memoization
//! check, attempt accounting, circuit admission, the running transition,
//! the step function itself, and the recovery/retry bookkeeping.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use tracing::{debug, warn};

use super::WorkflowContext;
use crate::persistence::{StepRecord, StepStatus, StoreError, WorkflowStore};
use crate::reliability::{CircuitBreaker, CircuitBreakerConfig};
use crate::workflow::{ErrorKind, StepError, StepFailure};

type RecoveryFuture = BoxFuture<'static, Result<Value, StepError>>;
type RecoveryHandler = Box<dyn FnOnce(StepError, WorkflowContext) -> RecoveryFuture + Send>;
type OpenHandler = Box<dyn FnOnce(WorkflowContext) -> BoxFuture<'static, ()> + Send>;

/// Builder for a named step
///
/// Configuration may be accumulated in any order; [`execute`](Self::execute)
/// consumes the builder, so a second execute of the same builder is
/// rejected by the compiler.
///
/// # Example
///
/// ```ignore
/// let receipt = ctx
///     .step("charge", || async { gateway.charge(&order).await })
///     .with_circuit_breaker(CircuitBreakerConfig::default().with_name("gateway"))
///     .on_error(ErrorKind::Network, |_, _| async { Ok(json!({ "queued": true })) })
///     .catch(|err, _| async move { Err(err.non_retryable()) })
///     .execute()
///     .await?;
/// ```
pub struct StepBuilder<F> {
    ctx: WorkflowContext,
    name: String,
    f: F,
    input: Option<Value>,
    max_attempts: u32,
    handlers: HashMap<ErrorKind, RecoveryHandler>,
    default_handler: Option<RecoveryHandler>,
    catch_all: Option<RecoveryHandler>,
    breaker: Option<CircuitBreakerConfig>,
    on_open: Option<OpenHandler>,
}

impl<F, Fut> StepBuilder<F>
where
    F: FnOnce() -> Fut + Send,
    Fut: Future<Output = Result<Value, StepError>> + Send,
{
    pub(crate) fn new(ctx: WorkflowContext, name: String, f: F) -> Self {
        let max_attempts = ctx.default_step_attempts();
        Self {
            ctx,
            name,
            f,
            input: None,
            max_attempts,
            handlers: HashMap::new(),
            default_handler: None,
            catch_all: None,
            breaker: None,
            on_open: None,
        }
    }

    /// Register a recovery handler for one error kind
    ///
    /// A handler that returns a value consumes the error and completes the
    /// step with that value; a handler that returns an error replaces the
    /// current one. Later registrations for the same kind override earlier
    /// ones. Handlers may run nested `ctx.step(...)` compensation steps.
    pub fn on_error<H, HFut>(mut self, kind: ErrorKind, handler: H) -> Self
    where
        H: FnOnce(StepError, WorkflowContext) -> HFut + Send + 'static,
        HFut: Future<Output = Result<Value, StepError>> + Send + 'static,
    {
        self.handlers
            .insert(kind, Box::new(move |error, ctx| handler(error, ctx).boxed()));
        self
    }

    /// Register the reserved default handler, consulted for any kind
    /// without its own handler
    pub fn on_error_default<H, HFut>(mut self, handler: H) -> Self
    where
        H: FnOnce(StepError, WorkflowContext) -> HFut + Send + 'static,
        HFut: Future<Output = Result<Value, StepError>> + Send + 'static,
    {
        self.default_handler = Some(Box::new(move |error, ctx| handler(error, ctx).boxed()));
        self
    }

    /// Register the final catch-all, consulted only if no `on_error`
    /// handler consumed the error
    pub fn catch<H, HFut>(mut self, handler: H) -> Self
    where
        H: FnOnce(StepError, WorkflowContext) -> HFut + Send + 'static,
        HFut: Future<Output = Result<Value, StepError>> + Send + 'static,
    {
        self.catch_all = Some(Box::new(move |error, ctx| handler(error, ctx).boxed()));
        self
    }

    /// Attach a circuit breaker to this step
    ///
    /// The breaker name defaults to the workflow-scoped `{workflow}-{step}`
    /// so every execution of the workflow shares one breaker; set
    /// [`CircuitBreakerConfig::with_name`] to share it wider (or narrower).
    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker = Some(config);
        self
    }

    /// Callback invoked when circuit admission is denied
    pub fn on_circuit_open<H, HFut>(mut self, handler: H) -> Self
    where
        H: FnOnce(WorkflowContext) -> HFut + Send + 'static,
        HFut: Future<Output = ()> + Send + 'static,
    {
        self.on_open = Some(Box::new(move |ctx| handler(ctx).boxed()));
        self
    }

    /// Set the per-step attempt budget (default 3)
    ///
    /// A budget already persisted on the step row is never decreased.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Record an input payload on the step row
    pub fn with_input(mut self, input: Value) -> Self {
        self.input = Some(input);
        self
    }

    /// Run the step
    ///
    /// Returns the step output — memoized from the store when the step
    /// already completed in a prior attempt, fresh otherwise.
    pub async fn execute(self) -> Result<Value, StepError> {
        let StepBuilder {
            ctx,
            name,
            f,
            input,
            max_attempts: configured_budget,
            mut handlers,
            default_handler,
            catch_all,
            breaker: breaker_config,
            on_open,
        } = self;

        if ctx.is_cancelled() {
            return Err(StepError::cancelled(ctx.execution_id()));
        }

        let store = ctx.store().clone();
        let execution_id = ctx.execution_id().to_string();

        // 1. Memoization: a completed step is never re-run
        let existing = store.find_step(&execution_id, &name).await?;
        if let Some(row) = &existing {
            if row.status == StepStatus::Completed {
                debug!(step = %name, %execution_id, "returning memoized output");
                return Ok(row.output.clone().unwrap_or(Value::Null));
            }
        }

        // 2. Attempt accounting
        let (attempt, max_attempts) = match &existing {
            Some(row) => {
                let budget = row.max_attempts.max(configured_budget);
                if row.status == StepStatus::Failed && row.attempt >= budget {
                    // Terminal failure: re-throw the stored error rather
                    // than consume attempts beyond the budget
                    warn!(step = %name, %execution_id, "step already failed terminally");
                    let error = row
                        .error
                        .as_ref()
                        .map(StepFailure::to_error)
                        .unwrap_or_else(|| {
                            StepError::user("unknown", format!("step {name} previously failed"))
                        });
                    return Err(error);
                }
                (row.attempt + 1, budget)
            }
            None => (1, configured_budget),
        };

        // 3. Circuit admission, ahead of the running transition
        let breaker = breaker_config.map(|config| {
            let breaker_name = config
                .name
                .clone()
                .unwrap_or_else(|| format!("{}-{}", ctx.workflow_name(), name));
            CircuitBreaker::new(breaker_name, config, store.clone())
        });
        if let Some(b) = &breaker {
            if !b.allow().await? {
                warn!(step = %name, %execution_id, breaker = %b.name(), "step denied by open circuit");
                if let Some(on_open) = on_open {
                    on_open(ctx.clone()).await;
                }
                return Err(StepError::circuit_open(b.name()));
            }
        }

        // 4. Persist the running transition before invoking the function
        let row = StepRecord {
            execution_id: execution_id.clone(),
            step_name: name.clone(),
            status: StepStatus::Running,
            input,
            output: None,
            error: None,
            attempt,
            max_attempts,
            started_at: Some(Utc::now()),
            completed_at: None,
        };
        store.upsert_step(&row).await?;

        // 5. Invoke the step function
        debug!(step = %name, %execution_id, attempt, max_attempts, "executing step");
        match f().await {
            Ok(output) => {
                if let Some(b) = &breaker {
                    b.record_success().await?;
                }
                persist_completed(&store, row, output).await
            }
            Err(error) => {
                if let Some(b) = &breaker {
                    b.record_failure().await?;
                }
                warn!(
                    step = %name, %execution_id, attempt, kind = %error.kind,
                    "step failed: {}", error.message
                );

                // 6. Dispatch chain: kind handler, then default, then
                // catch-all. A handler that returns consumes the error;
                // one that throws replaces it and the chain moves on.
                let mut current = error;
                let kind_handler = handlers.remove(&current.kind);
                for handler in [kind_handler, default_handler, catch_all]
                    .into_iter()
                    .flatten()
                {
                    match handler(current.clone(), ctx.clone()).await {
                        Ok(recovered) => {
                            debug!(step = %name, %execution_id, "error consumed by recovery handler");
                            return persist_completed(&store, row, recovered).await;
                        }
                        Err(next) => current = next,
                    }
                }

                Err(persist_failure(&store, row, current).await)
            }
        }
    }
}

/// Persist the completed transition; a codec rejection downgrades the
/// step to the failure path with an `unserializable` error
async fn persist_completed(
    store: &Arc<dyn WorkflowStore>,
    mut row: StepRecord,
    output: Value,
) -> Result<Value, StepError> {
    row.status = StepStatus::Completed;
    row.output = Some(output.clone());
    row.error = None;
    row.completed_at = Some(Utc::now());

    match store.upsert_step(&row).await {
        Ok(()) => Ok(output),
        Err(StoreError::Serialization(message)) => {
            row.output = None;
            Err(persist_failure(store, row, StepError::unserializable(message)).await)
        }
        Err(other) => Err(other.into()),
    }
}

/// Persist the retrying/failed transition by attempt budget and return
/// the error to re-throw
async fn persist_failure(
    store: &Arc<dyn WorkflowStore>,
    mut row: StepRecord,
    error: StepError,
) -> StepError {
    let max_reached = row.attempt >= row.max_attempts;
    row.status = if max_reached {
        StepStatus::Failed
    } else {
        StepStatus::Retrying
    };
    row.error = Some(StepFailure::from_error(&error, row.attempt, max_reached));
    row.output = None;
    row.completed_at = max_reached.then(Utc::now);

    if let Err(store_error) = store.upsert_step(&row).await {
        return store_error.into();
    }
    error
}
