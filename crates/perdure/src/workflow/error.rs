//! Step error taxonomy
//!
//! Errors raised by step functions carry an identifying kind used by the
//! step builder's `on_error` dispatch table, plus two advisory flags:
//! `recoverable` (whether recovery handlers are meaningful) and `retryable`
//! (whether the retry loops should bother re-attempting).

use serde::{Deserialize, Serialize};

/// Identifying kind of a step error
///
/// The dispatch table in the step builder is keyed by kind. The closed set
/// below covers the failures the engine and the built-in recovery paths
/// know about; domain-specific errors register under [`ErrorKind::user`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ErrorKind {
    /// Input or state failed validation
    Validation,

    /// A network call failed
    Network,

    /// An operation exceeded its deadline
    Timeout,

    /// A quota, rate limit, or pool was exhausted
    ResourceExhausted,

    /// A downstream service returned an error
    ExternalService,

    /// The backing database failed
    Database,

    /// Step admission was denied by an open circuit breaker
    CircuitOpen,

    /// The step output could not be serialized by the store codec
    Unserializable,

    /// The execution was cancelled cooperatively
    Cancelled,

    /// Caller-defined kind (open escape hatch for domain errors)
    User(String),
}

impl ErrorKind {
    /// Create a caller-defined kind
    pub fn user(name: impl Into<String>) -> Self {
        Self::User(name.into())
    }

    /// Stable string form, used for serialization and dispatch
    pub fn as_str(&self) -> &str {
        match self {
            Self::Validation => "validation",
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::ResourceExhausted => "resource_exhausted",
            Self::ExternalService => "external_service",
            Self::Database => "database",
            Self::CircuitOpen => "circuit_open",
            Self::Unserializable => "unserializable",
            Self::Cancelled => "cancelled",
            Self::User(name) => name,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for ErrorKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "validation" => Self::Validation,
            "network" => Self::Network,
            "timeout" => Self::Timeout,
            "resource_exhausted" => Self::ResourceExhausted,
            "external_service" => Self::ExternalService,
            "database" => Self::Database,
            "circuit_open" => Self::CircuitOpen,
            "unserializable" => Self::Unserializable,
            "cancelled" => Self::Cancelled,
            _ => Self::User(value),
        }
    }
}

impl From<ErrorKind> for String {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::User(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

/// Error raised by a step function or the step machinery around it
///
/// Step errors are serializable so they can be persisted on step and
/// execution rows and reconstructed on resume.
///
/// # Example
///
/// ```
/// use perdure::StepError;
///
/// let error = StepError::network("connection refused")
///     .with_details(serde_json::json!({ "host": "payments.internal" }));
///
/// assert!(error.retryable);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepError {
    /// Identifying kind for `on_error` dispatch
    pub kind: ErrorKind,

    /// Error message
    pub message: String,

    /// Whether recovery handlers are meaningful for this error
    pub recoverable: bool,

    /// Whether the retry loops should re-attempt after this error
    pub retryable: bool,

    /// Additional error details (for debugging)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl StepError {
    /// Create an error with explicit kind; recoverable and retryable by default
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            recoverable: true,
            retryable: true,
            details: None,
        }
    }

    /// Validation failure; not worth retrying with the same input
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message).non_retryable()
    }

    /// Network failure; transient by default
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    /// Deadline exceeded
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// Quota or pool exhaustion
    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ResourceExhausted, message)
    }

    /// Downstream service failure
    pub fn external_service(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ExternalService, message)
    }

    /// Backing database failure
    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Database, message)
    }

    /// Admission denied by the named open circuit breaker
    pub fn circuit_open(breaker: &str) -> Self {
        Self::new(
            ErrorKind::CircuitOpen,
            format!("circuit breaker open: {breaker}"),
        )
    }

    /// Step output rejected by the store codec
    pub fn unserializable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unserializable, message)
            .non_recoverable()
            .non_retryable()
    }

    /// Execution cancelled cooperatively
    pub fn cancelled(execution_id: &str) -> Self {
        Self::new(
            ErrorKind::Cancelled,
            format!("execution cancelled: {execution_id}"),
        )
        .non_recoverable()
        .non_retryable()
    }

    /// Caller-defined kind
    pub fn user(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::user(kind), message)
    }

    /// Mark the error non-retryable
    pub fn non_retryable(mut self) -> Self {
        self.retryable = false;
        self
    }

    /// Mark the error non-recoverable
    pub fn non_recoverable(mut self) -> Self {
        self.recoverable = false;
        self
    }

    /// Add error details
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl std::fmt::Display for StepError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for StepError {}

impl From<anyhow::Error> for StepError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(ErrorKind::user("internal"), err.to_string())
    }
}

impl From<crate::persistence::StoreError> for StepError {
    fn from(err: crate::persistence::StoreError) -> Self {
        use crate::persistence::StoreError;
        match err {
            StoreError::Serialization(message) => Self::unserializable(message),
            other => Self::database(other.to_string()),
        }
    }
}

/// Error payload persisted on a step row in `retrying` or `failed` status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepFailure {
    /// Identifying kind of the underlying error
    pub kind: ErrorKind,

    /// Error message
    pub message: String,

    /// Advisory recovery flag carried from the error
    pub recoverable: bool,

    /// Advisory retry flag carried from the error
    pub retryable: bool,

    /// Attempt number (1-based) that produced this failure
    pub attempt: u32,

    /// Whether the step exhausted its attempt budget
    pub max_attempts_reached: bool,

    /// Additional error details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl StepFailure {
    /// Snapshot an error for persistence
    pub fn from_error(error: &StepError, attempt: u32, max_attempts_reached: bool) -> Self {
        Self {
            kind: error.kind.clone(),
            message: error.message.clone(),
            recoverable: error.recoverable,
            retryable: error.retryable,
            attempt,
            max_attempts_reached,
            details: error.details.clone(),
        }
    }

    /// Reconstruct the error for re-throw on resume
    pub fn to_error(&self) -> StepError {
        StepError {
            kind: self.kind.clone(),
            message: self.message.clone(),
            recoverable: self.recoverable,
            retryable: self.retryable,
            details: self.details.clone(),
        }
    }
}

/// Error payload persisted on an execution row when the workflow fails
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowFailure {
    /// Identifying kind of the final error
    pub kind: ErrorKind,

    /// Error message
    pub message: String,

    /// Workflow attempts consumed before failing
    pub attempts: u32,

    /// Additional error details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl WorkflowFailure {
    /// Create a failure payload
    pub fn new(kind: ErrorKind, message: impl Into<String>, attempts: u32) -> Self {
        Self {
            kind,
            message: message.into(),
            attempts,
            details: None,
        }
    }

    /// Snapshot the final handler error for persistence
    pub fn from_error(error: &StepError, attempts: u32) -> Self {
        Self {
            kind: error.kind.clone(),
            message: error.message.clone(),
            attempts,
            details: error.details.clone(),
        }
    }
}

impl std::fmt::Display for WorkflowFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}
