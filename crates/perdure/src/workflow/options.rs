//! Options for defining, starting, and resuming workflows

use std::time::Duration;

use serde_json::Value;

use crate::reliability::RetryPolicy;

/// Options for [`define`](crate::WorkflowEngine::define)
#[derive(Debug, Clone)]
pub struct DefineOptions {
    /// Version string persisted on the definition row
    pub version: String,

    /// Human-readable description
    pub description: Option<String>,

    /// Declared input/output schema; opaque to the engine
    pub schema: Option<Value>,
}

impl Default for DefineOptions {
    fn default() -> Self {
        Self {
            version: "1.0.0".to_string(),
            description: None,
            schema: None,
        }
    }
}

impl DefineOptions {
    /// Create default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the definition version
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Attach a declared schema (opaque to the engine)
    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self
    }
}

/// Options for [`start`](crate::WorkflowEngine::start)
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Workflow-level retry policy; engine default when absent
    pub retry: Option<RetryPolicy>,

    /// Metadata payload persisted on the execution row
    pub metadata: Option<Value>,

    /// Deadline applied to each handler invocation
    pub timeout: Option<Duration>,
}

impl StartOptions {
    /// Create default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the workflow retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Attach execution metadata
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Set a deadline for each handler invocation
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Options for [`resume`](crate::WorkflowEngine::resume)
#[derive(Debug, Clone, Default)]
pub struct ResumeOptions {
    /// Workflow-level retry policy; engine default when absent
    pub retry: Option<RetryPolicy>,

    /// Deadline applied to each handler invocation
    pub timeout: Option<Duration>,
}

impl ResumeOptions {
    /// Create default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the workflow retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Set a deadline for each handler invocation
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}
