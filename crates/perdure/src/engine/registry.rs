//! Workflow registry
//!
//! The in-memory name → handler map is authoritative for execution; the
//! definition rows in the store exist for administrative queries only.
//! The registry is expected to be populated during initialization and is
//! append-only after that.

use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLock;

use super::executor::EngineError;
use crate::workflow::{DefineOptions, WorkflowHandler};

/// A registered workflow: its handler plus the options it was defined with
#[derive(Clone)]
pub struct RegisteredWorkflow {
    /// Workflow name
    pub name: String,

    /// Type-erased handler
    pub handler: WorkflowHandler,

    /// Options captured at definition time
    pub options: DefineOptions,
}

/// Registry of workflow handlers by name
pub struct WorkflowRegistry {
    workflows: RwLock<HashMap<String, RegisteredWorkflow>>,
}

impl Default for WorkflowRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            workflows: RwLock::new(HashMap::new()),
        }
    }

    /// Register a workflow handler
    ///
    /// Fails with [`EngineError::AlreadyDefined`] if the name is taken.
    pub fn register(
        &self,
        name: &str,
        handler: WorkflowHandler,
        options: DefineOptions,
    ) -> Result<(), EngineError> {
        let mut workflows = self.workflows.write();
        if workflows.contains_key(name) {
            return Err(EngineError::AlreadyDefined(name.to_string()));
        }
        workflows.insert(
            name.to_string(),
            RegisteredWorkflow {
                name: name.to_string(),
                handler,
                options,
            },
        );
        Ok(())
    }

    /// Look up a registered workflow by name
    pub fn lookup(&self, name: &str) -> Option<RegisteredWorkflow> {
        self.workflows.read().get(name).cloned()
    }

    /// Check if a workflow name is registered
    pub fn contains(&self, name: &str) -> bool {
        self.workflows.read().contains_key(name)
    }

    /// Get the number of registered workflows
    pub fn len(&self) -> usize {
        self.workflows.read().len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.workflows.read().is_empty()
    }

    /// Get all registered workflow names
    pub fn workflow_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.workflows.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for WorkflowRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowRegistry")
            .field("workflows", &self.workflow_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::handler_fn;
    use serde_json::json;

    fn noop_handler() -> WorkflowHandler {
        handler_fn(|_ctx| async { Ok(json!({})) })
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = WorkflowRegistry::new();
        registry
            .register("orders", noop_handler(), DefineOptions::default())
            .unwrap();

        assert!(registry.contains("orders"));
        assert!(!registry.contains("unknown"));
        assert_eq!(registry.len(), 1);

        let registered = registry.lookup("orders").unwrap();
        assert_eq!(registered.name, "orders");
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let registry = WorkflowRegistry::new();
        registry
            .register("orders", noop_handler(), DefineOptions::default())
            .unwrap();

        let result = registry.register("orders", noop_handler(), DefineOptions::default());
        assert!(matches!(result, Err(EngineError::AlreadyDefined(_))));
    }

    #[test]
    fn test_lookup_unknown_returns_none() {
        let registry = WorkflowRegistry::new();
        assert!(registry.lookup("missing").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_debug_lists_names() {
        let registry = WorkflowRegistry::new();
        registry
            .register("orders", noop_handler(), DefineOptions::default())
            .unwrap();

        let debug_str = format!("{:?}", registry);
        assert!(debug_str.contains("orders"));
    }
}
