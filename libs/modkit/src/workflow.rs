//! Workflow dispatch (spec §4.E `TriggerWorkflow`, §6 wire entry point):
//! routes a `(workflowType, action, data)` invocation to the first
//! registered handler that claims the workflow type.

use std::sync::Arc;

use modkit_errors::EngineError;

/// Plugin-provided handler for one or more workflow types. `execute_workflow`
/// runs synchronously from the caller's perspective; if it enqueues
/// background work, only the enqueue outcome is returned (spec §6).
#[async_trait::async_trait]
pub trait WorkflowHandler: Send + Sync {
    fn can_handle(&self, workflow_type: &str) -> bool;

    /// # Errors
    /// Any `EngineError` the handler's own logic produces.
    async fn execute_workflow(&self, action: &str, data: serde_json::Value) -> Result<serde_json::Value, EngineError>;
}

/// Routes `TriggerWorkflow` invocations to the first matching handler.
#[derive(Default)]
pub struct WorkflowDispatcher {
    handlers: Vec<Arc<dyn WorkflowHandler>>,
}

impl WorkflowDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn WorkflowHandler>) {
        self.handlers.push(handler);
    }

    /// Route to the first handler whose `can_handle(workflow_type)` is
    /// true.
    ///
    /// # Errors
    /// `EngineError::NoHandler` if no registered handler claims
    /// `workflow_type`.
    pub async fn trigger_workflow(
        &self,
        workflow_type: &str,
        action: &str,
        data: serde_json::Value,
    ) -> Result<serde_json::Value, EngineError> {
        let handler = self
            .handlers
            .iter()
            .find(|h| h.can_handle(workflow_type))
            .ok_or_else(|| EngineError::NoHandler { workflow: workflow_type.to_owned() })?;
        handler.execute_workflow(action, data).await
    }
}
