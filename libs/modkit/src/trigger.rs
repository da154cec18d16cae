//! Trigger registry and dispatch (spec §4.F): a trigger is a long-running
//! source that, once started, calls back into the engine with
//! `(workflowType, action, data)`. Start/stop of triggers rides the same
//! lifecycle as any other stateful module; this registry only tracks
//! which trigger sources are active and how their bindings route.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::workflow::WorkflowDispatcher;

/// One `(source predicate, target workflow)` binding configured on a
/// trigger.
#[derive(Debug, Clone)]
pub struct TriggerBinding {
    pub source_predicate: String,
    pub target_workflow: String,
}

/// A long-running event source. While started, it calls
/// `dispatcher.trigger_workflow` for every event matching one of its
/// bindings; events from one trigger are serialized in source-defined
/// order, but the registry imposes no ordering across triggers.
#[async_trait]
pub trait Trigger: Send + Sync {
    fn name(&self) -> &str;
    fn bindings(&self) -> &[TriggerBinding];

    /// Begin producing events, calling back into `dispatcher` until
    /// `cancel` fires.
    ///
    /// # Errors
    /// Any failure starting the underlying source.
    async fn start(&self, dispatcher: Arc<WorkflowDispatcher>, cancel: CancellationToken) -> anyhow::Result<()>;

    /// # Errors
    /// Any failure stopping the underlying source.
    async fn stop(&self, cancel: CancellationToken) -> anyhow::Result<()>;
}

/// Tracks the set of active triggers. Start/stop of individual triggers
/// is driven by the same module lifecycle as any other `StatefulModule`;
/// this registry exists so the bindings of every configured trigger are
/// discoverable in one place (e.g. for diagnostics or a management API).
#[derive(Default)]
pub struct TriggerRegistry {
    triggers: Vec<Arc<dyn Trigger>>,
}

impl TriggerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, trigger: Arc<dyn Trigger>) {
        self.triggers.push(trigger);
    }

    #[must_use]
    pub fn triggers(&self) -> &[Arc<dyn Trigger>] {
        &self.triggers
    }

    /// Bindings whose `target_workflow` matches, across every registered
    /// trigger.
    #[must_use]
    pub fn bindings_for_workflow(&self, target_workflow: &str) -> Vec<(&str, &TriggerBinding)> {
        self.triggers
            .iter()
            .flat_map(|trigger| trigger.bindings().iter().map(move |binding| (trigger.name(), binding)))
            .filter(|(_, binding)| binding.target_workflow == target_workflow)
            .collect()
    }

    /// Start every registered trigger concurrently, sharing one
    /// dispatcher and cancellation token.
    pub async fn start_all(&self, dispatcher: Arc<WorkflowDispatcher>, cancel: &CancellationToken) {
        for trigger in &self.triggers {
            let trigger = trigger.clone();
            let dispatcher = dispatcher.clone();
            let cancel = cancel.child_token();
            tokio::spawn(async move {
                if let Err(source) = trigger.start(dispatcher, cancel).await {
                    tracing::error!(trigger = trigger.name(), error = %source, "trigger failed to start");
                }
            });
        }
    }

    /// Stop every registered trigger, best-effort.
    pub async fn stop_all(&self, cancel: CancellationToken) {
        for trigger in &self.triggers {
            if let Err(source) = trigger.stop(cancel.clone()).await {
                tracing::warn!(trigger = trigger.name(), error = %source, "trigger failed to stop cleanly");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubTrigger {
        name: String,
        bindings: Vec<TriggerBinding>,
    }

    #[async_trait]
    impl Trigger for StubTrigger {
        fn name(&self) -> &str {
            &self.name
        }

        fn bindings(&self) -> &[TriggerBinding] {
            &self.bindings
        }

        async fn start(&self, _dispatcher: Arc<WorkflowDispatcher>, _cancel: CancellationToken) -> anyhow::Result<()> {
            Ok(())
        }

        async fn stop(&self, _cancel: CancellationToken) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn bindings_for_workflow_spans_every_trigger() {
        let mut registry = TriggerRegistry::new();
        registry.register(Arc::new(StubTrigger {
            name: "cron".to_owned(),
            bindings: vec![TriggerBinding { source_predicate: "*/5 * * * *".to_owned(), target_workflow: "reconcile".to_owned() }],
        }));
        registry.register(Arc::new(StubTrigger {
            name: "webhook".to_owned(),
            bindings: vec![TriggerBinding { source_predicate: "/hooks/order".to_owned(), target_workflow: "reconcile".to_owned() }],
        }));

        let matches = registry.bindings_for_workflow("reconcile");
        assert_eq!(matches.len(), 2);
    }
}
