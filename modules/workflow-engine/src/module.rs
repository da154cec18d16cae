//! Wires a `StateMachineEngine` configured from `modules.workflow-engine`
//! onto the client hub, the shared REST router, and workflow dispatch.

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use modkit::{Module, ModuleBundle, ModuleCtx, ModuleTypeFactory, RestfulModule, WorkflowHandler};
use modkit_errors::EngineError;
use statemachine::{InMemoryInstanceStore, StateMachineEngine};

use crate::config::WorkflowEngineConfig;
use crate::handlers;

const MODULE_NAME: &str = "workflow-engine";

/// Claims the `"statemachine"` workflow type: `TriggerWorkflow("statemachine",
/// action, data)` routes here, letting triggers create instances and fire
/// transitions the same way the wire API does.
pub struct WorkflowEngineModule {
    engine: Arc<StateMachineEngine>,
}

impl Default for WorkflowEngineModule {
    fn default() -> Self {
        let store = Arc::new(InMemoryInstanceStore::default());
        Self { engine: Arc::new(StateMachineEngine::new(store, 1024)) }
    }
}

impl WorkflowEngineModule {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn engine(&self) -> Arc<StateMachineEngine> {
        self.engine.clone()
    }
}

#[async_trait]
impl Module for WorkflowEngineModule {
    async fn init(&self, ctx: &ModuleCtx) -> anyhow::Result<()> {
        let config: WorkflowEngineConfig = ctx.config()?;
        for spec in config.definitions {
            let name = spec.name.clone();
            self.engine.register_definition(spec.into())?;
            tracing::info!(module = MODULE_NAME, definition = %name, "registered state machine definition");
        }
        ctx.client_hub().register::<StateMachineEngine>(self.engine.clone());
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl RestfulModule for WorkflowEngineModule {
    fn register_rest(&self, _ctx: &ModuleCtx, router: Router) -> anyhow::Result<Router> {
        Ok(router.merge(handlers::router(self.engine.clone())))
    }
}

#[async_trait]
impl WorkflowHandler for WorkflowEngineModule {
    fn can_handle(&self, workflow_type: &str) -> bool {
        workflow_type == "statemachine"
    }

    async fn execute_workflow(&self, action: &str, data: serde_json::Value) -> Result<serde_json::Value, EngineError> {
        #[derive(serde::Deserialize)]
        struct CreatePayload {
            definition: String,
            id: String,
            #[serde(default)]
            context: serde_json::Value,
        }
        #[derive(serde::Deserialize)]
        struct TransitionPayload {
            instance_id: String,
            event: String,
            #[serde(default)]
            payload: serde_json::Value,
        }

        match action {
            "create" => {
                let body: CreatePayload = serde_json::from_value(data)
                    .map_err(|source| EngineError::SpecInvalid { message: source.to_string() })?;
                let instance = self.engine.create_instance(&body.definition, body.id, body.context).await?;
                serde_json::to_value(instance).map_err(|source| EngineError::SpecInvalid { message: source.to_string() })
            }
            "transition" => {
                let body: TransitionPayload = serde_json::from_value(data)
                    .map_err(|source| EngineError::SpecInvalid { message: source.to_string() })?;
                let instance = self
                    .engine
                    .trigger_transition(&body.instance_id, &body.event, body.payload)
                    .await
                    .map_err(|err| match err {
                        statemachine::TransitionError::NotFound(id) => {
                            EngineError::SpecInvalid { message: format!("instance '{id}' not found") }
                        }
                        statemachine::TransitionError::Engine(engine_err) => engine_err,
                    })?;
                serde_json::to_value(instance).map_err(|source| EngineError::SpecInvalid { message: source.to_string() })
            }
            other => Err(EngineError::NoHandler { workflow: format!("statemachine:{other}") }),
        }
    }
}

fn build() -> ModuleBundle {
    let module = Arc::new(WorkflowEngineModule::new());
    ModuleBundle {
        core: module.clone(),
        rest: Some(module.clone()),
        db: None,
        stateful: None,
        workflow_handler: Some(module),
    }
}

inventory::submit!(ModuleTypeFactory(MODULE_NAME, build));
