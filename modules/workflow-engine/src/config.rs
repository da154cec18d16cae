//! Deserializable config shape for the module's `modules.workflow-engine.config`
//! section: a list of state machine definitions, translated into
//! `statemachine::Definition`s at init time.
//!
//! Guards are not expressible from configuration in this increment — a
//! definition loaded this way never rejects a transition on a guard. Code
//! that needs guarded transitions registers its own `Definition` directly
//! against the `StateMachineEngine` resolved from the client hub, instead
//! of going through this config path.

use serde::Deserialize;
use statemachine::{Definition, StateDef, TransitionDef};

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct WorkflowEngineConfig {
    pub definitions: Vec<DefinitionSpec>,
    #[serde(default = "default_max_cached_instances")]
    pub max_cached_instances: usize,
}

const fn default_max_cached_instances() -> usize {
    1024
}

#[derive(Debug, Clone, Deserialize)]
pub struct DefinitionSpec {
    pub name: String,
    pub initial_state: String,
    pub states: Vec<StateSpec>,
    pub transitions: Vec<TransitionSpec>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct StateSpec {
    pub id: String,
    pub is_final: bool,
    pub is_error: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TransitionSpec {
    pub event: String,
    pub from: String,
    pub to: String,
    pub auto_transform: bool,
}

impl From<DefinitionSpec> for Definition {
    fn from(spec: DefinitionSpec) -> Self {
        Definition {
            name: spec.name,
            initial_state: spec.initial_state,
            states: spec.states.into_iter().map(|s| {
                let mut state = StateDef::new(s.id);
                if s.is_final {
                    state = state.terminal();
                }
                if s.is_error {
                    state = state.error();
                }
                state
            }).collect(),
            transitions: spec
                .transitions
                .into_iter()
                .map(|t| {
                    let mut transition = TransitionDef::new(t.event, t.from, t.to);
                    if t.auto_transform {
                        transition = transition.auto();
                    }
                    transition
                })
                .collect(),
        }
    }
}
