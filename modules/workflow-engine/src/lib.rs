//! State machine engine module: registers configured definitions on a
//! `StateMachineEngine`, publishes it through the client hub, exposes the
//! wire state-machine API (spec §6), and claims the `"statemachine"`
//! workflow type for dispatch from triggers.

mod config;
mod handlers;
mod module;

pub use config::{DefinitionSpec, StateSpec, TransitionSpec, WorkflowEngineConfig};
pub use module::WorkflowEngineModule;
