//! Module lifecycle contracts, context wiring, HTTP scaffolding, and the
//! registry/runner that drives a plugin-contributed module graph through
//! its lifecycle.
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod api;
#[cfg(feature = "bootstrap")]
pub mod bootstrap;
pub mod client_hub;
pub mod config;
pub mod context;
pub mod contracts;
pub mod plugin;
pub mod registry;
pub mod result;
pub mod runtime;
pub mod telemetry;
pub mod trigger;
pub mod workflow;

pub use context::{ModuleContextBuilder, ModuleCtx};
pub use contracts::{DbModule, Module, RestfulModule, StatefulModule};
pub use plugin::{LicenseValidator, LoadedPlugin, PluginError, PluginLoader, PluginManifest};
pub use registry::{ModuleBundle, ModuleRegistry, ModuleTypeFactory, RegistryBuilder, RegistryError};
pub use trigger::{Trigger, TriggerBinding, TriggerRegistry};
pub use workflow::{WorkflowDispatcher, WorkflowHandler};
