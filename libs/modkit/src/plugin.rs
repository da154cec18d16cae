//! Plugin loader (spec §4.C): validates a plugin's manifest, merges its
//! declared capability contracts into the shared [`CapabilityRegistry`],
//! and collects the factories it contributes for modules, pipeline steps,
//! triggers, and workflow handlers. Plugins contribute factories the same
//! way modules do — via `inventory::submit!` at the call site — so this
//! loader's job is bookkeeping: reject name collisions, let a license
//! check veto a plugin outright, and order wiring hooks.

use std::collections::HashMap;
use std::sync::Arc;

use capability_registry::{CapabilityContract, CapabilityError, CapabilityRegistry};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;

use crate::contracts::Module;
use crate::trigger::Trigger;
use crate::workflow::WorkflowHandler;

pub type ModuleFactory = Arc<dyn Fn() -> Arc<dyn Module> + Send + Sync>;
pub type StepFactory = Arc<dyn Fn() -> Arc<dyn pipeline::StepExecutor> + Send + Sync>;
pub type TriggerFactory = Arc<dyn Fn() -> Arc<dyn Trigger> + Send + Sync>;
pub type WorkflowHandlerFactory = Arc<dyn Fn() -> Arc<dyn WorkflowHandler> + Send + Sync>;
pub type WiringHookFn = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;
/// Wraps a raw trigger config before it's handed to a pipeline step,
/// e.g. to inject plugin-specific defaults.
pub type PipelineTriggerConfigWrapper = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// One named wiring hook a plugin wants run, at the given priority
/// (ascending order, lowest first) once every module is instantiated but
/// before the start phase.
#[derive(Debug, Clone)]
pub struct WiringHookSpec {
    pub name: String,
    pub priority: i32,
}

/// What a plugin declares it provides. The factories themselves are
/// supplied alongside the manifest in [`PluginFactories`]; the manifest
/// is what gets validated and recorded.
#[derive(Debug, Clone, Default)]
pub struct PluginManifest {
    pub name: String,
    pub version: String,
    pub module_types: Vec<String>,
    pub trigger_types: Vec<String>,
    pub workflow_types: Vec<String>,
    pub step_types: Vec<String>,
    pub capabilities: Vec<CapabilityContract>,
    pub wiring_hooks: Vec<WiringHookSpec>,
}

/// The actual factories backing a manifest's declared names. Keys here
/// should match the corresponding `*_types` lists in the manifest,
/// though the loader only requires that keys be globally unique — a
/// plugin declaring a type it doesn't supply a factory for simply
/// contributes nothing under that name.
#[derive(Default)]
pub struct PluginFactories {
    pub modules: HashMap<String, ModuleFactory>,
    pub steps: HashMap<String, StepFactory>,
    pub triggers: HashMap<String, TriggerFactory>,
    pub workflow_handlers: HashMap<String, WorkflowHandlerFactory>,
    pub wiring_hooks: HashMap<String, WiringHookFn>,
    pub pipeline_trigger_config_wrappers: HashMap<String, PipelineTriggerConfigWrapper>,
}

/// Vets a plugin before it's allowed to register anything. Returning
/// `Err` vetoes the whole plugin.
pub trait LicenseValidator: Send + Sync {
    /// # Errors
    /// A human-readable reason the plugin was refused.
    fn validate(&self, manifest: &PluginManifest) -> Result<(), String>;
}

/// Accepts every plugin unconditionally.
pub struct AllowAllLicenses;

impl LicenseValidator for AllowAllLicenses {
    fn validate(&self, _manifest: &PluginManifest) -> Result<(), String> {
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("plugin '{plugin}' conflicts with an already-loaded plugin over {kind} key '{key}'")]
    ConflictingPlugin { plugin: String, kind: &'static str, key: String },
    #[error("plugin '{plugin}' was refused: {reason}")]
    LicenseRefused { plugin: String, reason: String },
    #[error(transparent)]
    Capability(#[from] CapabilityError),
}

#[derive(Debug, Clone)]
pub struct LoadedPlugin {
    pub name: String,
    pub version: String,
}

/// Accumulates plugin-contributed factories and capability bindings
/// across a bootstrap run.
pub struct PluginLoader {
    license_validator: Arc<dyn LicenseValidator>,
    capabilities: Arc<CapabilityRegistry>,
    modules: DashMap<String, ModuleFactory>,
    steps: DashMap<String, StepFactory>,
    triggers: DashMap<String, TriggerFactory>,
    workflow_handlers: DashMap<String, WorkflowHandlerFactory>,
    wiring_hooks: RwLock<Vec<(i32, String, WiringHookFn)>>,
    pipeline_trigger_config_wrappers: DashMap<String, PipelineTriggerConfigWrapper>,
    loaded: RwLock<Vec<LoadedPlugin>>,
}

impl PluginLoader {
    #[must_use]
    pub fn new(capabilities: Arc<CapabilityRegistry>, license_validator: Arc<dyn LicenseValidator>) -> Self {
        Self {
            license_validator,
            capabilities,
            modules: DashMap::new(),
            steps: DashMap::new(),
            triggers: DashMap::new(),
            workflow_handlers: DashMap::new(),
            wiring_hooks: RwLock::new(Vec::new()),
            pipeline_trigger_config_wrappers: DashMap::new(),
            loaded: RwLock::new(Vec::new()),
        }
    }

    /// Validate `manifest` against the license check, merge its
    /// capability contracts, and record its factories. Fails atomically:
    /// a key conflict or license refusal leaves the loader unchanged.
    ///
    /// # Errors
    /// `PluginError::LicenseRefused` if the license validator vetoes the
    /// plugin; `PluginError::ConflictingPlugin` if any factory key the
    /// plugin contributes is already claimed by a previously loaded
    /// plugin; `PluginError::Capability` if a capability contract
    /// conflicts with one already registered under the same name.
    pub fn load_plugin(&self, manifest: PluginManifest, factories: PluginFactories) -> Result<LoadedPlugin, PluginError> {
        self.license_validator
            .validate(&manifest)
            .map_err(|reason| PluginError::LicenseRefused { plugin: manifest.name.clone(), reason })?;

        self.check_no_conflict(&manifest.name, "module", factories.modules.keys(), &self.modules)?;
        self.check_no_conflict(&manifest.name, "step", factories.steps.keys(), &self.steps)?;
        self.check_no_conflict(&manifest.name, "trigger", factories.triggers.keys(), &self.triggers)?;
        self.check_no_conflict(&manifest.name, "workflow handler", factories.workflow_handlers.keys(), &self.workflow_handlers)?;
        self.check_no_conflict(
            &manifest.name,
            "pipeline trigger config wrapper",
            factories.pipeline_trigger_config_wrappers.keys(),
            &self.pipeline_trigger_config_wrappers,
        )?;
        {
            let existing = self.wiring_hooks.read();
            if let Some(name) = factories.wiring_hooks.keys().find(|k| existing.iter().any(|(_, n, _)| n == *k)) {
                return Err(PluginError::ConflictingPlugin { plugin: manifest.name.clone(), kind: "wiring hook", key: name.clone() });
            }
        }

        for contract in &manifest.capabilities {
            self.capabilities.register(contract.clone())?;
        }

        for (key, factory) in factories.modules {
            self.modules.insert(key, factory);
        }
        for (key, factory) in factories.steps {
            self.steps.insert(key, factory);
        }
        for (key, factory) in factories.triggers {
            self.triggers.insert(key, factory);
        }
        for (key, factory) in factories.workflow_handlers {
            self.workflow_handlers.insert(key, factory);
        }
        for (key, wrapper) in factories.pipeline_trigger_config_wrappers {
            self.pipeline_trigger_config_wrappers.insert(key, wrapper);
        }
        for spec in &manifest.wiring_hooks {
            if let Some(hook) = factories.wiring_hooks.get(&spec.name) {
                self.wiring_hooks.write().push((spec.priority, spec.name.clone(), hook.clone()));
            }
        }

        let loaded = LoadedPlugin { name: manifest.name, version: manifest.version };
        self.loaded.write().push(loaded.clone());
        Ok(loaded)
    }

    fn check_no_conflict<'a, T>(
        &self,
        plugin: &str,
        kind: &'static str,
        keys: impl Iterator<Item = &'a String>,
        existing: &DashMap<String, T>,
    ) -> Result<(), PluginError> {
        for key in keys {
            if existing.contains_key(key) {
                return Err(PluginError::ConflictingPlugin { plugin: plugin.to_owned(), kind, key: key.clone() });
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn loaded_plugins(&self) -> Vec<LoadedPlugin> {
        self.loaded.read().clone()
    }

    #[must_use]
    pub fn module_factories(&self) -> Vec<(String, ModuleFactory)> {
        self.modules.iter().map(|entry| (entry.key().clone(), entry.value().clone())).collect()
    }

    #[must_use]
    pub fn step_factories(&self) -> Vec<(String, StepFactory)> {
        self.steps.iter().map(|entry| (entry.key().clone(), entry.value().clone())).collect()
    }

    #[must_use]
    pub fn trigger_factories(&self) -> Vec<(String, TriggerFactory)> {
        self.triggers.iter().map(|entry| (entry.key().clone(), entry.value().clone())).collect()
    }

    #[must_use]
    pub fn workflow_handler_factories(&self) -> Vec<(String, WorkflowHandlerFactory)> {
        self.workflow_handlers.iter().map(|entry| (entry.key().clone(), entry.value().clone())).collect()
    }

    #[must_use]
    pub fn pipeline_trigger_config_wrappers(&self) -> Vec<(String, PipelineTriggerConfigWrapper)> {
        self.pipeline_trigger_config_wrappers.iter().map(|entry| (entry.key().clone(), entry.value().clone())).collect()
    }

    /// Wiring hooks in ascending priority order, ready to run after every
    /// module has been instantiated but before the start phase.
    #[must_use]
    pub fn wiring_hooks(&self) -> Vec<(i32, WiringHookFn)> {
        let mut hooks = self.wiring_hooks.read().clone();
        hooks.sort_by_key(|(priority, _, _)| *priority);
        hooks.into_iter().map(|(priority, _, hook)| (priority, hook)).collect()
    }

    /// Run every wiring hook in ascending priority order, stopping at the
    /// first failure.
    ///
    /// # Errors
    /// Propagates the first hook's failure.
    pub fn run_wiring_hooks(&self) -> anyhow::Result<()> {
        for (_, hook) in self.wiring_hooks() {
            hook()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    fn loader() -> PluginLoader {
        PluginLoader::new(Arc::new(CapabilityRegistry::new()), Arc::new(AllowAllLicenses))
    }

    fn manifest(name: &str) -> PluginManifest {
        PluginManifest { name: name.to_owned(), version: "1.0.0".to_owned(), ..Default::default() }
    }

    struct NoopHandler;

    #[async_trait]
    impl WorkflowHandler for NoopHandler {
        fn can_handle(&self, _workflow_type: &str) -> bool {
            true
        }

        async fn execute_workflow(&self, _action: &str, data: Value) -> Result<Value, modkit_errors::EngineError> {
            Ok(data)
        }
    }

    #[test]
    fn load_plugin_registers_capability_and_factories() {
        let loader = loader();
        let mut manifest = manifest("notify");
        manifest.capabilities.push(CapabilityContract::new("notifications"));
        let mut factories = PluginFactories::default();
        factories.workflow_handlers.insert("notify.send".to_owned(), Arc::new(|| Arc::new(NoopHandler) as Arc<dyn WorkflowHandler>));

        loader.load_plugin(manifest, factories).unwrap();

        assert_eq!(loader.workflow_handler_factories().len(), 1);
        assert!(loader.capabilities.providers("notifications").is_empty());
    }

    #[test]
    fn duplicate_factory_key_is_rejected() {
        let loader = loader();
        let mut first = PluginFactories::default();
        first.workflow_handlers.insert("notify.send".to_owned(), Arc::new(|| Arc::new(NoopHandler) as Arc<dyn WorkflowHandler>));
        loader.load_plugin(manifest("a"), first).unwrap();

        let mut second = PluginFactories::default();
        second.workflow_handlers.insert("notify.send".to_owned(), Arc::new(|| Arc::new(NoopHandler) as Arc<dyn WorkflowHandler>));
        let err = loader.load_plugin(manifest("b"), second).unwrap_err();
        assert!(matches!(err, PluginError::ConflictingPlugin { kind: "workflow handler", .. }));
    }

    struct RefuseEverything;

    impl LicenseValidator for RefuseEverything {
        fn validate(&self, manifest: &PluginManifest) -> Result<(), String> {
            Err(format!("no license for {}", manifest.name))
        }
    }

    #[test]
    fn license_refusal_vetoes_plugin() {
        let loader = PluginLoader::new(Arc::new(CapabilityRegistry::new()), Arc::new(RefuseEverything));
        let err = loader.load_plugin(manifest("paid-feature"), PluginFactories::default()).unwrap_err();
        assert!(matches!(err, PluginError::LicenseRefused { .. }));
    }

    #[test]
    fn wiring_hooks_run_in_ascending_priority_order() {
        let loader = loader();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let mut manifest = manifest("ordering");
        manifest.wiring_hooks = vec![
            WiringHookSpec { name: "second".to_owned(), priority: 10 },
            WiringHookSpec { name: "first".to_owned(), priority: 0 },
        ];
        let mut factories = PluginFactories::default();
        let order_a = order.clone();
        factories.wiring_hooks.insert(
            "first".to_owned(),
            Arc::new(move || {
                order_a.lock().push("first");
                Ok(())
            }),
        );
        let order_b = order.clone();
        factories.wiring_hooks.insert(
            "second".to_owned(),
            Arc::new(move || {
                order_b.lock().push("second");
                Ok(())
            }),
        );

        loader.load_plugin(manifest, factories).unwrap();
        loader.run_wiring_hooks().unwrap();
        assert_eq!(*order.lock(), vec!["first", "second"]);
    }
}
