//! Module graph builder and lifecycle registry.
//!
//! Module types contribute a factory through `inventory::submit!`, keyed by
//! the `type` name a specification's `modules[]` entries resolve against.
//! At startup, [`ModuleRegistry::discover_and_build`] reads the `modules`
//! declarations off the active `ConfigProvider`, instantiates one bundle
//! per declared module by invoking its type's factory, and topologically
//! sorts the result by `dependsOn` into a [`ModuleRegistry`]. This realizes
//! §4.D (Module Graph Builder) and §4.E (Lifecycle Coordinator) of the
//! engine design: factories returning modules keyed by name, a dependency
//! DAG resolved with Kahn's algorithm, and start/stop phases that walk the
//! resulting order forwards and backwards.

use axum::Router;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::ConfigProvider;
use crate::context::ModuleContextBuilder;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("module '{0}' is already registered")]
    DuplicateModule(String),
    #[error("module '{module}' has type '{module_type}', which no factory is registered for")]
    UnknownModuleType { module: String, module_type: String },
    #[error("module '{module}' depends on unregistered module '{dependency}'")]
    UnknownDependency { module: String, dependency: String },
    #[error("dependency cycle detected among modules: {0:?}")]
    DependencyCycle(Vec<String>),
    #[error("DB migration failed for module '{module}'")]
    DbMigrate {
        module: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("initialization failed for module '{module}'")]
    Init {
        module: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("REST registration failed for module '{module}'")]
    RestRegister {
        module: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("start failed for module '{module}'")]
    Start {
        module: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Everything one module-type factory produces: the mandatory core module
/// plus whichever optional capability facets it implements. A factory
/// typically builds a single concrete type and unsize-coerces the same
/// `Arc` into each populated facet, so one instance can satisfy several
/// roles without any downcasting.
pub struct ModuleBundle {
    pub core: Arc<dyn crate::contracts::Module>,
    pub rest: Option<Arc<dyn crate::contracts::RestfulModule>>,
    pub db: Option<Arc<dyn crate::contracts::DbModule>>,
    pub stateful: Option<Arc<dyn crate::contracts::StatefulModule>>,
    pub workflow_handler: Option<Arc<dyn crate::workflow::WorkflowHandler>>,
}

impl ModuleBundle {
    /// A bundle with only the mandatory core facet populated.
    #[must_use]
    pub fn core_only(core: Arc<dyn crate::contracts::Module>) -> Self {
        Self { core, rest: None, db: None, stateful: None, workflow_handler: None }
    }
}

/// Factory contributed via `inventory::submit!`, keyed by the `type` name a
/// specification's `modules[].type` resolves against. Invoked once per
/// declared module instance of that type.
pub struct ModuleTypeFactory(pub &'static str, pub fn() -> ModuleBundle);

inventory::collect!(ModuleTypeFactory);

pub struct ModuleEntry {
    pub name: String,
    pub deps: Vec<String>,
    pub core: Arc<dyn crate::contracts::Module>,
    pub rest: Option<Arc<dyn crate::contracts::RestfulModule>>,
    pub db: Option<Arc<dyn crate::contracts::DbModule>>,
    pub stateful: Option<Arc<dyn crate::contracts::StatefulModule>>,
    pub workflow_handler: Option<Arc<dyn crate::workflow::WorkflowHandler>>,
}

/// The final, topologically sorted module set, ready to drive through the
/// lifecycle phases.
pub struct ModuleRegistry {
    modules: Vec<ModuleEntry>,
}

impl ModuleRegistry {
    #[must_use]
    pub fn modules(&self) -> &[ModuleEntry] {
        &self.modules
    }

    #[must_use]
    pub fn get_module(&self, name: &str) -> Option<Arc<dyn crate::contracts::Module>> {
        self.modules
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.core.clone())
    }

    /// Every `type` name a factory was contributed for via
    /// `inventory::submit!`, regardless of whether the active spec
    /// declares a module of that type.
    #[must_use]
    pub fn known_module_types() -> HashSet<String> {
        inventory::iter::<ModuleTypeFactory>
            .into_iter()
            .map(|factory| factory.0.to_owned())
            .collect()
    }

    /// Resolve every `modules` entry the active `ConfigProvider` declares
    /// against the type factories contributed via `inventory::submit!`, and
    /// topologically sort the result by `dependsOn`.
    ///
    /// # Errors
    /// Returns `RegistryError` if a module name is declared twice, a
    /// `type` doesn't resolve to a registered factory, a `dependsOn` edge
    /// references an undeclared module, or the dependency relation is
    /// cyclic.
    pub fn discover_and_build(provider: &dyn ConfigProvider) -> Result<Self, RegistryError> {
        let factories: HashMap<&'static str, fn() -> ModuleBundle> = inventory::iter::<ModuleTypeFactory>
            .into_iter()
            .map(|factory| (factory.0, factory.1))
            .collect();

        let mut builder = RegistryBuilder::default();
        for declaration in provider.module_declarations() {
            let factory = factories.get(declaration.type_name.as_str()).ok_or_else(|| {
                RegistryError::UnknownModuleType {
                    module: declaration.name.clone(),
                    module_type: declaration.type_name.clone(),
                }
            })?;
            let bundle = factory();
            builder.register(declaration.name, declaration.depends_on, bundle)?;
        }
        builder.build_topo_sorted()
    }

    /// Run DB migrations for every module with a `DbModule` binding, in
    /// dependency order.
    ///
    /// # Errors
    /// Propagates the first migration failure, tagged with the module name.
    pub async fn run_db_phase(&self, ctx_builder: &ModuleContextBuilder) -> Result<(), RegistryError> {
        for entry in &self.modules {
            let Some(db_module) = entry.db.as_ref() else {
                continue;
            };
            let ctx = ctx_builder
                .for_module(&entry.name)
                .await
                .map_err(|source| RegistryError::DbMigrate { module: entry.name.clone(), source })?;
            let Some(db) = ctx.db_optional() else {
                tracing::debug!(module = %entry.name, "module has a DB binding but no DB configured");
                continue;
            };
            tracing::debug!(module = %entry.name, "running DB migration");
            db_module
                .migrate(&db)
                .await
                .map_err(|source| RegistryError::DbMigrate { module: entry.name.clone(), source })?;
        }
        Ok(())
    }

    /// Initialize every module in dependency order (§4.D step 3 —
    /// `Configure` with a service registry from which dependencies are
    /// resolvable by name via `ClientHub`).
    ///
    /// # Errors
    /// Propagates the first initialization failure, tagged with the module name.
    pub async fn run_init_phase(&self, ctx_builder: &ModuleContextBuilder) -> Result<(), RegistryError> {
        for entry in &self.modules {
            let ctx = ctx_builder
                .for_module(&entry.name)
                .await
                .map_err(|source| RegistryError::Init { module: entry.name.clone(), source })?;
            entry
                .core
                .init(&ctx)
                .await
                .map_err(|source| RegistryError::Init { module: entry.name.clone(), source })?;
        }
        Ok(())
    }

    /// Fold every module's REST registration onto a single shared router.
    ///
    /// # Errors
    /// Propagates the first registration failure, tagged with the module name.
    pub async fn run_rest_phase(
        &self,
        ctx_builder: &ModuleContextBuilder,
        mut router: Router,
    ) -> Result<Router, RegistryError> {
        for entry in &self.modules {
            let Some(rest) = entry.rest.as_ref() else {
                continue;
            };
            let ctx = ctx_builder
                .for_module(&entry.name)
                .await
                .map_err(|source| RegistryError::RestRegister { module: entry.name.clone(), source })?;
            router = rest
                .register_rest(&ctx, router)
                .map_err(|source| RegistryError::RestRegister { module: entry.name.clone(), source })?;
        }
        Ok(router)
    }

    /// Start every stateful module in dependency order. On failure, already
    /// started modules are stopped in reverse order and the original error
    /// is returned (§4.E Start rollback).
    ///
    /// # Errors
    /// Returns the triggering module's start error after rolling back.
    pub async fn run_start_phase(&self, cancel: CancellationToken) -> Result<(), RegistryError> {
        let mut started: Vec<&ModuleEntry> = Vec::new();
        for entry in &self.modules {
            let Some(stateful) = entry.stateful.as_ref() else {
                started.push(entry);
                continue;
            };
            match stateful.start(cancel.clone()).await {
                Ok(()) => {
                    tracing::info!(module = %entry.name, "module started");
                    started.push(entry);
                }
                Err(source) => {
                    tracing::error!(module = %entry.name, error = %source, "module failed to start, rolling back");
                    for rollback in started.iter().rev() {
                        Self::stop_one(rollback, cancel.clone()).await;
                    }
                    return Err(RegistryError::Start { module: entry.name.clone(), source });
                }
            }
        }
        Ok(())
    }

    async fn stop_one(entry: &ModuleEntry, cancel: CancellationToken) {
        if let Some(stateful) = &entry.stateful {
            if let Err(err) = stateful.stop(cancel).await {
                tracing::warn!(module = %entry.name, error = %err, "failed to stop module");
            } else {
                tracing::info!(module = %entry.name, "module stopped");
            }
        }
    }

    /// Stop every stateful module in reverse dependency order. Best-effort:
    /// continues past individual failures (§4.E Stop semantics).
    pub async fn run_stop_phase(&self, cancel: CancellationToken) {
        for entry in self.modules.iter().rev() {
            Self::stop_one(entry, cancel.clone()).await;
        }
    }
}

/// Builder fed from resolved `(name, deps, bundle)` triples; validates and
/// topologically sorts on `build_topo_sorted`.
#[derive(Default)]
pub struct RegistryBuilder {
    core: HashMap<String, Arc<dyn crate::contracts::Module>>,
    deps: HashMap<String, Vec<String>>,
    rest: HashMap<String, Arc<dyn crate::contracts::RestfulModule>>,
    db: HashMap<String, Arc<dyn crate::contracts::DbModule>>,
    stateful: HashMap<String, Arc<dyn crate::contracts::StatefulModule>>,
    workflow: HashMap<String, Arc<dyn crate::workflow::WorkflowHandler>>,
}

impl RegistryBuilder {
    /// Register one declared module instance's bundle under `name`, wired
    /// to depend on `deps`.
    ///
    /// # Errors
    /// `RegistryError::DuplicateModule` if `name` was already registered.
    pub fn register(&mut self, name: String, deps: Vec<String>, bundle: ModuleBundle) -> Result<(), RegistryError> {
        if self.core.contains_key(&name) {
            return Err(RegistryError::DuplicateModule(name));
        }
        if let Some(rest) = bundle.rest {
            self.rest.insert(name.clone(), rest);
        }
        if let Some(db) = bundle.db {
            self.db.insert(name.clone(), db);
        }
        if let Some(stateful) = bundle.stateful {
            self.stateful.insert(name.clone(), stateful);
        }
        if let Some(workflow_handler) = bundle.workflow_handler {
            self.workflow.insert(name.clone(), workflow_handler);
        }
        self.deps.insert(name.clone(), deps);
        self.core.insert(name, bundle.core);
        Ok(())
    }

    /// Validate capability bindings, resolve the dependency DAG with Kahn's
    /// algorithm, and emit the topologically ordered registry.
    ///
    /// # Errors
    /// `RegistryError::UnknownDependency` if a capability or `dependsOn`
    /// edge references a module that was never registered;
    /// `RegistryError::DependencyCycle` if the dependency relation is
    /// cyclic.
    pub fn build_topo_sorted(self) -> Result<ModuleRegistry, RegistryError> {
        for name in self.rest.keys().chain(self.db.keys()).chain(self.stateful.keys()).chain(self.workflow.keys()) {
            if !self.core.contains_key(name) {
                return Err(RegistryError::UnknownDependency {
                    module: name.clone(),
                    dependency: "<capability target>".to_owned(),
                });
            }
        }

        let names: Vec<String> = self.core.keys().cloned().collect();
        let mut index: HashMap<&str, usize> = HashMap::new();
        for (i, name) in names.iter().enumerate() {
            index.insert(name.as_str(), i);
        }

        let mut indegree = vec![0usize; names.len()];
        let mut adjacency = vec![Vec::<usize>::new(); names.len()];

        for (module, deps) in &self.deps {
            let &u = index.get(module.as_str()).ok_or_else(|| RegistryError::UnknownDependency {
                module: module.clone(),
                dependency: "<self>".to_owned(),
            })?;
            for dep in deps {
                let Some(&v) = index.get(dep.as_str()) else {
                    return Err(RegistryError::UnknownDependency { module: module.clone(), dependency: dep.clone() });
                };
                adjacency[v].push(u);
                indegree[u] += 1;
            }
        }

        let mut queue: VecDeque<usize> = (0..names.len()).filter(|&i| indegree[i] == 0).collect();
        let mut order = Vec::with_capacity(names.len());
        while let Some(u) = queue.pop_front() {
            order.push(u);
            for &w in &adjacency[u] {
                indegree[w] -= 1;
                if indegree[w] == 0 {
                    queue.push_back(w);
                }
            }
        }

        if order.len() != names.len() {
            let ordered: HashSet<usize> = order.iter().copied().collect();
            let cyclic = (0..names.len()).filter(|i| !ordered.contains(i)).map(|i| names[i].clone()).collect();
            return Err(RegistryError::DependencyCycle(cyclic));
        }

        let mut entries = Vec::with_capacity(order.len());
        for i in order {
            let name = names[i].clone();
            let deps = self.deps.get(&name).cloned().unwrap_or_default();
            let core = self.core.get(&name).cloned().ok_or_else(|| RegistryError::UnknownDependency {
                module: name.clone(),
                dependency: "<core>".to_owned(),
            })?;
            entries.push(ModuleEntry {
                rest: self.rest.get(&name).cloned(),
                db: self.db.get(&name).cloned(),
                stateful: self.stateful.get(&name).cloned(),
                workflow_handler: self.workflow.get(&name).cloned(),
                name,
                deps,
                core,
            });
        }

        tracing::info!(
            modules = ?entries.iter().map(|e| e.name.as_str()).collect::<Vec<_>>(),
            "module dependency order resolved"
        );

        Ok(ModuleRegistry { modules: entries })
    }
}
