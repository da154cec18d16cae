//! Bootstrap entrypoint: load the declarative specification document,
//! validate it against the schema registry, wire up logging and the
//! database, then hand off to the module runner.
//!
//! Exit codes follow the external-interface contract: `0` normal stop, `1`
//! configuration invalid, `2` start failure, `3` unrecoverable runtime
//! error.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use figment::Figment;
use figment::providers::{Env, Serialized};
use schema_registry::{SchemaRegistry, SpecForValidation, ValidateOptions, ValidationIssue};
use serde::{Deserialize, Serialize};

use crate::config::ConfigProvider;
use crate::registry::{ModuleRegistry, RegistryError};
use crate::runtime::{DbOptions, HttpOptions, RunOptions, ShutdownOptions, run};
use crate::telemetry::{LoggingConfig, init_tracing};

/// One `modules[]` entry of the specification document: `type` defaults to
/// `name` when omitted, and every field besides `name`/`type`/`dependsOn`
/// (chiefly `config`, and an optional per-module `database` section) is
/// kept verbatim in `raw` for `ConfigProvider::get_module_config`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModuleSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: Option<String>,
    #[serde(rename = "dependsOn", default)]
    pub depends_on: Vec<String>,
    #[serde(flatten)]
    pub raw: serde_json::Value,
}

impl ModuleSpec {
    fn resolved_type(&self) -> String {
        self.type_name.clone().unwrap_or_else(|| self.name.clone())
    }

    fn config_section(&self) -> serde_json::Value {
        self.raw.get("config").cloned().unwrap_or(serde_json::Value::Null)
    }
}

/// The top-level declarative specification document: `modules`,
/// `workflows`, `triggers` sections plus the ambient `logging`/`database`/
/// `http` sections every deployment needs regardless of which modules it
/// loads.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct SpecDocument {
    pub logging: LoggingConfig,
    pub database: Option<DatabaseSpec>,
    pub http: Option<HttpSpec>,
    pub modules: Vec<ModuleSpec>,
    pub workflows: serde_json::Value,
    pub triggers: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseSpec {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpSpec {
    pub bind: SocketAddr,
}

impl ConfigProvider for SpecDocument {
    fn get_module_config(&self, module_name: &str) -> Option<&serde_json::Value> {
        self.modules.iter().find(|module| module.name == module_name).map(|module| &module.raw)
    }

    fn module_declarations(&self) -> Vec<schema_registry::ModuleEntry> {
        self.modules
            .iter()
            .map(|module| schema_registry::ModuleEntry {
                name: module.name.clone(),
                type_name: module.resolved_type(),
                depends_on: module.depends_on.clone(),
                config: module.config_section(),
            })
            .collect()
    }
}

/// Failure classification driving the process exit code.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("configuration invalid: {0}")]
    ConfigInvalid(#[source] anyhow::Error),
    #[error("start failure: {0}")]
    StartFailure(#[source] anyhow::Error),
    #[error("unrecoverable runtime error: {0}")]
    RuntimeError(#[source] anyhow::Error),
}

impl BootstrapError {
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::ConfigInvalid(_) => 1,
            Self::StartFailure(_) => 2,
            Self::RuntimeError(_) => 3,
        }
    }
}

/// CLI-level overrides that don't belong in the specification document
/// itself: `-v`/`-vv`/`-vvv` verbosity and `--mock`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOverrides {
    /// Number of `-v` flags given on the command line.
    pub verbosity: u8,
    /// Force every database-backed module onto an in-memory SQLite
    /// connection, ignoring the spec's `database.url`.
    pub mock: bool,
}

impl RunOverrides {
    fn logging_level(self) -> Option<&'static str> {
        match self.verbosity {
            0 => None,
            1 => Some("debug"),
            2 => Some("debug,modkit=trace,workflow_engine=trace"),
            _ => Some("trace"),
        }
    }
}

/// Load the specification document at `path`, layering in `LOOMWORK_`
/// prefixed environment overrides.
///
/// # Errors
/// Returns `BootstrapError::ConfigInvalid` if the file cannot be read or
/// parsed.
pub fn load_spec(path: &Path) -> Result<SpecDocument, BootstrapError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|source| BootstrapError::ConfigInvalid(anyhow::anyhow!(source)))?;
    let parsed: serde_json::Value = serde_saphyr::from_str(&contents)
        .map_err(|source| BootstrapError::ConfigInvalid(anyhow::anyhow!(source)))?;

    Figment::new()
        .merge(Serialized::defaults(parsed))
        .merge(Env::prefixed("LOOMWORK_").split("__"))
        .extract()
        .map_err(|source| BootstrapError::ConfigInvalid(anyhow::anyhow!(source)))
}

/// Validate `spec` against the schema registry (§4.B): duplicate module
/// names, unresolvable `dependsOn`, dependency cycles, and workflow/trigger
/// entries missing `type`. No module type currently registers a config
/// schema anywhere in the engine, so every type with a live factory is
/// passed as `extra_module_types` rather than failing the known-type
/// check — the value validation still provides is structural, not
/// per-field config checking.
#[must_use]
pub fn validate_spec(spec: &SpecDocument) -> Vec<ValidationIssue> {
    let view = SpecForValidation {
        modules: spec.module_declarations(),
        workflows: spec.workflows.clone(),
        triggers: spec.triggers.clone(),
    };
    let registry = SchemaRegistry::new();
    let options = ValidateOptions { extra_module_types: ModuleRegistry::known_module_types(), ..ValidateOptions::default() };
    registry.validate_spec(&view, &options)
}

/// Render validation issues as one multi-line message for
/// `BootstrapError::ConfigInvalid` / CLI output.
#[must_use]
pub fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|issue| match &issue.module {
            Some(module) => format!("[{module}] {}", issue.message),
            None => issue.message.clone(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Load the spec, validate it, wire logging and the database, and run the
/// full module lifecycle to completion (i.e. until shutdown is signalled).
///
/// # Errors
/// Returns `BootstrapError` classified by failure phase so the caller can
/// translate it into the matching process exit code.
pub async fn run_server(path: &Path, overrides: RunOverrides) -> Result<(), BootstrapError> {
    let mut spec = load_spec(path)?;

    let issues = validate_spec(&spec);
    if !issues.is_empty() {
        return Err(BootstrapError::ConfigInvalid(anyhow::anyhow!(format_issues(&issues))));
    }

    if let Some(level) = overrides.logging_level() {
        spec.logging.level = level.to_owned();
    }

    let _logging_guard = init_tracing(&spec.logging).map_err(BootstrapError::ConfigInvalid)?;

    let db = if overrides.mock {
        tracing::warn!("--mock: forcing in-memory SQLite regardless of configured database");
        let manager = modkit_db::DbManager::connect("sqlite::memory:")
            .await
            .map_err(BootstrapError::ConfigInvalid)?;
        DbOptions::Manager(Arc::new(manager))
    } else {
        match &spec.database {
            Some(db_spec) => {
                let manager = modkit_db::DbManager::connect(&db_spec.url)
                    .await
                    .map_err(BootstrapError::ConfigInvalid)?;
                DbOptions::Manager(Arc::new(manager))
            }
            None => DbOptions::None,
        }
    };

    let http = match &spec.http {
        Some(http_spec) => HttpOptions::Bind(http_spec.bind),
        None => HttpOptions::Disabled,
    };

    let modules_cfg: Arc<dyn ConfigProvider> = Arc::new(spec);

    run(RunOptions {
        modules_cfg,
        db,
        http,
        shutdown: ShutdownOptions::Signals,
    })
    .await
    .map_err(classify_runtime_failure)
}

/// A failure during build, DB migration, init, or REST/start phases means
/// the engine never reached a running state; classify it as a start
/// failure (exit code 2) rather than a generic runtime error (exit code 3).
fn classify_runtime_failure(source: anyhow::Error) -> BootstrapError {
    let is_start_phase_failure = source
        .downcast_ref::<RegistryError>()
        .is_some_and(|err| {
            matches!(
                err,
                RegistryError::DuplicateModule(_)
                    | RegistryError::UnknownModuleType { .. }
                    | RegistryError::UnknownDependency { .. }
                    | RegistryError::DependencyCycle(_)
                    | RegistryError::DbMigrate { .. }
                    | RegistryError::Init { .. }
                    | RegistryError::RestRegister { .. }
                    | RegistryError::Start { .. }
            )
        });
    if is_start_phase_failure {
        BootstrapError::StartFailure(source)
    } else {
        BootstrapError::RuntimeError(source)
    }
}
