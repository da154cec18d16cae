//! Schema registry (spec §4.B): module-type config schemas, and
//! specification-wide validation before anything is built.
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

use std::collections::{HashMap, HashSet, VecDeque};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// One entry of the `modules` section of a specification document.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModuleEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(rename = "dependsOn", default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub config: serde_json::Value,
}

/// Minimal view of a specification document needed for validation: module
/// entries plus the raw `workflows`/`triggers` sections.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct SpecForValidation {
    #[serde(default)]
    pub modules: Vec<ModuleEntry>,
    #[serde(default)]
    pub workflows: serde_json::Value,
    #[serde(default)]
    pub triggers: serde_json::Value,
}

/// Options that relax individual validation rules.
#[derive(Debug, Clone, Default)]
pub struct ValidateOptions {
    pub allow_empty_modules: bool,
    pub skip_workflow_type_check: bool,
    pub skip_trigger_type_check: bool,
    pub extra_module_types: HashSet<String>,
}

/// One validation failure. `module` is `None` for document-wide issues
/// (e.g. a dependency cycle spanning several modules).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub module: Option<String>,
    pub message: String,
}

impl ValidationIssue {
    fn global(message: impl Into<String>) -> Self {
        Self { module: None, message: message.into() }
    }

    fn on(module: impl Into<String>, message: impl Into<String>) -> Self {
        Self { module: Some(module.into()), message: message.into() }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("module type '{0}' is already registered")]
    DuplicateModuleType(String),
    #[error("schema for module type '{module_type}' is not a valid JSON Schema: {source}")]
    InvalidSchema {
        module_type: String,
        #[source]
        source: Box<jsonschema::ValidationError<'static>>,
    },
}

/// Registry of module-type config schemas, and the entry point for
/// whole-specification validation.
#[derive(Default)]
pub struct SchemaRegistry {
    schemas: DashMap<String, jsonschema::Validator>,
}

impl SchemaRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the JSON Schema that a module type's `config` section must
    /// satisfy.
    ///
    /// # Errors
    /// `SchemaError::DuplicateModuleType` if `module_type` is already
    /// registered; `SchemaError::InvalidSchema` if `schema` does not parse
    /// as a JSON Schema document.
    pub fn register_module_type(
        &self,
        module_type: impl Into<String>,
        schema: &serde_json::Value,
    ) -> Result<(), SchemaError> {
        let module_type = module_type.into();
        if self.schemas.contains_key(&module_type) {
            return Err(SchemaError::DuplicateModuleType(module_type));
        }
        let validator = jsonschema::validator_for(schema).map_err(|source| SchemaError::InvalidSchema {
            module_type: module_type.clone(),
            source: Box::new(source.to_owned()),
        })?;
        self.schemas.insert(module_type, validator);
        Ok(())
    }

    /// Module types with a registered config schema, sorted for
    /// deterministic output.
    #[must_use]
    pub fn known_module_types(&self) -> Vec<String> {
        let mut names: Vec<String> = self.schemas.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Validate a whole specification document: unique module names, known
    /// module types, resolvable dependencies, no dependency cycles, and
    /// config conforming to each module type's schema.
    #[must_use]
    pub fn validate_spec(&self, spec: &SpecForValidation, options: &ValidateOptions) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if spec.modules.is_empty() && !options.allow_empty_modules {
            issues.push(ValidationIssue::global(
                "specification declares no modules (set allow_empty_modules to permit this)",
            ));
        }

        let mut seen_names: HashSet<&str> = HashSet::new();
        for module in &spec.modules {
            if !seen_names.insert(module.name.as_str()) {
                issues.push(ValidationIssue::on(&module.name, "duplicate module name"));
            }
        }

        let known_names: HashSet<&str> = spec.modules.iter().map(|m| m.name.as_str()).collect();
        for module in &spec.modules {
            if !self.schemas.contains_key(&module.type_name) && !options.extra_module_types.contains(&module.type_name)
            {
                issues.push(ValidationIssue::on(
                    &module.name,
                    format!("module type '{}' is not registered", module.type_name),
                ));
            }

            for dep in &module.depends_on {
                if !known_names.contains(dep.as_str()) {
                    issues.push(ValidationIssue::on(
                        &module.name,
                        format!("dependsOn refers to undefined module '{dep}'"),
                    ));
                }
            }

            if let Some(validator) = self.schemas.get(&module.type_name) {
                for error in validator.iter_errors(&module.config) {
                    issues.push(ValidationIssue::on(&module.name, error.to_string()));
                }
            }
        }

        if let Some(cycle) = detect_cycle(&spec.modules) {
            issues.push(ValidationIssue::global(format!("dependency cycle detected among modules: {cycle:?}")));
        }

        if !options.skip_workflow_type_check {
            issues.extend(check_typed_entries(&spec.workflows, "workflows"));
        }
        if !options.skip_trigger_type_check {
            issues.extend(check_typed_entries(&spec.triggers, "triggers"));
        }

        issues
    }
}

fn check_typed_entries(value: &serde_json::Value, section: &str) -> Vec<ValidationIssue> {
    let Some(entries) = value.as_array() else {
        return Vec::new();
    };
    entries
        .iter()
        .enumerate()
        .filter(|(_, entry)| entry.get("type").and_then(serde_json::Value::as_str).is_none_or(str::is_empty))
        .map(|(index, _)| ValidationIssue::global(format!("{section}[{index}] is missing a non-empty 'type' field")))
        .collect()
}

fn detect_cycle(modules: &[ModuleEntry]) -> Option<Vec<String>> {
    let index: HashMap<&str, usize> = modules.iter().enumerate().map(|(i, m)| (m.name.as_str(), i)).collect();
    let mut indegree = vec![0usize; modules.len()];
    let mut adjacency = vec![Vec::<usize>::new(); modules.len()];

    for (u, module) in modules.iter().enumerate() {
        for dep in &module.depends_on {
            let Some(&v) = index.get(dep.as_str()) else { continue };
            adjacency[v].push(u);
            indegree[u] += 1;
        }
    }

    let mut queue: VecDeque<usize> = (0..modules.len()).filter(|&i| indegree[i] == 0).collect();
    let mut visited = 0;
    while let Some(u) = queue.pop_front() {
        visited += 1;
        for &w in &adjacency[u] {
            indegree[w] -= 1;
            if indegree[w] == 0 {
                queue.push_back(w);
            }
        }
    }

    if visited == modules.len() {
        None
    } else {
        let cyclic = (0..modules.len())
            .filter(|&i| indegree[i] > 0)
            .map(|i| modules[i].name.clone())
            .collect();
        Some(cyclic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(name: &str, type_name: &str, depends_on: &[&str]) -> ModuleEntry {
        ModuleEntry {
            name: name.to_owned(),
            type_name: type_name.to_owned(),
            depends_on: depends_on.iter().map(|s| (*s).to_owned()).collect(),
            config: json!({}),
        }
    }

    #[test]
    fn duplicate_module_names_are_reported() {
        let registry = SchemaRegistry::new();
        let spec = SpecForValidation {
            modules: vec![entry("a", "http.server", &[]), entry("a", "http.server", &[])],
            ..Default::default()
        };
        let issues = registry.validate_spec(&spec, &ValidateOptions { extra_module_types: ["http.server".into()].into(), ..Default::default() });
        assert!(issues.iter().any(|i| i.message.contains("duplicate module name")));
    }

    #[test]
    fn unknown_dependency_is_reported() {
        let registry = SchemaRegistry::new();
        let spec = SpecForValidation {
            modules: vec![entry("a", "t", &["missing"])],
            ..Default::default()
        };
        let options = ValidateOptions { extra_module_types: ["t".into()].into(), ..Default::default() };
        let issues = registry.validate_spec(&spec, &options);
        assert!(issues.iter().any(|i| i.message.contains("undefined module 'missing'")));
    }

    #[test]
    fn dependency_cycle_is_reported() {
        let registry = SchemaRegistry::new();
        let spec = SpecForValidation {
            modules: vec![entry("a", "t", &["b"]), entry("b", "t", &["a"])],
            ..Default::default()
        };
        let options = ValidateOptions { extra_module_types: ["t".into()].into(), ..Default::default() };
        let issues = registry.validate_spec(&spec, &options);
        assert!(issues.iter().any(|i| i.message.contains("dependency cycle")));
    }

    #[test]
    fn config_is_validated_against_registered_schema() {
        let registry = SchemaRegistry::new();
        registry
            .register_module_type(
                "http.server",
                &json!({
                    "type": "object",
                    "required": ["port"],
                    "properties": { "port": { "type": "integer" } }
                }),
            )
            .unwrap();

        let mut module = entry("web", "http.server", &[]);
        module.config = json!({});
        let spec = SpecForValidation { modules: vec![module], ..Default::default() };

        let issues = registry.validate_spec(&spec, &ValidateOptions::default());
        assert!(issues.iter().any(|i| i.module.as_deref() == Some("web")));
    }

    #[test]
    fn empty_modules_requires_explicit_opt_in() {
        let registry = SchemaRegistry::new();
        let spec = SpecForValidation::default();
        assert!(!registry.validate_spec(&spec, &ValidateOptions::default()).is_empty());

        let options = ValidateOptions { allow_empty_modules: true, ..Default::default() };
        assert!(registry.validate_spec(&spec, &options).is_empty());
    }
}
