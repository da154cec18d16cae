//! Capability registry (spec §4.A): plugins register named contracts, bind
//! modules to them with a role and priority, and the engine later asks
//! "who provides X" without caring which plugin backed the answer.
//!
//! Build-phase only: registration and binding happen while the module
//! graph is being assembled, and lookups afterward are read-mostly, so a
//! single `parking_lot::RwLock` over a `HashMap` is plenty — no need for a
//! lock-free structure here.
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// A named, versionless capability a module can provide or depend on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityContract {
    pub name: String,
    pub description: Option<String>,
}

impl CapabilityContract {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), description: None }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// One module's binding to a contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    pub module_name: String,
    pub role: String,
    pub priority: i32,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("capability contract '{0}' is not registered")]
    UnknownContract(String),
    #[error("capability contract '{0}' is already registered with a different definition")]
    DuplicateContract(String),
    #[error("capability '{name}' requires at least {required} provider(s), found {found}")]
    UnmetRequirement { name: String, required: usize, found: usize },
}

struct ContractEntry {
    contract: CapabilityContract,
    bindings: Vec<Binding>,
}

/// Registry of capability contracts and the modules bound to them.
#[derive(Default)]
pub struct CapabilityRegistry {
    contracts: RwLock<HashMap<String, ContractEntry>>,
}

impl CapabilityRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a contract. Re-registering the same name with an identical
    /// definition is a no-op; re-registering with a different definition is
    /// an error.
    ///
    /// # Errors
    /// `CapabilityError::DuplicateContract` if `name` is already registered
    /// with a different `CapabilityContract`.
    pub fn register(&self, contract: CapabilityContract) -> Result<(), CapabilityError> {
        let mut contracts = self.contracts.write();
        match contracts.get(&contract.name) {
            Some(existing) if existing.contract == contract => Ok(()),
            Some(_) => Err(CapabilityError::DuplicateContract(contract.name)),
            None => {
                let name = contract.name.clone();
                contracts.insert(name, ContractEntry { contract, bindings: Vec::new() });
                Ok(())
            }
        }
    }

    /// Bind `module_name` to `contract_name` under `role` with `priority`
    /// (higher priority is preferred by [`Self::providers`]).
    ///
    /// # Errors
    /// `CapabilityError::UnknownContract` if `contract_name` was never
    /// registered.
    pub fn bind(
        &self,
        contract_name: &str,
        module_name: impl Into<String>,
        role: impl Into<String>,
        priority: i32,
    ) -> Result<(), CapabilityError> {
        let mut contracts = self.contracts.write();
        let entry = contracts
            .get_mut(contract_name)
            .ok_or_else(|| CapabilityError::UnknownContract(contract_name.to_owned()))?;
        entry.bindings.push(Binding { module_name: module_name.into(), role: role.into(), priority });
        Ok(())
    }

    /// Bindings for `contract_name`, ordered by descending priority (ties
    /// keep their binding order).
    #[must_use]
    pub fn providers(&self, contract_name: &str) -> Vec<Binding> {
        let contracts = self.contracts.read();
        let Some(entry) = contracts.get(contract_name) else {
            return Vec::new();
        };
        let mut bindings = entry.bindings.clone();
        bindings.sort_by(|a, b| b.priority.cmp(&a.priority));
        bindings
    }

    /// Require at least `min` providers for `contract_name`.
    ///
    /// # Errors
    /// `CapabilityError::UnmetRequirement` if fewer than `min` bindings
    /// exist (this also covers an unregistered contract name, which has
    /// zero providers).
    pub fn require(&self, contract_name: &str, min: usize) -> Result<(), CapabilityError> {
        let found = self.providers(contract_name).len();
        if found < min {
            return Err(CapabilityError::UnmetRequirement {
                name: contract_name.to_owned(),
                required: min,
                found,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_to_unregistered_contract_fails() {
        let registry = CapabilityRegistry::new();
        let err = registry.bind("auth", "http.server", "primary", 0).unwrap_err();
        assert_eq!(err, CapabilityError::UnknownContract("auth".to_owned()));
    }

    #[test]
    fn re_registering_a_different_contract_fails() {
        let registry = CapabilityRegistry::new();
        registry.register(CapabilityContract::new("auth")).unwrap();
        let err = registry
            .register(CapabilityContract::new("auth").with_description("different"))
            .unwrap_err();
        assert_eq!(err, CapabilityError::DuplicateContract("auth".to_owned()));
    }

    #[test]
    fn re_registering_the_same_contract_is_a_no_op() {
        let registry = CapabilityRegistry::new();
        registry.register(CapabilityContract::new("auth")).unwrap();
        registry.register(CapabilityContract::new("auth")).unwrap();
    }

    #[test]
    fn providers_are_ordered_by_descending_priority() {
        let registry = CapabilityRegistry::new();
        registry.register(CapabilityContract::new("auth")).unwrap();
        registry.bind("auth", "low", "secondary", 1).unwrap();
        registry.bind("auth", "high", "primary", 10).unwrap();
        registry.bind("auth", "mid", "secondary", 5).unwrap();

        let providers = registry.providers("auth");
        let names: Vec<_> = providers.iter().map(|b| b.module_name.as_str()).collect();
        assert_eq!(names, vec!["high", "mid", "low"]);
    }

    #[test]
    fn require_fails_when_not_enough_providers_are_bound() {
        let registry = CapabilityRegistry::new();
        registry.register(CapabilityContract::new("auth")).unwrap();
        registry.bind("auth", "only", "primary", 0).unwrap();

        assert!(registry.require("auth", 1).is_ok());
        let err = registry.require("auth", 2).unwrap_err();
        assert_eq!(
            err,
            CapabilityError::UnmetRequirement { name: "auth".to_owned(), required: 2, found: 1 }
        );
    }
}
