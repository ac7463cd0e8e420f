//! Registry of backends and authentication mechanisms.
//!
//! Configuration refers to backends by identifier or legacy alias. Lookups
//! resolve both; registration rejects an identifier or alias that is already
//! taken so that resolution stays unambiguous.

use crate::config::{BackendOptions, ConfigError};
use crate::definition::auth::builtin_mechanisms;
use crate::definition::capability::{dependency_message, visibility};
use crate::definition::{
    AuthMechanism, BackendDefinition, DefinitionParameter, MissingDependency, UserType,
};
use crate::storage::{LocalStorage, Storage, StorageError};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Identifier of the local filesystem backend
pub const LOCAL_BACKEND: &str = "local";
/// Priority of the local backend
pub const LOCAL_PRIORITY: i32 = 150;

/// Backend and auth mechanism catalog.
#[derive(Debug, Default, Clone)]
pub struct BackendRegistry {
    backends: Vec<BackendDefinition>,
    mechanisms: Vec<AuthMechanism>,
}

impl BackendRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the local backend and all built-in auth mechanisms
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        for mechanism in builtin_mechanisms() {
            // Built-in identifiers are distinct.
            let _ = registry.register_auth_mechanism(mechanism);
        }
        let _ = registry.register_backend(local_backend());
        registry
    }

    fn ids_taken<'a>(&self, mut ids: impl Iterator<Item = &'a str>) -> Option<String> {
        ids.find(|id| self.backends.iter().any(|b| b.identifier().matches(id)))
            .map(ToString::to_string)
    }

    /// Register a backend
    pub fn register_backend(&mut self, backend: BackendDefinition) -> Result<(), ConfigError> {
        if let Some(taken) = self.ids_taken(backend.identifier().all()) {
            return Err(ConfigError::DuplicateIdentifier(taken));
        }
        debug!(backend = backend.id(), "Registered backend");
        self.backends.push(backend);
        Ok(())
    }

    /// Register an auth mechanism
    pub fn register_auth_mechanism(&mut self, mechanism: AuthMechanism) -> Result<(), ConfigError> {
        if let Some(taken) = mechanism
            .identifier()
            .all()
            .find(|id| self.mechanisms.iter().any(|m| m.identifier().matches(id)))
        {
            return Err(ConfigError::DuplicateIdentifier(taken.to_string()));
        }
        self.mechanisms.push(mechanism);
        Ok(())
    }

    /// All backends in registration order
    pub fn backends(&self) -> &[BackendDefinition] {
        &self.backends
    }

    /// Backend by identifier or alias
    pub fn get_backend(&self, id: &str) -> Option<&BackendDefinition> {
        self.backends.iter().find(|b| b.identifier().matches(id))
    }

    /// Mutable backend by identifier or alias
    pub fn get_backend_mut(&mut self, id: &str) -> Option<&mut BackendDefinition> {
        self.backends.iter_mut().find(|b| b.identifier().matches(id))
    }

    /// Backends whose dependencies are satisfied
    pub fn available_backends(&self) -> Vec<&BackendDefinition> {
        self.backends
            .iter()
            .filter(|b| b.check_dependencies().is_empty())
            .collect()
    }

    /// Available backends visible to a user type
    pub fn backends_visible_for(&self, user_type: UserType) -> Vec<&BackendDefinition> {
        self.available_backends()
            .into_iter()
            .filter(|b| b.visibility().is_visible_for(user_type.visibility_bit()))
            .collect()
    }

    /// Whether `id` may be used for a user type's mounts
    pub fn is_visible_for(&self, id: &str, user_type: UserType) -> bool {
        self.get_backend(id)
            .is_some_and(|b| b.visibility().is_visible_for(user_type.visibility_bit()))
    }

    /// All auth mechanisms
    pub fn auth_mechanisms(&self) -> &[AuthMechanism] {
        &self.mechanisms
    }

    /// Auth mechanism by identifier or alias
    pub fn get_auth_mechanism(&self, id: &str) -> Option<&AuthMechanism> {
        self.mechanisms.iter().find(|m| m.identifier().matches(id))
    }

    /// Auth mechanisms of a scheme
    pub fn auth_mechanisms_by_scheme(&self, scheme: &str) -> Vec<&AuthMechanism> {
        self.mechanisms
            .iter()
            .filter(|m| m.scheme() == scheme)
            .collect()
    }

    /// Mechanism a mount uses: the explicit one, or the backend's legacy one.
    pub fn resolve_auth_mechanism(
        &self,
        backend: &BackendDefinition,
        explicit: Option<&str>,
    ) -> Result<&AuthMechanism, ConfigError> {
        let id = explicit.unwrap_or(backend.legacy_auth_mechanism());
        let mechanism = self
            .get_auth_mechanism(id)
            .ok_or_else(|| ConfigError::UnknownAuthMechanism(id.to_string()))?;
        if !backend.supports_scheme(mechanism.scheme()) {
            return Err(ConfigError::IncompatibleAuthMechanism {
                backend: backend.id().to_string(),
                mechanism: mechanism.id().to_string(),
            });
        }
        Ok(mechanism)
    }

    /// Remediation messages for backends whose dependencies are missing,
    /// grouped by missing module.
    pub fn dependency_messages(&self) -> Vec<String> {
        let mut by_dependency: BTreeMap<String, Vec<&str>> = BTreeMap::new();
        for backend in &self.backends {
            for missing in backend.check_dependencies() {
                by_dependency
                    .entry(missing.dependency)
                    .or_default()
                    .push(backend.text());
            }
        }
        by_dependency
            .iter()
            .map(|(dependency, backends)| dependency_message(dependency, backends))
            .collect()
    }

    /// Missing dependencies of one backend
    pub fn missing_dependencies(&self, id: &str) -> Vec<MissingDependency> {
        self.get_backend(id)
            .map(BackendDefinition::check_dependencies)
            .unwrap_or_default()
    }

    /// Legacy `{id: {backend, configuration, priority}}` listing of
    /// available backends
    pub fn legacy_json(&self) -> Value {
        let map: Map<String, Value> = self
            .available_backends()
            .into_iter()
            .map(|b| (b.id().to_string(), b.to_legacy_json()))
            .collect();
        Value::Object(map)
    }

    /// Structured `{backends: {...}, authMechanisms: {...}}` listing
    pub fn structured_json(&self) -> Value {
        let backends: Map<String, Value> = self
            .available_backends()
            .into_iter()
            .map(|b| (b.id().to_string(), b.to_json()))
            .collect();
        let mechanisms: Map<String, Value> = self
            .mechanisms
            .iter()
            .map(|m| (m.id().to_string(), m.to_json()))
            .collect();
        serde_json::json!({ "backends": backends, "authMechanisms": mechanisms })
    }
}

/// Definition of the local filesystem backend. Administrators only.
pub fn local_backend() -> BackendDefinition {
    BackendDefinition::new(LOCAL_BACKEND, "Local", |options: &BackendOptions, _| {
        let datadir = options
            .get("datadir")
            .and_then(Value::as_str)
            .filter(|dir| !dir.is_empty())
            .ok_or_else(|| StorageError::InvalidConfig("datadir is required".into()))?;
        Ok(Arc::new(LocalStorage::new(datadir)) as Arc<dyn Storage>)
    })
    .with_alias("\\OC\\Files\\Storage\\Local")
    .with_parameter(DefinitionParameter::new("datadir", "Location"))
    .with_auth_schemes(&[crate::definition::auth::scheme::NULL])
    .with_legacy_auth_mechanism(crate::definition::auth::mechanism::NULL)
    .with_allowed_visibility(visibility::ADMIN)
    .with_priority(LOCAL_PRIORITY)
}
