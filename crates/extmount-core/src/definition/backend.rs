//! Backend definitions: what a backend needs, who may use it, and how it is
//! constructed.

use super::auth::{mechanism, scheme};
use super::capability::{
    DEFAULT_PRIORITY, DependencyCheck, Frontend, Identifier, MissingDependency, Permissions,
    UserType, Visibility,
};
use super::parameter::DefinitionParameter;
use crate::config::BackendOptions;
use crate::storage::{Storage, StorageResult};
use serde_json::{Value, json};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Runtime context handed to a backend factory.
#[derive(Debug, Clone)]
pub struct StorageContext {
    /// User the storage is constructed for, if any
    pub user: Option<String>,
    /// Root of per-user data (host key stores and similar state live here)
    pub data_dir: PathBuf,
    /// Upper bound for network operations
    pub timeout: Duration,
}

impl StorageContext {
    /// Context without an acting user
    pub fn new(data_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            user: None,
            data_dir: data_dir.into(),
            timeout,
        }
    }

    /// Same context for `user`
    #[must_use]
    pub fn for_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }
}

/// Builds a storage from decrypted, substituted options.
pub type StorageFactory =
    Arc<dyn Fn(&BackendOptions, &StorageContext) -> StorageResult<Arc<dyn Storage>> + Send + Sync>;

/// A registered backend.
#[derive(Clone)]
pub struct BackendDefinition {
    identifier: Identifier,
    frontend: Frontend,
    auth_schemes: Vec<String>,
    legacy_auth_mechanism: String,
    visibility: Visibility,
    permissions: Permissions,
    priority: i32,
    dependency_check: Option<DependencyCheck>,
    factory: StorageFactory,
}

impl fmt::Debug for BackendDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendDefinition")
            .field("identifier", &self.identifier)
            .field("text", &self.frontend.text())
            .field("auth_schemes", &self.auth_schemes)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

impl BackendDefinition {
    /// New definition accepting the built-in scheme only
    pub fn new<F>(id: &str, text: &str, factory: F) -> Self
    where
        F: Fn(&BackendOptions, &StorageContext) -> StorageResult<Arc<dyn Storage>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            identifier: Identifier::new(id),
            frontend: Frontend::new(text),
            auth_schemes: vec![scheme::BUILTIN.to_string()],
            legacy_auth_mechanism: mechanism::BUILTIN.to_string(),
            visibility: Visibility::default(),
            permissions: Permissions::default(),
            priority: DEFAULT_PRIORITY,
            dependency_check: None,
            factory: Arc::new(factory),
        }
    }

    /// Add an alias
    #[must_use]
    pub fn with_alias(mut self, alias: &str) -> Self {
        self.identifier.add_alias(alias);
        self
    }

    /// Add a parameter
    #[must_use]
    pub fn with_parameter(mut self, parameter: DefinitionParameter) -> Self {
        self.frontend.add_parameter(parameter);
        self
    }

    /// Replace the accepted auth schemes
    #[must_use]
    pub fn with_auth_schemes(mut self, schemes: &[&str]) -> Self {
        self.auth_schemes = schemes.iter().map(ToString::to_string).collect();
        self
    }

    /// Mechanism assumed for configurations that name none
    #[must_use]
    pub fn with_legacy_auth_mechanism(mut self, id: &str) -> Self {
        self.legacy_auth_mechanism = id.to_string();
        self
    }

    /// Change the priority
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Restrict allowed visibility, intersecting the current one
    #[must_use]
    pub fn with_allowed_visibility(mut self, bits: u32) -> Self {
        self.visibility.set_allowed(bits);
        self
    }

    /// Restrict allowed permissions for a user type
    #[must_use]
    pub fn with_allowed_permissions(mut self, user_type: UserType, bits: u32) -> Self {
        self.permissions.set_allowed(user_type, bits);
        self
    }

    /// Attach a dependency check
    #[must_use]
    pub fn with_dependency_check<F>(mut self, check: F) -> Self
    where
        F: Fn() -> Vec<MissingDependency> + Send + Sync + 'static,
    {
        self.dependency_check = Some(Arc::new(check));
        self
    }

    /// Canonical identifier
    pub fn id(&self) -> &str {
        self.identifier.id()
    }

    /// Identifier with aliases
    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    /// Display name
    pub fn text(&self) -> &str {
        self.frontend.text()
    }

    /// Display text and parameters
    pub fn frontend(&self) -> &Frontend {
        &self.frontend
    }

    /// Accepted auth schemes
    pub fn auth_schemes(&self) -> &[String] {
        &self.auth_schemes
    }

    /// Whether mechanisms of `scheme` may be combined with this backend
    pub fn supports_scheme(&self, scheme: &str) -> bool {
        self.auth_schemes.iter().any(|s| s == scheme)
    }

    /// Mechanism assumed for configurations that name none
    pub fn legacy_auth_mechanism(&self) -> &str {
        &self.legacy_auth_mechanism
    }

    /// Visibility
    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    /// Mutable visibility, for administrators narrowing it at runtime
    pub fn visibility_mut(&mut self) -> &mut Visibility {
        &mut self.visibility
    }

    /// Permissions
    pub fn permissions(&self) -> &Permissions {
        &self.permissions
    }

    /// Mutable permissions
    pub fn permissions_mut(&mut self) -> &mut Permissions {
        &mut self.permissions
    }

    /// Priority among overlapping mounts
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Missing system dependencies; empty when usable
    pub fn check_dependencies(&self) -> Vec<MissingDependency> {
        self.dependency_check
            .as_ref()
            .map(|check| check())
            .unwrap_or_default()
    }

    /// Validate options against the declared parameters.
    ///
    /// Returns the name of the first parameter that rejects its value.
    pub fn validate_options(&self, options: &BackendOptions) -> Result<(), String> {
        for parameter in self.frontend.parameters() {
            if !parameter.validate_value(options.get(parameter.name())) {
                return Err(parameter.name().to_string());
            }
        }
        Ok(())
    }

    /// Construct a live storage
    pub fn instantiate(
        &self,
        options: &BackendOptions,
        context: &StorageContext,
    ) -> StorageResult<Arc<dyn Storage>> {
        (self.factory)(options, context)
    }

    /// Structured JSON form
    pub fn to_json(&self) -> Value {
        json!({
            "name": self.text(),
            "identifier": self.id(),
            "identifierAliases": self.identifier.aliases(),
            "configuration": self.frontend.parameters(),
            "authSchemes": self.auth_schemes,
            "priority": self.priority,
            "visibility": self.visibility.bits(),
        })
    }

    /// Legacy prefixed form: `{backend, configuration: {key: label}, priority}`
    pub fn to_legacy_json(&self) -> Value {
        json!({
            "backend": self.text(),
            "configuration": self.frontend.legacy_configuration(),
            "priority": self.priority,
        })
    }
}
