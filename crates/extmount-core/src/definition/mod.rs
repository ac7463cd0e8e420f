//! Backend and authentication mechanism definitions.

pub mod auth;
pub mod backend;
pub mod capability;
pub mod parameter;

pub use auth::{AuthBehavior, AuthMechanism, SessionCredentials, builtin_mechanisms};
pub use backend::{BackendDefinition, StorageContext, StorageFactory};
pub use capability::{
    DEFAULT_PRIORITY, DependencyCheck, Frontend, Identifier, MissingDependency, Permissions,
    UserType, Visibility,
};
pub use parameter::{DefinitionParameter, ParameterType};
