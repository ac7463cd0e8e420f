//! Capability descriptors attached to backend and auth mechanism definitions.
//!
//! Each concern (who may see it, what they may do with it, which identifier
//! names it, what it needs installed) is a small struct; definitions embed
//! the ones they need.

use super::parameter::DefinitionParameter;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Visibility bits.
pub mod visibility {
    /// Nobody
    pub const NONE: u32 = 0;
    /// Users configuring personal mounts
    pub const PERSONAL: u32 = 1;
    /// Administrators configuring system mounts
    pub const ADMIN: u32 = 2;
    /// Everybody
    pub const DEFAULT: u32 = 3;
}

/// Permission bits per user type.
pub mod permission {
    /// No permission
    pub const NONE: u32 = 0;
    /// Create mounts with it
    pub const CREATE: u32 = 1;
    /// See mounts using it
    pub const READ: u32 = 2;
    /// Change mounts using it
    pub const UPDATE: u32 = 4;
    /// Remove mounts using it
    pub const DELETE: u32 = 8;
    /// Everything
    pub const DEFAULT: u32 = 15;
}

/// Default priority of a backend
pub const DEFAULT_PRIORITY: i32 = 100;

/// Kind of user configuring mounts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    /// Regular user managing personal mounts
    Personal,
    /// Administrator managing system mounts
    Admin,
}

impl UserType {
    /// Visibility bit matching this user type
    pub fn visibility_bit(self) -> u32 {
        match self {
            Self::Personal => visibility::PERSONAL,
            Self::Admin => visibility::ADMIN,
        }
    }
}

/// Who may see a definition.
///
/// The current visibility can never exceed the allowed visibility; lowering
/// the allowed bits intersects the current ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Visibility {
    current: u32,
    allowed: u32,
}

impl Default for Visibility {
    fn default() -> Self {
        Self {
            current: visibility::DEFAULT,
            allowed: visibility::DEFAULT,
        }
    }
}

impl Visibility {
    /// Current visibility bits
    pub fn bits(self) -> u32 {
        self.current
    }

    /// Allowed visibility bits
    pub fn allowed(self) -> u32 {
        self.allowed
    }

    /// Whether all bits of `bits` are visible
    pub fn is_visible_for(self, bits: u32) -> bool {
        self.current & bits == bits
    }

    /// Set the visibility, clipped to the allowed bits
    pub fn set(&mut self, bits: u32) {
        self.current = bits & self.allowed;
    }

    /// Add bits, clipped to the allowed bits
    pub fn add(&mut self, bits: u32) {
        self.set(self.current | bits);
    }

    /// Remove bits
    pub fn remove(&mut self, bits: u32) {
        self.current &= !bits;
    }

    /// Change the allowed bits, intersecting the current visibility
    pub fn set_allowed(&mut self, bits: u32) {
        self.allowed = bits;
        self.current &= bits;
    }
}

/// Per-user-type permission bits, bounded by allowed bits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permissions {
    current: BTreeMap<UserType, u32>,
    allowed: BTreeMap<UserType, u32>,
}

impl Default for Permissions {
    fn default() -> Self {
        let all = [
            (UserType::Personal, permission::DEFAULT),
            (UserType::Admin, permission::DEFAULT),
        ];
        Self {
            current: all.into_iter().collect(),
            allowed: all.into_iter().collect(),
        }
    }
}

impl Permissions {
    /// Current permission bits for a user type
    pub fn get(&self, user_type: UserType) -> u32 {
        self.current.get(&user_type).copied().unwrap_or(permission::NONE)
    }

    /// Allowed permission bits for a user type
    pub fn allowed(&self, user_type: UserType) -> u32 {
        self.allowed.get(&user_type).copied().unwrap_or(permission::NONE)
    }

    /// Whether all bits of `bits` are granted to the user type
    pub fn is_permitted(&self, user_type: UserType, bits: u32) -> bool {
        self.get(user_type) & bits == bits
    }

    /// Set the permission bits, clipped to the allowed bits
    pub fn set(&mut self, user_type: UserType, bits: u32) {
        let clipped = bits & self.allowed(user_type);
        self.current.insert(user_type, clipped);
    }

    /// Change the allowed bits, intersecting the current ones
    pub fn set_allowed(&mut self, user_type: UserType, bits: u32) {
        self.allowed.insert(user_type, bits);
        let current = self.get(user_type) & bits;
        self.current.insert(user_type, current);
    }
}

/// Canonical identifier plus accepted aliases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier {
    id: String,
    aliases: Vec<String>,
}

impl Identifier {
    /// Identifier without aliases
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            aliases: Vec::new(),
        }
    }

    /// Add an alias
    pub fn add_alias(&mut self, alias: impl Into<String>) {
        self.aliases.push(alias.into());
    }

    /// Canonical identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Aliases, typically legacy class names
    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    /// Canonical id followed by all aliases
    pub fn all(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.id.as_str()).chain(self.aliases.iter().map(String::as_str))
    }

    /// Whether `name` is the id or one of the aliases
    pub fn matches(&self, name: &str) -> bool {
        self.all().any(|candidate| candidate == name)
    }
}

/// A system dependency that is not installed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingDependency {
    /// Module or executable name
    pub dependency: String,
    /// Extra remediation hint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl MissingDependency {
    /// Missing module without extra hint
    pub fn new(dependency: impl Into<String>) -> Self {
        Self {
            dependency: dependency.into(),
            message: None,
        }
    }

    /// Attach a hint
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl fmt::Display for MissingDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{} ({message})", self.dependency),
            None => f.write_str(&self.dependency),
        }
    }
}

/// Check returning the dependencies that are missing; empty means satisfied.
pub type DependencyCheck = Arc<dyn Fn() -> Vec<MissingDependency> + Send + Sync>;

/// Display text and parameters shown by configuration front ends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frontend {
    text: String,
    parameters: Vec<DefinitionParameter>,
}

impl Frontend {
    /// Frontend with a label and no parameters
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            parameters: Vec::new(),
        }
    }

    /// Display name
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Parameters in display order
    pub fn parameters(&self) -> &[DefinitionParameter] {
        &self.parameters
    }

    /// Append a parameter
    pub fn add_parameter(&mut self, parameter: DefinitionParameter) {
        self.parameters.push(parameter);
    }

    /// Parameter by option key
    pub fn parameter(&self, name: &str) -> Option<&DefinitionParameter> {
        self.parameters.iter().find(|p| p.name() == name)
    }

    /// Legacy `{name: prefixed label}` map
    pub fn legacy_configuration(&self) -> serde_json::Map<String, serde_json::Value> {
        self.parameters
            .iter()
            .map(|p| (p.name().to_string(), serde_json::Value::String(p.legacy_text())))
            .collect()
    }
}

/// Remediation message for a missing dependency.
pub fn dependency_message(dependency: &str, backends: &[&str]) -> String {
    format!(
        "Note: The {dependency} support is not available. Mounting of {} is not possible. \
         Please ask your system administrator to install it.",
        backends.join(", ")
    )
}
