//! Configuration data: mount records, system settings and user directory.

mod error;
pub mod storage_config;
pub mod system;
pub mod users;

pub use error::ConfigError;
pub use storage_config::{StorageConfig, StorageStatus, make_config_hash, normalize_mount_point};
pub use system::SystemConfig;
pub use users::{StaticUserDirectory, UserDirectory};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Backend connection parameters (string keys, scalar or array values).
pub type BackendOptions = BTreeMap<String, Value>;

/// Known mount option keys.
pub mod mount_option {
    /// Mount may only be read
    pub const READ_ONLY: &str = "read_only";
    /// Server-side encryption applies to the mount
    pub const ENCRYPT: &str = "encrypt";
    /// Previews are generated for files on the mount
    pub const PREVIEWS: &str = "previews";
    /// How often the remote is checked for changes (0 never, 1 once per request)
    pub const FILESYSTEM_CHECK_CHANGES: &str = "filesystem_check_changes";
    /// Files on the mount may be shared
    pub const ENABLE_SHARING: &str = "enable_sharing";
}

/// Behavioural flags attached to a mount, independent of the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MountOptions(BTreeMap<String, Value>);

impl MountOptions {
    /// Whether no option is set
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Raw value of an option
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Set an option
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    /// Iterate over all options
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        self.0.get(key).map_or(default, is_truthy)
    }

    /// `read_only`, default false
    pub fn read_only(&self) -> bool {
        self.flag(mount_option::READ_ONLY, false)
    }

    /// `encrypt`, default true
    pub fn encrypt(&self) -> bool {
        self.flag(mount_option::ENCRYPT, true)
    }

    /// `previews`, default true
    pub fn previews(&self) -> bool {
        self.flag(mount_option::PREVIEWS, true)
    }

    /// `enable_sharing`, default false
    pub fn enable_sharing(&self) -> bool {
        self.flag(mount_option::ENABLE_SHARING, false)
    }

    /// `filesystem_check_changes`, default 1
    pub fn filesystem_check_changes(&self) -> i64 {
        match self.0.get(mount_option::FILESYSTEM_CHECK_CHANGES) {
            Some(Value::Number(n)) => n.as_i64().unwrap_or(1),
            Some(Value::String(s)) => s.parse().unwrap_or(1),
            Some(Value::Bool(b)) => i64::from(*b),
            _ => 1,
        }
    }
}

impl FromIterator<(String, Value)> for MountOptions {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Loose truthiness for flags that may arrive as bools, numbers or strings.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !matches!(s.as_str(), "" | "0" | "false"),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Null => false,
    }
}
