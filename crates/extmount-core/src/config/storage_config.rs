//! In-memory representation of one configured mount.

use super::{BackendOptions, MountOptions};
use crate::storage::normalize_path;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Last known connectivity result of a mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum StorageStatus {
    /// `test()` succeeded
    Success,
    /// Construction or `test()` failed
    Error,
    /// Not enough context to test (for example no session credentials yet)
    Indeterminate,
}

impl StorageStatus {
    /// Lowercase name used in CLI output
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "ok",
            Self::Error => "error",
            Self::Indeterminate => "indeterminate",
        }
    }
}

impl fmt::Display for StorageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<StorageStatus> for u8 {
    fn from(status: StorageStatus) -> Self {
        match status {
            StorageStatus::Success => 0,
            StorageStatus::Error => 1,
            StorageStatus::Indeterminate => 2,
        }
    }
}

impl TryFrom<u8> for StorageStatus {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, String> {
        match value {
            0 => Ok(Self::Success),
            1 => Ok(Self::Error),
            2 => Ok(Self::Indeterminate),
            other => Err(format!("unknown storage status {other}")),
        }
    }
}

/// One configured mount, as shown to settings UIs and the CLI.
///
/// Serializes to the compact wire form: `id`, `priority` and `status` are
/// omitted when unset, applicable lists and mount options when empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    /// Numeric id, `None` until saved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,

    /// Mount point relative to the user's file root, always starting with `/`
    pub mount_point: String,

    /// Backend identifier
    pub backend_class: String,

    /// Authentication mechanism identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_mechanism: Option<String>,

    /// Backend connection parameters
    #[serde(default)]
    pub backend_options: BackendOptions,

    /// Users the mount applies to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub applicable_users: Vec<String>,

    /// Groups the mount applies to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub applicable_groups: Vec<String>,

    /// Priority among overlapping mounts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,

    /// Behavioural flags independent of the backend
    #[serde(default, skip_serializing_if = "MountOptions::is_empty")]
    pub mount_options: MountOptions,

    /// Last connectivity result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<StorageStatus>,
}

impl StorageConfig {
    /// New unsaved config for `backend_class` at `mount_point`
    pub fn new(mount_point: &str, backend_class: impl Into<String>) -> Self {
        Self {
            id: None,
            mount_point: normalize_mount_point(mount_point),
            backend_class: backend_class.into(),
            auth_mechanism: None,
            backend_options: BackendOptions::new(),
            applicable_users: Vec::new(),
            applicable_groups: Vec::new(),
            priority: None,
            mount_options: MountOptions::default(),
            status: None,
        }
    }

    /// Replace the mount point, normalizing it
    pub fn set_mount_point(&mut self, mount_point: &str) {
        self.mount_point = normalize_mount_point(mount_point);
    }

    /// Builder-style option setter
    #[must_use]
    pub fn with_option(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.backend_options.insert(key.to_string(), value.into());
        self
    }

    /// Whether the mount applies to everyone
    pub fn is_global(&self) -> bool {
        self.applicable_users.is_empty() && self.applicable_groups.is_empty()
    }

    /// Content hash used to coalesce identical mounts across scopes
    pub fn config_hash(&self) -> String {
        make_config_hash(
            &self.backend_class,
            &self.mount_point,
            &self.backend_options,
            self.priority,
            &self.mount_options,
        )
    }
}

#[derive(Serialize)]
struct HashInput<'a> {
    c: &'a str,
    m: &'a str,
    o: &'a BackendOptions,
    p: i32,
    mo: &'a MountOptions,
}

/// Hash of a mount's identity: backend, mount point, options, priority and
/// mount options. Applicable users and groups are not part of it.
pub fn make_config_hash(
    class: &str,
    mount_point: &str,
    options: &BackendOptions,
    priority: Option<i32>,
    mount_options: &MountOptions,
) -> String {
    let input = HashInput {
        c: class,
        m: mount_point,
        o: options,
        p: priority.unwrap_or(-1),
        mo: mount_options,
    };
    // Maps are BTreeMap-backed, so the serialization is canonical.
    let bytes = serde_json::to_vec(&input).unwrap_or_default();
    hex::encode(Sha256::digest(&bytes))
}

/// `/` followed by the normalized relative path.
pub fn normalize_mount_point(mount_point: &str) -> String {
    format!("/{}", normalize_path(mount_point))
}
