//! System-wide settings.
//!
//! Stored as TOML at `~/.config/extmount/config.toml` (XDG) unless
//! `EXTMOUNT_CONFIG_DIR` points elsewhere.
//!
//! # Example configuration
//!
//! ```toml
//! datadirectory = "/srv/extmount/data"
//! secret = "c2VjcmV0LXNhbHQ="
//! connect_timeout_secs = 10
//! allow_user_mounting = true
//! user_mounting_backends = ["dav", "ftp", "sftp"]
//!
//! [users.alice]
//! groups = ["staff"]
//! ```

use super::error::ConfigError;
use super::users::StaticUserDirectory;
use crate::crypto::CredentialCipher;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the configuration directory
pub const CONFIG_DIR_ENV: &str = "EXTMOUNT_CONFIG_DIR";
/// File name of the system configuration
pub const CONFIG_FILE_NAME: &str = "config.toml";
/// File name of mount tables inside the data directory
pub const MOUNT_FILE_NAME: &str = "mount.json";

const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 5;

/// System-wide settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Root of per-user data; holds the mount tables
    pub datadirectory: PathBuf,

    /// Secret the credential cipher key is derived from
    pub secret: String,

    /// Override for the system mount table location
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mount_file: Option<PathBuf>,

    /// Upper bound for a backend connectivity test
    pub connect_timeout_secs: u64,

    /// Upper bound for waiting on a mount table lock
    pub lock_timeout_secs: u64,

    /// Whether users may create personal mounts
    pub allow_user_mounting: bool,

    /// Backends allowed in personal mounts; empty means every backend that
    /// is visible to personal users
    pub user_mounting_backends: Vec<String>,

    /// Static user directory
    #[serde(skip_serializing_if = "is_empty_directory")]
    pub users: StaticUserDirectory,
}

fn is_empty_directory(dir: &StaticUserDirectory) -> bool {
    *dir == StaticUserDirectory::default()
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            datadirectory: PathBuf::from("data"),
            secret: String::new(),
            mount_file: None,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            lock_timeout_secs: DEFAULT_LOCK_TIMEOUT_SECS,
            allow_user_mounting: true,
            user_mounting_backends: Vec::new(),
            users: StaticUserDirectory::default(),
        }
    }
}

impl SystemConfig {
    /// Fresh configuration with a random secret
    pub fn generate(datadirectory: impl Into<PathBuf>) -> Self {
        let secret: [u8; 30] = rand::random();
        Self {
            datadirectory: datadirectory.into(),
            secret: STANDARD.encode(secret),
            ..Self::default()
        }
    }

    /// Load from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Write to a TOML file, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        crate::mount::store::write_atomic(path, content.as_bytes())
    }

    /// Location of the system mount table
    pub fn mount_file(&self) -> PathBuf {
        self.mount_file
            .clone()
            .unwrap_or_else(|| self.datadirectory.join(MOUNT_FILE_NAME))
    }

    /// Location of a user's personal mount table
    pub fn personal_mount_file(&self, uid: &str) -> PathBuf {
        self.datadirectory.join(uid).join(MOUNT_FILE_NAME)
    }

    /// Connectivity test timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Lock wait timeout
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    /// Whether a backend id is on the personal-mount allow list
    pub fn personal_backend_allowed(&self, backend: &str) -> bool {
        self.allow_user_mounting
            && (self.user_mounting_backends.is_empty()
                || self.user_mounting_backends.iter().any(|b| b == backend))
    }

    /// Credential cipher keyed by the configured secret
    pub fn cipher(&self) -> Result<CredentialCipher, ConfigError> {
        if self.secret.is_empty() {
            return Err(ConfigError::MissingSecret);
        }
        Ok(CredentialCipher::new(&self.secret))
    }
}

/// Directory holding the system configuration.
///
/// `EXTMOUNT_CONFIG_DIR` wins; otherwise the platform config directory.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV) {
        return Ok(PathBuf::from(dir));
    }
    directories::ProjectDirs::from("org", "extmount", "extmount")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .ok_or_else(|| ConfigError::Read {
            path: PathBuf::from("~"),
            source: std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "could not determine home directory",
            ),
        })
}

/// Default path of the system configuration file
pub fn config_path() -> Result<PathBuf, ConfigError> {
    config_dir().map(|dir| dir.join(CONFIG_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UserDirectory;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config: SystemConfig = toml::from_str("secret = \"s\"").unwrap();
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.lock_timeout(), Duration::from_secs(5));
        assert!(config.allow_user_mounting);
        assert_eq!(config.mount_file(), PathBuf::from("data/mount.json"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);
        let mut config = SystemConfig::generate(dir.path().join("data"));
        config.users.insert("alice", &["staff"]);
        config.save(&path).unwrap();

        let loaded = SystemConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert!(loaded.users.in_group("alice", "staff"));
        assert_eq!(
            loaded.personal_mount_file("alice"),
            dir.path().join("data").join("alice").join("mount.json")
        );
    }

    #[test]
    fn test_generated_secrets_differ() {
        assert_ne!(SystemConfig::generate("d").secret, SystemConfig::generate("d").secret);
    }

    #[test]
    fn test_personal_backend_allow_list() {
        let mut config = SystemConfig::default();
        assert!(config.personal_backend_allowed("dav"));
        config.user_mounting_backends = vec!["ftp".into()];
        assert!(!config.personal_backend_allowed("dav"));
        assert!(config.personal_backend_allowed("ftp"));
        config.allow_user_mounting = false;
        assert!(!config.personal_backend_allowed("ftp"));
    }

    #[test]
    fn test_missing_secret_is_an_error() {
        assert!(matches!(
            SystemConfig::default().cipher(),
            Err(ConfigError::MissingSecret)
        ));
    }

    #[test]
    fn test_parse_error_names_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "connect_timeout_secs = \"soon\"").unwrap();
        let err = SystemConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
