//! Loading the system configuration and wiring the mount services.

use anyhow::{Context, Result};
use extmount_core::config::system::{CONFIG_FILE_NAME, config_dir};
use extmount_core::etag::{ChangePropagator, JsonPreferenceStore};
use extmount_core::mount::MountHook;
use extmount_core::{EtagPropagator, MountConfig, MountProvider, SessionCredentials, SystemConfig};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Preferences file inside the data directory
pub const PREFERENCES_FILE: &str = "preferences.json";

/// Change propagator that reports refreshed paths in the log.
#[derive(Debug, Default)]
pub struct LoggingPropagator {
    pending: Mutex<Vec<String>>,
}

impl ChangePropagator for LoggingPropagator {
    fn add_change(&self, path: &str) {
        self.pending.lock().push(path.to_string());
    }

    fn propagate_changes(&self, time: i64) {
        for path in std::mem::take(&mut *self.pending.lock()) {
            info!(path = %path, time, "Propagated etag change");
        }
    }
}

/// Configuration plus the services built from it
pub struct Workspace {
    /// Mount store and resolver
    pub mounts: Arc<MountConfig>,
    /// Dirty-tracking etag propagator, also registered as mount hook
    pub etag: Arc<EtagPropagator>,
}

/// Configuration file to use: `--config`, else `config.toml` in the
/// configuration directory
pub fn config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => Ok(config_dir()?.join(CONFIG_FILE_NAME)),
    }
}

impl Workspace {
    /// Load the configuration and build the mount services
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let config_path = config_path(explicit)?;
        let system = SystemConfig::load(&config_path)
            .with_context(|| format!("Run 'extmount init' to create {}", config_path.display()))?;
        debug!(config = %config_path.display(), datadirectory = %system.datadirectory.display(), "Loaded configuration");

        let preferences = JsonPreferenceStore::open(system.datadirectory.join(PREFERENCES_FILE))?
            .with_lock_timeout(system.lock_timeout());
        let etag = Arc::new(EtagPropagator::new(
            Arc::new(preferences),
            Arc::new(LoggingPropagator::default()),
        ));

        let registry = extmount_backends::default_registry().context("Failed to register backends")?;
        let users = Arc::new(system.users.clone());
        let mut mounts = MountConfig::new(system, Arc::new(registry), users)?;
        mounts.add_hook(Arc::clone(&etag) as Arc<dyn MountHook>);

        Ok(Self {
            mounts: Arc::new(mounts),
            etag,
        })
    }

    /// Provider for live mounts
    pub fn provider(&self) -> MountProvider {
        MountProvider::new(Arc::clone(&self.mounts))
    }
}

/// Session credentials for `user` when a login password was given
pub fn session(user: &str, login_password: Option<&str>) -> Option<SessionCredentials> {
    login_password.map(|password| SessionCredentials::new(user, password))
}
