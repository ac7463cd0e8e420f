//! Etag propagation for mount changes.
//!
//! A change to a mount that reaches a single user is propagated right away.
//! A change to a group or global mount would have to touch every member, so
//! it is only recorded as a system-wide dirty timestamp; each user catches
//! up the next time [`EtagPropagator::propagate_dirty_mount_points`] runs
//! for them.

use crate::config::ConfigError;
use crate::mount::config::relative_mount_point;
use crate::mount::hooks::{MountEvent, MountHook};
use crate::mount::store::{ALL_USERS, MountType, lock_path_for, with_file_lock, write_atomic};
use crate::storage::unix_now;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Application key under which dirty timestamps are stored
pub const APP_ID: &str = "files_external";

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Receives path changes and refreshes etags up to the root.
pub trait ChangePropagator: Send + Sync {
    /// Queue a changed path
    fn add_change(&self, path: &str);

    /// Flush queued changes with the given modification time
    fn propagate_changes(&self, time: i64);
}

/// Key-value preferences, system-wide and per user.
pub trait PreferenceStore: Send + Sync {
    /// System-wide value
    fn app_value(&self, app: &str, key: &str) -> Option<String>;

    /// Set a system-wide value
    fn set_app_value(&self, app: &str, key: &str, value: &str) -> Result<(), ConfigError>;

    /// Per-user value
    fn user_value(&self, uid: &str, app: &str, key: &str) -> Option<String>;

    /// Set a per-user value
    fn set_user_value(&self, uid: &str, app: &str, key: &str, value: &str) -> Result<(), ConfigError>;
}

type Section = BTreeMap<String, BTreeMap<String, String>>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Preferences {
    #[serde(default)]
    app: Section,
    #[serde(default)]
    user: BTreeMap<String, Section>,
}

impl Preferences {
    fn app_value(&self, app: &str, key: &str) -> Option<String> {
        self.app.get(app)?.get(key).cloned()
    }

    fn user_value(&self, uid: &str, app: &str, key: &str) -> Option<String> {
        self.user.get(uid)?.get(app)?.get(key).cloned()
    }

    fn set_app_value(&mut self, app: &str, key: &str, value: &str) {
        self.app
            .entry(app.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    fn set_user_value(&mut self, uid: &str, app: &str, key: &str, value: &str) {
        self.user
            .entry(uid.to_string())
            .or_default()
            .entry(app.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }
}

/// Preferences held in memory.
#[derive(Debug, Default)]
pub struct MemoryPreferenceStore {
    inner: Mutex<Preferences>,
}

impl MemoryPreferenceStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn app_value(&self, app: &str, key: &str) -> Option<String> {
        self.inner.lock().app_value(app, key)
    }

    fn set_app_value(&self, app: &str, key: &str, value: &str) -> Result<(), ConfigError> {
        self.inner.lock().set_app_value(app, key, value);
        Ok(())
    }

    fn user_value(&self, uid: &str, app: &str, key: &str) -> Option<String> {
        self.inner.lock().user_value(uid, app, key)
    }

    fn set_user_value(&self, uid: &str, app: &str, key: &str, value: &str) -> Result<(), ConfigError> {
        self.inner.lock().set_user_value(uid, app, key, value);
        Ok(())
    }
}

/// Preferences persisted as a JSON file, rewritten atomically on each set.
///
/// Writes re-read the file under `<path>.lock`, so several processes sharing
/// one file keep each other's values. Reads refresh from disk and fall back
/// to the last good copy when the file cannot be read.
#[derive(Debug)]
pub struct JsonPreferenceStore {
    path: PathBuf,
    lock_path: PathBuf,
    lock_timeout: Duration,
    cache: Mutex<Preferences>,
}

impl JsonPreferenceStore {
    /// Open the store at `path`; a missing file is an empty store
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let prefs = read_preferences(&path)?;
        Ok(Self {
            lock_path: lock_path_for(&path),
            path,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            cache: Mutex::new(prefs),
        })
    }

    /// Wait at most `timeout` for the file lock when writing
    #[must_use]
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn current(&self) -> Preferences {
        let mut cache = self.cache.lock();
        match read_preferences(&self.path) {
            Ok(prefs) => *cache = prefs,
            Err(e) => warn!(app = APP_ID, path = %self.path.display(), error = %e, "Using cached preferences"),
        }
        cache.clone()
    }

    fn modify(&self, f: impl FnOnce(&mut Preferences)) -> Result<(), ConfigError> {
        let mut cache = self.cache.lock();
        let updated = with_file_lock(&self.lock_path, self.lock_timeout, || {
            let mut prefs = read_preferences(&self.path)?;
            f(&mut prefs);
            let content = serde_json::to_vec_pretty(&prefs).map_err(|e| ConfigError::Parse {
                path: self.path.clone(),
                message: e.to_string(),
            })?;
            write_atomic(&self.path, &content)?;
            Ok(prefs)
        })?;
        *cache = updated;
        Ok(())
    }
}

fn read_preferences(path: &Path) -> Result<Preferences, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) if content.trim().is_empty() => Ok(Preferences::default()),
        Ok(content) => serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Preferences::default()),
        Err(source) => Err(ConfigError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

impl PreferenceStore for JsonPreferenceStore {
    fn app_value(&self, app: &str, key: &str) -> Option<String> {
        self.current().app_value(app, key)
    }

    fn set_app_value(&self, app: &str, key: &str, value: &str) -> Result<(), ConfigError> {
        self.modify(|prefs| prefs.set_app_value(app, key, value))
    }

    fn user_value(&self, uid: &str, app: &str, key: &str) -> Option<String> {
        self.current().user_value(uid, app, key)
    }

    fn set_user_value(&self, uid: &str, app: &str, key: &str, value: &str) -> Result<(), ConfigError> {
        self.modify(|prefs| prefs.set_user_value(uid, app, key, value))
    }
}

/// Change propagator that records what it was asked to propagate.
#[derive(Debug, Default)]
pub struct ChangeLog {
    pending: Mutex<Vec<String>>,
    propagated: Mutex<Vec<(String, i64)>>,
}

impl ChangeLog {
    /// Empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Paths propagated so far, with their time
    pub fn propagated(&self) -> Vec<(String, i64)> {
        self.propagated.lock().clone()
    }
}

impl ChangePropagator for ChangeLog {
    fn add_change(&self, path: &str) {
        self.pending.lock().push(path.to_string());
    }

    fn propagate_changes(&self, time: i64) {
        let pending = std::mem::take(&mut *self.pending.lock());
        self.propagated
            .lock()
            .extend(pending.into_iter().map(|path| (path, time)));
    }
}

fn parse_time(value: Option<String>) -> i64 {
    value.and_then(|v| v.parse().ok()).unwrap_or(0)
}

/// Dirty-tracking etag propagator.
pub struct EtagPropagator {
    preferences: Arc<dyn PreferenceStore>,
    propagator: Arc<dyn ChangePropagator>,
}

impl std::fmt::Debug for EtagPropagator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EtagPropagator").finish_non_exhaustive()
    }
}

impl EtagPropagator {
    /// Propagator over the given stores
    pub fn new(preferences: Arc<dyn PreferenceStore>, propagator: Arc<dyn ChangePropagator>) -> Self {
        Self {
            preferences,
            propagator,
        }
    }

    /// Handle a mount change at `time`.
    ///
    /// Group and global mounts are marked dirty; a mount for a single user
    /// is propagated in that user's file tree right away.
    pub fn update_hook(&self, event: &MountEvent, time: i64) -> Result<(), ConfigError> {
        let relative = relative_mount_point(&event.path);
        if event.mount_type == MountType::Group || event.users == ALL_USERS {
            debug!(mount_point = %relative, time, "Marking mount point dirty");
            self.preferences
                .set_app_value(APP_ID, &relative, &time.to_string())
        } else {
            let path = user_path(&event.users, &relative);
            self.propagator.add_change(&path);
            self.propagator.propagate_changes(time);
            Ok(())
        }
    }

    /// Mount points of `user` whose dirty time is newer than the user's
    /// last propagation.
    pub fn dirty_mount_points<'a>(&self, user: &str, mount_points: &'a [String]) -> Vec<&'a str> {
        mount_points
            .iter()
            .map(String::as_str)
            .filter(|mount_point| {
                let relative = relative_mount_point(mount_point);
                let dirty = parse_time(self.preferences.app_value(APP_ID, &relative));
                let seen = parse_time(self.preferences.user_value(user, APP_ID, &relative));
                dirty > seen
            })
            .collect()
    }

    /// Catch `user` up on dirty mount points.
    ///
    /// `mount_points` are the user's resolved mount points
    /// (`/<uid>/files/...`). Returns the ones that were propagated.
    pub fn propagate_dirty_mount_points(
        &self,
        user: &str,
        mount_points: &[String],
        time: i64,
    ) -> Result<Vec<String>, ConfigError> {
        let dirty: Vec<String> = self
            .dirty_mount_points(user, mount_points)
            .into_iter()
            .map(ToString::to_string)
            .collect();
        for mount_point in &dirty {
            self.propagator.add_change(mount_point);
            self.preferences.set_user_value(
                user,
                APP_ID,
                &relative_mount_point(mount_point),
                &time.to_string(),
            )?;
        }
        if !dirty.is_empty() {
            self.propagator.propagate_changes(time);
        }
        Ok(dirty)
    }
}

impl MountHook for EtagPropagator {
    fn on_mount_event(&self, event: &MountEvent) {
        if let Err(e) = self.update_hook(event, unix_now()) {
            warn!(app = APP_ID, path = %event.path, error = %e, "Failed to record mount change");
        }
    }
}

fn user_path(uid: &str, relative: &str) -> String {
    format!("/{uid}/files{relative}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mount::hooks::MountSignal;
    use tempfile::TempDir;

    fn event(mount_type: MountType, users: &str, path: &str) -> MountEvent {
        MountEvent {
            signal: MountSignal::Create,
            path: path.to_string(),
            mount_type,
            users: users.to_string(),
        }
    }

    fn setup() -> (Arc<MemoryPreferenceStore>, Arc<ChangeLog>, EtagPropagator) {
        let prefs = Arc::new(MemoryPreferenceStore::new());
        let log = Arc::new(ChangeLog::new());
        let propagator = EtagPropagator::new(prefs.clone(), log.clone());
        (prefs, log, propagator)
    }

    #[test]
    fn test_single_user_mount_propagates_immediately() {
        let (prefs, log, propagator) = setup();
        propagator
            .update_hook(&event(MountType::User, "alice", "/$user/files/ext"), 10)
            .unwrap();
        assert_eq!(log.propagated(), vec![("/alice/files/ext".to_string(), 10)]);
        assert!(prefs.app_value(APP_ID, "/ext").is_none());
    }

    #[test]
    fn test_group_and_global_mounts_marked_dirty() {
        let (prefs, log, propagator) = setup();
        propagator
            .update_hook(&event(MountType::Group, "staff", "/$user/files/team"), 10)
            .unwrap();
        propagator
            .update_hook(&event(MountType::User, ALL_USERS, "/$user/files/all"), 11)
            .unwrap();
        assert!(log.propagated().is_empty());
        assert_eq!(prefs.app_value(APP_ID, "/team").as_deref(), Some("10"));
        assert_eq!(prefs.app_value(APP_ID, "/all").as_deref(), Some("11"));
    }

    #[test]
    fn test_catch_up_propagates_once() {
        let (prefs, log, propagator) = setup();
        propagator
            .update_hook(&event(MountType::Group, "staff", "/$user/files/team"), 10)
            .unwrap();
        let mounts = vec!["/alice/files/team".to_string(), "/alice/files/other".to_string()];

        let done = propagator.propagate_dirty_mount_points("alice", &mounts, 20).unwrap();
        assert_eq!(done, vec!["/alice/files/team"]);
        assert_eq!(log.propagated(), vec![("/alice/files/team".to_string(), 20)]);
        assert_eq!(prefs.user_value("alice", APP_ID, "/team").as_deref(), Some("20"));

        let again = propagator.propagate_dirty_mount_points("alice", &mounts, 30).unwrap();
        assert!(again.is_empty());

        propagator
            .update_hook(&event(MountType::Group, "staff", "/$user/files/team"), 40)
            .unwrap();
        let bob = propagator
            .propagate_dirty_mount_points("bob", &["/bob/files/team".to_string()], 41)
            .unwrap();
        assert_eq!(bob.len(), 1);
        assert_eq!(propagator.dirty_mount_points("alice", &mounts), vec!["/alice/files/team"]);
    }

    #[test]
    fn test_json_store_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("preferences.json");
        let store = JsonPreferenceStore::open(&path).unwrap();
        store.set_app_value(APP_ID, "/ext", "5").unwrap();
        store.set_user_value("alice", APP_ID, "/ext", "6").unwrap();

        let reopened = JsonPreferenceStore::open(&path).unwrap();
        assert_eq!(reopened.app_value(APP_ID, "/ext").as_deref(), Some("5"));
        assert_eq!(reopened.user_value("alice", APP_ID, "/ext").as_deref(), Some("6"));
        assert!(reopened.user_value("bob", APP_ID, "/ext").is_none());
    }

    #[test]
    fn test_json_stores_sharing_a_file_keep_each_others_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("preferences.json");
        let first = JsonPreferenceStore::open(&path).unwrap();
        let second = JsonPreferenceStore::open(&path).unwrap().with_lock_timeout(Duration::from_secs(1));

        first.set_app_value(APP_ID, "/a", "1").unwrap();
        second.set_user_value("alice", APP_ID, "/b", "2").unwrap();
        first.set_user_value("bob", APP_ID, "/c", "3").unwrap();

        assert_eq!(second.app_value(APP_ID, "/a").as_deref(), Some("1"));
        assert_eq!(first.user_value("alice", APP_ID, "/b").as_deref(), Some("2"));

        let reopened = JsonPreferenceStore::open(&path).unwrap();
        assert_eq!(reopened.app_value(APP_ID, "/a").as_deref(), Some("1"));
        assert_eq!(reopened.user_value("alice", APP_ID, "/b").as_deref(), Some("2"));
        assert_eq!(reopened.user_value("bob", APP_ID, "/c").as_deref(), Some("3"));
    }
}
