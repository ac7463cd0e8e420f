//! On-disk mount tables.
//!
//! A table is JSON shaped as scope type, then applicable user or group, then
//! mount point:
//!
//! ```json
//! {
//!   "version": 1,
//!   "user":  { "all":   { "/$user/files/ext": { "class": "smb", "options": {} } } },
//!   "group": { "staff": { "/$user/files/team": { "id": 3, "class": "dav", "options": {} } } }
//! }
//! ```
//!
//! Every read-modify-write holds an exclusive advisory lock on a sibling
//! `.lock` file and replaces the table atomically.

use crate::config::{BackendOptions, ConfigError, MountOptions};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Current table schema version
pub const CURRENT_VERSION: u32 = 1;

/// Applicable-user key of mounts that apply to everyone
pub const ALL_USERS: &str = "all";

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

fn default_version() -> u32 {
    CURRENT_VERSION
}

/// Scope type of a stored mount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountType {
    /// Applies to a user, or to everyone under [`ALL_USERS`]
    User,
    /// Applies to members of a group
    Group,
}

impl MountType {
    /// Key used in the table and in hook events
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Group => "group",
        }
    }
}

impl std::fmt::Display for MountType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stored mount
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountEntry {
    /// Numeric id assigned on first save
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,

    /// Backend identifier or alias
    pub class: String,

    /// Backend options; passwords encrypted
    #[serde(default)]
    pub options: BackendOptions,

    /// Priority among overlapping mounts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,

    /// Auth mechanism identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_mechanism: Option<String>,

    /// Mount options
    #[serde(default, skip_serializing_if = "MountOptions::is_empty")]
    pub mount_options: MountOptions,
}

impl MountEntry {
    /// Entry without id, priority or mount options
    pub fn new(class: impl Into<String>, options: BackendOptions) -> Self {
        Self {
            id: None,
            class: class.into(),
            options,
            priority: None,
            auth_mechanism: None,
            mount_options: MountOptions::default(),
        }
    }
}

type ScopeMap = BTreeMap<String, BTreeMap<String, MountEntry>>;

/// A whole mount table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MountTable {
    /// Schema version
    #[serde(default = "default_version")]
    pub version: u32,

    /// Mounts by applicable user
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub user: ScopeMap,

    /// Mounts by applicable group
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub group: ScopeMap,
}

impl Default for MountTable {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            user: ScopeMap::new(),
            group: ScopeMap::new(),
        }
    }
}

impl MountTable {
    fn scope_map(&self, mount_type: MountType) -> &ScopeMap {
        match mount_type {
            MountType::User => &self.user,
            MountType::Group => &self.group,
        }
    }

    fn scope_map_mut(&mut self, mount_type: MountType) -> &mut ScopeMap {
        match mount_type {
            MountType::User => &mut self.user,
            MountType::Group => &mut self.group,
        }
    }

    /// Whether the table holds no mounts
    pub fn is_empty(&self) -> bool {
        self.user.is_empty() && self.group.is_empty()
    }

    /// Mounts of one applicable user or group
    pub fn mounts(
        &self,
        mount_type: MountType,
        applicable: &str,
    ) -> Option<&BTreeMap<String, MountEntry>> {
        self.scope_map(mount_type).get(applicable)
    }

    /// One stored mount
    pub fn get(&self, mount_type: MountType, applicable: &str, mount_point: &str) -> Option<&MountEntry> {
        self.mounts(mount_type, applicable)?.get(mount_point)
    }

    /// Applicable users or groups that have mounts
    pub fn applicables(&self, mount_type: MountType) -> impl Iterator<Item = &str> {
        self.scope_map(mount_type).keys().map(String::as_str)
    }

    /// Insert or replace a mount, returning the previous entry
    pub fn insert(
        &mut self,
        mount_type: MountType,
        applicable: &str,
        mount_point: &str,
        entry: MountEntry,
    ) -> Option<MountEntry> {
        self.scope_map_mut(mount_type)
            .entry(applicable.to_string())
            .or_default()
            .insert(mount_point.to_string(), entry)
    }

    /// Remove a mount, pruning the applicable map when it becomes empty
    pub fn remove(
        &mut self,
        mount_type: MountType,
        applicable: &str,
        mount_point: &str,
    ) -> Option<MountEntry> {
        let scope = self.scope_map_mut(mount_type);
        let mounts = scope.get_mut(applicable)?;
        let removed = mounts.remove(mount_point);
        if mounts.is_empty() {
            scope.remove(applicable);
        }
        removed
    }

    /// Every stored mount with its scope
    pub fn iter(&self) -> impl Iterator<Item = (MountType, &str, &str, &MountEntry)> {
        let users = self.user.iter().map(|(a, m)| (MountType::User, a, m));
        let groups = self.group.iter().map(|(a, m)| (MountType::Group, a, m));
        users.chain(groups).flat_map(|(mount_type, applicable, mounts)| {
            mounts
                .iter()
                .map(move |(mp, entry)| (mount_type, applicable.as_str(), mp.as_str(), entry))
        })
    }

    /// Largest assigned id
    pub fn max_id(&self) -> u64 {
        self.iter()
            .filter_map(|(_, _, _, entry)| entry.id)
            .max()
            .unwrap_or(0)
    }
}

/// Write `bytes` to `path` through a temp file in the same directory.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ConfigError> {
    let write_err = |source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent).map_err(write_err)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&parent).map_err(write_err)?;
    tmp.write_all(bytes).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}

/// A mount table file with its lock.
#[derive(Debug, Clone)]
pub struct MountTableFile {
    path: PathBuf,
    lock_path: PathBuf,
    lock_timeout: Duration,
}

impl MountTableFile {
    /// Table at `path`, locked through `<path>.lock`
    pub fn new(path: impl Into<PathBuf>, lock_timeout: Duration) -> Self {
        let path = path.into();
        let lock_path = lock_path_for(&path);
        Self {
            path,
            lock_path,
            lock_timeout,
        }
    }

    /// Table file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the table. A missing file is an empty table.
    pub fn load(&self) -> Result<MountTable, ConfigError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(MountTable::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        if content.trim().is_empty() {
            return Ok(MountTable::default());
        }
        let mut table: MountTable =
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
                path: self.path.clone(),
                message: e.to_string(),
            })?;
        if table.version != CURRENT_VERSION {
            debug!(path = %self.path.display(), version = table.version, "Treating mount table as current version");
            table.version = CURRENT_VERSION;
        }
        Ok(table)
    }

    fn save(&self, table: &MountTable) -> Result<(), ConfigError> {
        let content = serde_json::to_vec_pretty(table).map_err(|e| ConfigError::Parse {
            path: self.path.clone(),
            message: e.to_string(),
        })?;
        write_atomic(&self.path, &content)
    }

    /// Read, modify and write the table under the lock.
    ///
    /// Nothing is written when `f` fails.
    pub fn update<F, R>(&self, f: F) -> Result<R, ConfigError>
    where
        F: FnOnce(&mut MountTable) -> Result<R, ConfigError>,
    {
        with_file_lock(&self.lock_path, self.lock_timeout, || {
            trace!(path = %self.path.display(), "Acquired mount table lock");
            let mut table = self.load()?;
            let value = f(&mut table)?;
            self.save(&table)?;
            Ok(value)
        })
    }
}

/// Sibling `<path>.lock` guarding writes to `path`
pub fn lock_path_for(path: &Path) -> PathBuf {
    let mut lock_name = path.file_name().unwrap_or_default().to_os_string();
    lock_name.push(".lock");
    path.with_file_name(lock_name)
}

/// Run `f` holding an exclusive advisory lock on `lock_path`.
///
/// Waits at most `timeout` for another holder before failing with
/// [`ConfigError::LockTimeout`].
pub fn with_file_lock<R>(
    lock_path: &Path,
    timeout: Duration,
    f: impl FnOnce() -> Result<R, ConfigError>,
) -> Result<R, ConfigError> {
    let lock_err = |source| ConfigError::Write {
        path: lock_path.to_path_buf(),
        source,
    };
    if let Some(parent) = lock_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(lock_err)?;
    }
    let lock_file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(lock_path)
        .map_err(lock_err)?;

    let start = Instant::now();
    loop {
        match lock_file.try_lock_exclusive() {
            Ok(()) => break,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                if start.elapsed() > timeout {
                    return Err(ConfigError::LockTimeout(lock_path.to_path_buf()));
                }
                std::thread::sleep(LOCK_POLL_INTERVAL);
            }
            Err(e) => return Err(lock_err(e)),
        }
    }

    let result = f();

    // Closing the file releases the lock as well
    if let Err(e) = FileExt::unlock(&lock_file) {
        debug!(path = %lock_path.display(), error = %e, "Explicit unlock failed");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn entry(class: &str) -> MountEntry {
        MountEntry::new(class, BackendOptions::new())
    }

    #[test]
    fn test_remove_prunes_empty_applicable() {
        let mut table = MountTable::default();
        table.insert(MountType::Group, "staff", "/$user/files/a", entry("dav"));
        table.insert(MountType::Group, "staff", "/$user/files/b", entry("dav"));

        assert!(table.remove(MountType::Group, "staff", "/$user/files/a").is_some());
        assert!(table.mounts(MountType::Group, "staff").is_some());
        assert!(table.remove(MountType::Group, "staff", "/$user/files/b").is_some());
        assert!(table.mounts(MountType::Group, "staff").is_none());
        assert!(table.is_empty());
        assert!(table.remove(MountType::Group, "staff", "/x").is_none());
    }

    #[test]
    fn test_serialized_layout() {
        let mut table = MountTable::default();
        let mut e = entry("smb");
        e.id = Some(4);
        e.options.insert("host".into(), json!("h"));
        table.insert(MountType::User, ALL_USERS, "/$user/files/ext", e);

        let value = serde_json::to_value(&table).unwrap();
        assert_eq!(
            value,
            json!({
                "version": 1,
                "user": {"all": {"/$user/files/ext": {"id": 4, "class": "smb", "options": {"host": "h"}}}}
            })
        );
    }

    #[test]
    fn test_missing_version_accepted() {
        let table: MountTable =
            serde_json::from_str(r#"{"user": {"all": {"/x": {"class": "ftp"}}}}"#).unwrap();
        assert_eq!(table.version, CURRENT_VERSION);
        assert_eq!(table.get(MountType::User, ALL_USERS, "/x").unwrap().class, "ftp");
    }

    #[test]
    fn test_max_id() {
        let mut table = MountTable::default();
        assert_eq!(table.max_id(), 0);
        let mut a = entry("a");
        a.id = Some(7);
        table.insert(MountType::User, "alice", "/a", a);
        table.insert(MountType::Group, "g", "/b", entry("b"));
        assert_eq!(table.max_id(), 7);
    }

    #[test]
    fn test_update_persists_and_skips_on_error() {
        let dir = TempDir::new().unwrap();
        let file = MountTableFile::new(dir.path().join("data").join("mount.json"), Duration::from_secs(1));
        assert!(file.load().unwrap().is_empty());

        file.update(|table| {
            table.insert(MountType::User, ALL_USERS, "/x", entry("ftp"));
            Ok(())
        })
        .unwrap();
        assert!(file.path().exists());
        assert!(dir.path().join("data").join("mount.json.lock").exists());

        let err = file
            .update(|table| {
                table.insert(MountType::User, ALL_USERS, "/y", entry("ftp"));
                Err::<(), _>(ConfigError::InvalidMountPoint("/y".into()))
            })
            .unwrap_err();
        assert!(err.is_rejection());

        let table = file.load().unwrap();
        assert!(table.get(MountType::User, ALL_USERS, "/x").is_some());
        assert!(table.get(MountType::User, ALL_USERS, "/y").is_none());
    }

    #[test]
    fn test_corrupt_table_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mount.json");
        std::fs::write(&path, "{not json").unwrap();
        let file = MountTableFile::new(&path, Duration::from_secs(1));
        assert!(matches!(file.load(), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_concurrent_updates_do_not_lose_writes() {
        let dir = TempDir::new().unwrap();
        let file = Arc::new(MountTableFile::new(
            dir.path().join("mount.json"),
            Duration::from_secs(10),
        ));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let file = Arc::clone(&file);
                std::thread::spawn(move || {
                    file.update(|table| {
                        table.insert(MountType::User, ALL_USERS, &format!("/m{i}"), entry("ftp"));
                        Ok(())
                    })
                    .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let table = file.load().unwrap();
        assert_eq!(table.mounts(MountType::User, ALL_USERS).unwrap().len(), 8);
    }

    #[test]
    fn test_file_lock_released_after_failure() {
        let dir = TempDir::new().unwrap();
        let lock_path = lock_path_for(&dir.path().join("prefs.json"));
        assert_eq!(lock_path, dir.path().join("prefs.json.lock"));

        let failed = with_file_lock(&lock_path, Duration::ZERO, || {
            Err::<(), _>(ConfigError::MountNotFound("/x".into()))
        });
        assert!(matches!(failed, Err(ConfigError::MountNotFound(_))));
        assert_eq!(with_file_lock(&lock_path, Duration::ZERO, || Ok(7)).unwrap(), 7);

        let holder = OpenOptions::new().write(true).open(&lock_path).unwrap();
        holder.lock_exclusive().unwrap();
        let blocked = with_file_lock(&lock_path, Duration::from_millis(120), || Ok(()));
        assert!(matches!(blocked, Err(ConfigError::LockTimeout(p)) if p == lock_path));
        FileExt::unlock(&holder).unwrap();
        assert!(with_file_lock(&lock_path, Duration::ZERO, || Ok(())).is_ok());
    }

    #[test]
    fn test_write_atomic_replaces_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("file.toml");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"two");
    }
}
