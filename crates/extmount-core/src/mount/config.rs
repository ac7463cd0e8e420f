//! Mount configuration store and resolver.
//!
//! System mounts live in one table keyed by scope; personal mounts live in a
//! table inside each user's data directory. Resolution for a user merges, in
//! order, mounts for everyone, mounts for the user's groups, mounts naming
//! the user, and the user's personal mounts. A later entry replaces an
//! earlier one at the same mount point.

use super::hooks::{MountEvent, MountHook, MountSignal};
use super::store::{ALL_USERS, MountEntry, MountTable, MountTableFile, MountType};
use super::tester::{ConnectivityTester, TimeoutTester, classify};
use crate::config::{
    BackendOptions, ConfigError, MountOptions, StorageConfig, StorageStatus, SystemConfig,
    UserDirectory, make_config_hash, normalize_mount_point,
};
use crate::crypto::{CredentialCipher, ENCRYPTED_PASSWORD_KEY};
use crate::definition::{SessionCredentials, StorageContext, UserType};
use crate::registry::{BackendRegistry, LOCAL_BACKEND};
use crate::storage::normalize_path;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Placeholder replaced by the acting user's id
pub const USER_PLACEHOLDER: &str = "$user";

/// Top-level folder that cannot be used as a mount point
pub const RESERVED_FOLDER: &str = "Shared";

/// Where a mount is stored and who it applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountScope {
    /// System mount for everyone, a user, or a group
    System {
        /// Scope type
        mount_type: MountType,
        /// User id, group id, or `all`
        applicable: String,
    },
    /// Personal mount
    Personal {
        /// User performing the change
        acting_user: String,
        /// Owner of the personal table
        user: String,
    },
}

impl MountScope {
    /// System mount for everyone
    pub fn all() -> Self {
        Self::System {
            mount_type: MountType::User,
            applicable: ALL_USERS.to_string(),
        }
    }

    /// System mount for one user
    pub fn user(uid: impl Into<String>) -> Self {
        Self::System {
            mount_type: MountType::User,
            applicable: uid.into(),
        }
    }

    /// System mount for a group
    pub fn group(gid: impl Into<String>) -> Self {
        Self::System {
            mount_type: MountType::Group,
            applicable: gid.into(),
        }
    }

    /// A user's own personal mount
    pub fn personal(uid: impl Into<String>) -> Self {
        let uid = uid.into();
        Self::Personal {
            acting_user: uid.clone(),
            user: uid,
        }
    }

    fn is_personal(&self) -> bool {
        matches!(self, Self::Personal { .. })
    }

    fn mount_type(&self) -> MountType {
        match self {
            Self::System { mount_type, .. } => *mount_type,
            Self::Personal { .. } => MountType::User,
        }
    }

    fn applicable(&self) -> &str {
        match self {
            Self::System { applicable, .. } => applicable,
            Self::Personal { user, .. } => user,
        }
    }
}

/// A mount to store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMount {
    /// Mount point relative to the user's file root
    pub mount_point: String,
    /// Backend identifier or alias
    pub class: String,
    /// Plaintext backend options
    pub options: BackendOptions,
    /// Auth mechanism identifier; the backend's legacy one when unset
    pub auth_mechanism: Option<String>,
    /// Priority; the existing or backend default when unset
    pub priority: Option<i32>,
    /// Mount options
    pub mount_options: MountOptions,
}

impl NewMount {
    /// Mount of `class` at `mount_point`
    pub fn new(mount_point: &str, class: &str, options: BackendOptions) -> Self {
        Self {
            mount_point: mount_point.to_string(),
            class: class.to_string(),
            options,
            auth_mechanism: None,
            priority: None,
            mount_options: MountOptions::default(),
        }
    }
}

/// One mount after merging, substitution and decryption.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMount {
    /// Stored id
    pub id: Option<u64>,
    /// Backend identifier or alias as stored
    pub class: String,
    /// Decrypted options with `$user` substituted
    pub options: BackendOptions,
    /// Priority
    pub priority: Option<i32>,
    /// Auth mechanism identifier
    pub auth_mechanism: Option<String>,
    /// Mount options
    pub mount_options: MountOptions,
    /// Whether it came from the user's personal table
    pub personal: bool,
}

/// Configuration store and resolver.
pub struct MountConfig {
    system: SystemConfig,
    registry: Arc<BackendRegistry>,
    users: Arc<dyn UserDirectory>,
    cipher: CredentialCipher,
    tester: Arc<dyn ConnectivityTester>,
    hooks: Vec<Arc<dyn MountHook>>,
}

impl std::fmt::Debug for MountConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountConfig")
            .field("mount_file", &self.system.mount_file())
            .field("hooks", &self.hooks.len())
            .finish_non_exhaustive()
    }
}

impl MountConfig {
    /// Resolver over `system`'s tables using a timeout-bounded tester
    pub fn new(
        system: SystemConfig,
        registry: Arc<BackendRegistry>,
        users: Arc<dyn UserDirectory>,
    ) -> Result<Self, ConfigError> {
        let cipher = system.cipher()?;
        let tester = Arc::new(TimeoutTester::new(system.connect_timeout()));
        Ok(Self {
            system,
            registry,
            users,
            cipher,
            tester,
            hooks: Vec::new(),
        })
    }

    /// Replace the connectivity tester
    #[must_use]
    pub fn with_tester(mut self, tester: Arc<dyn ConnectivityTester>) -> Self {
        self.tester = tester;
        self
    }

    /// Register a lifecycle observer
    pub fn add_hook(&mut self, hook: Arc<dyn MountHook>) {
        self.hooks.push(hook);
    }

    /// System settings
    pub fn system(&self) -> &SystemConfig {
        &self.system
    }

    /// Backend registry
    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    /// User directory
    pub fn users(&self) -> &Arc<dyn UserDirectory> {
        &self.users
    }

    /// Credential cipher
    pub fn cipher(&self) -> &CredentialCipher {
        &self.cipher
    }

    fn system_file(&self) -> MountTableFile {
        MountTableFile::new(self.system.mount_file(), self.system.lock_timeout())
    }

    fn personal_file(&self, uid: &str) -> MountTableFile {
        MountTableFile::new(self.system.personal_mount_file(uid), self.system.lock_timeout())
    }

    fn file_for(&self, scope: &MountScope) -> MountTableFile {
        match scope {
            MountScope::System { .. } => self.system_file(),
            MountScope::Personal { user, .. } => self.personal_file(user),
        }
    }

    /// Storage context for a user
    pub fn context(&self, user: Option<&str>) -> StorageContext {
        let context = StorageContext::new(&self.system.datadirectory, self.system.connect_timeout());
        match user {
            Some(uid) => context.for_user(uid),
            None => context,
        }
    }

    fn emit(&self, signal: MountSignal, path: &str, scope: &MountScope) {
        let event = MountEvent {
            signal,
            path: path.to_string(),
            mount_type: scope.mount_type(),
            users: scope.applicable().to_string(),
        };
        for hook in &self.hooks {
            hook.on_mount_event(&event);
        }
    }

    fn check_personal(&self, scope: &MountScope) -> Result<(), ConfigError> {
        if let MountScope::Personal { acting_user, user } = scope {
            if acting_user != user {
                return Err(ConfigError::ForeignUser {
                    acting: acting_user.clone(),
                    target: user.clone(),
                });
            }
            if !self.system.allow_user_mounting {
                return Err(ConfigError::UserMountingDisabled);
            }
        }
        Ok(())
    }

    /// Store a mount and test it.
    ///
    /// Returns the connectivity status of the new configuration. The create
    /// signal is emitted only for a new mount that tested successfully.
    pub fn add_mount_point(
        &self,
        mount: &NewMount,
        scope: &MountScope,
    ) -> Result<StorageStatus, ConfigError> {
        let relative = validate_mount_point(&mount.mount_point)?;
        let backend = self
            .registry
            .get_backend(&mount.class)
            .ok_or_else(|| ConfigError::UnknownBackend(mount.class.clone()))?;

        self.check_personal(scope)?;
        if scope.is_personal() && !self.personal_backend_permitted(backend.id()) {
            return Err(ConfigError::BackendNotAllowed(backend.id().to_string()));
        }
        if let Some(id) = mount.auth_mechanism.as_deref() {
            self.registry.resolve_auth_mechanism(backend, Some(id))?;
        }

        let mut stored_options = mount.options.clone();
        self.cipher.encrypt_options(&mut stored_options);
        let key = stored_mount_point(scope, &relative);
        let default_priority = backend.priority();

        let is_new = self.file_for(scope).update(|table| {
            let existing = table.get(scope.mount_type(), scope.applicable(), &key);
            let is_new = existing.is_none();
            let id = existing
                .and_then(|e| e.id)
                .unwrap_or_else(|| table.max_id() + 1);
            let priority = mount
                .priority
                .or_else(|| existing.and_then(|e| e.priority))
                .unwrap_or(default_priority);
            let entry = MountEntry {
                id: Some(id),
                class: mount.class.clone(),
                options: stored_options,
                priority: Some(priority),
                auth_mechanism: mount.auth_mechanism.clone(),
                mount_options: mount.mount_options.clone(),
            };
            table.insert(scope.mount_type(), scope.applicable(), &key, entry);
            Ok(is_new)
        })?;
        info!(mount_point = %key, backend = backend.id(), scope = scope.applicable(), "Stored mount");

        let test_user = match scope {
            MountScope::Personal { user, .. } => Some(user.as_str()),
            MountScope::System { .. } => None,
        };
        let mut test_options = mount.options.clone();
        if let Some(uid) = test_user {
            substitute_options(&mut test_options, uid);
        }
        let status = self.get_backend_status(
            &mount.class,
            &test_options,
            mount.auth_mechanism.as_deref(),
            test_user,
            None,
        );

        if status == StorageStatus::Success && is_new {
            self.emit(MountSignal::Create, &key, scope);
        }
        Ok(status)
    }

    /// Remove a stored mount and emit the delete signal.
    pub fn remove_mount_point(&self, mount_point: &str, scope: &MountScope) -> Result<(), ConfigError> {
        let relative = validate_mount_point(mount_point)?;
        self.check_personal(scope)?;
        let key = stored_mount_point(scope, &relative);

        self.file_for(scope).update(|table| {
            table
                .remove(scope.mount_type(), scope.applicable(), &key)
                .map(|_| ())
                .ok_or_else(|| ConfigError::MountNotFound(key.clone()))
        })?;
        info!(mount_point = %key, scope = scope.applicable(), "Removed mount");
        self.emit(MountSignal::Delete, &key, scope);
        Ok(())
    }

    /// Move one of `user`'s personal mounts to another mount point.
    pub fn move_personal_mount(&self, user: &str, from: &str, to: &str) -> Result<(), ConfigError> {
        let scope = MountScope::personal(user);
        let source = stored_mount_point(&scope, &validate_mount_point(from)?);
        let target = stored_mount_point(&scope, &validate_mount_point(to)?);

        self.personal_file(user).update(|table| {
            let entry = table
                .remove(MountType::User, user, &source)
                .ok_or_else(|| ConfigError::MountNotFound(source.clone()))?;
            table.insert(MountType::User, user, &target, entry);
            Ok(())
        })?;
        info!(user, from = %source, to = %target, "Moved personal mount");
        self.emit(MountSignal::Delete, &source, &scope);
        self.emit(MountSignal::Create, &target, &scope);
        Ok(())
    }

    /// Test a backend configuration.
    ///
    /// Never fails: unknown backends, missing dependencies, incompatible
    /// auth mechanisms and backend errors all map to a status.
    pub fn get_backend_status(
        &self,
        class: &str,
        options: &BackendOptions,
        auth_mechanism: Option<&str>,
        user: Option<&str>,
        session: Option<&SessionCredentials>,
    ) -> StorageStatus {
        let Some(backend) = self.registry.get_backend(class) else {
            warn!(app = "files_external", backend = class, "Unknown backend");
            return StorageStatus::Error;
        };
        let missing = backend.check_dependencies();
        if !missing.is_empty() {
            warn!(app = "files_external", backend = backend.id(), ?missing, "Backend dependencies missing");
            return StorageStatus::Error;
        }
        let mechanism = match self.registry.resolve_auth_mechanism(backend, auth_mechanism) {
            Ok(mechanism) => mechanism,
            Err(e) => {
                warn!(app = "files_external", backend = backend.id(), error = %e, "Invalid auth mechanism");
                return StorageStatus::Error;
            }
        };
        let mut options = options.clone();
        if let Err(e) = mechanism.manipulate(&mut options, session) {
            return classify(backend.id(), Err(e));
        }
        if let Err(parameter) = backend.validate_options(&options) {
            warn!(app = "files_external", backend = backend.id(), parameter, "Invalid backend option");
            return StorageStatus::Error;
        }
        self.tester.test(backend, &options, &self.context(user))
    }

    /// Mount table of `user` keyed by substituted mount point.
    pub fn get_absolute_mount_points(
        &self,
        user: &str,
    ) -> Result<BTreeMap<String, ResolvedMount>, ConfigError> {
        let mut mounts = BTreeMap::new();
        let system = self.system_file().load()?;

        if let Some(global) = system.mounts(MountType::User, ALL_USERS) {
            self.merge(&mut mounts, global, user, false);
        }
        for group in self.users.groups_for_user(user) {
            if let Some(group_mounts) = system.mounts(MountType::Group, &group) {
                self.merge(&mut mounts, group_mounts, user, false);
            }
        }
        for applicable in system.applicables(MountType::User) {
            if applicable != ALL_USERS
                && applicable.eq_ignore_ascii_case(user)
                && let Some(user_mounts) = system.mounts(MountType::User, applicable)
            {
                self.merge(&mut mounts, user_mounts, user, false);
            }
        }

        if self.system.allow_user_mounting {
            let personal = self.personal_file(user).load()?;
            if let Some(own) = personal.mounts(MountType::User, user) {
                self.merge(&mut mounts, own, user, true);
            }
        }
        debug!(user, count = mounts.len(), "Resolved mount points");
        Ok(mounts)
    }

    /// Whether users may mount `class` themselves. Unknown backends are not.
    fn personal_backend_permitted(&self, class: &str) -> bool {
        self.registry.get_backend(class).is_some_and(|backend| {
            backend.id() != LOCAL_BACKEND
                && backend.visibility().is_visible_for(UserType::Personal.visibility_bit())
                && self.system.personal_backend_allowed(backend.id())
        })
    }

    fn merge(
        &self,
        into: &mut BTreeMap<String, ResolvedMount>,
        entries: &BTreeMap<String, MountEntry>,
        user: &str,
        personal: bool,
    ) {
        for (mount_point, entry) in entries {
            if personal && !self.personal_backend_permitted(&entry.class) {
                warn!(
                    app = "files_external",
                    user,
                    mount_point = %mount_point,
                    backend = %entry.class,
                    "Skipping personal mount of a backend users may not mount"
                );
                continue;
            }
            let mount_point = substitute_user(mount_point, user);
            let mut options = entry.options.clone();
            substitute_options(&mut options, user);
            self.decrypt_or_strip(&mut options, &mount_point);
            into.insert(
                mount_point,
                ResolvedMount {
                    id: entry.id,
                    class: entry.class.clone(),
                    options,
                    priority: entry.priority,
                    auth_mechanism: entry.auth_mechanism.clone(),
                    mount_options: entry.mount_options.clone(),
                    personal,
                },
            );
        }
    }

    fn decrypt_or_strip(&self, options: &mut BackendOptions, mount_point: &str) {
        if let Err(e) = self.cipher.decrypt_options(options) {
            warn!(app = "files_external", mount_point, error = %e, "Stored password could not be decrypted");
            options.remove(ENCRYPTED_PASSWORD_KEY);
        }
    }

    /// System mounts coalesced by configuration hash.
    ///
    /// Identical mounts stored for several users or groups become one entry
    /// listing all of them. With `test` set, each entry carries a status.
    pub fn get_system_mount_points(&self, test: bool) -> Result<Vec<StorageConfig>, ConfigError> {
        let table = self.system_file().load()?;
        let mut configs = coalesce(&table, |options, mount_point| {
            self.decrypt_or_strip(options, mount_point);
        });
        if test {
            for config in &mut configs {
                config.status = Some(self.get_backend_status(
                    &config.backend_class,
                    &config.backend_options,
                    config.auth_mechanism.as_deref(),
                    None,
                    None,
                ));
            }
        }
        Ok(configs)
    }

    /// A user's personal mounts.
    pub fn get_personal_mount_points(
        &self,
        user: &str,
        test: bool,
    ) -> Result<Vec<StorageConfig>, ConfigError> {
        let table = self.personal_file(user).load()?;
        let mut configs = Vec::new();
        if let Some(own) = table.mounts(MountType::User, user) {
            for (mount_point, entry) in own {
                let mut options = entry.options.clone();
                self.decrypt_or_strip(&mut options, mount_point);
                let mut config = storage_config(mount_point, entry, options);
                if test {
                    let mut test_options = config.backend_options.clone();
                    substitute_options(&mut test_options, user);
                    config.status = Some(self.get_backend_status(
                        &entry.class,
                        &test_options,
                        entry.auth_mechanism.as_deref(),
                        Some(user),
                        None,
                    ));
                }
                configs.push(config);
            }
        }
        Ok(configs)
    }
}

fn storage_config(stored_mount_point: &str, entry: &MountEntry, options: BackendOptions) -> StorageConfig {
    let mut config = StorageConfig::new(&relative_mount_point(stored_mount_point), entry.class.clone());
    config.id = entry.id;
    config.backend_options = options;
    config.priority = entry.priority;
    config.auth_mechanism = entry.auth_mechanism.clone();
    config.mount_options = entry.mount_options.clone();
    config
}

fn coalesce<F>(table: &MountTable, mut decrypt: F) -> Vec<StorageConfig>
where
    F: FnMut(&mut BackendOptions, &str),
{
    let mut by_hash: Vec<(String, StorageConfig)> = Vec::new();
    for (mount_type, applicable, mount_point, entry) in table.iter() {
        let mut options = entry.options.clone();
        decrypt(&mut options, mount_point);
        let relative = relative_mount_point(mount_point);
        let hash = make_config_hash(
            &entry.class,
            &relative,
            &options,
            entry.priority,
            &entry.mount_options,
        );
        let index = match by_hash.iter().position(|(h, _)| *h == hash) {
            Some(index) => index,
            None => {
                by_hash.push((hash, storage_config(mount_point, entry, options)));
                by_hash.len() - 1
            }
        };
        let config = &mut by_hash[index].1;
        match mount_type {
            MountType::User if applicable == ALL_USERS => {}
            MountType::User => push_unique(&mut config.applicable_users, applicable),
            MountType::Group => push_unique(&mut config.applicable_groups, applicable),
        }
    }
    by_hash.into_iter().map(|(_, config)| config).collect()
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|v| v == value) {
        list.push(value.to_string());
    }
}

/// Reject the root, the reserved folder and empty mount points; return the
/// normalized relative path.
pub fn validate_mount_point(mount_point: &str) -> Result<String, ConfigError> {
    let relative = normalize_path(mount_point);
    if relative.is_empty() || relative == RESERVED_FOLDER {
        return Err(ConfigError::InvalidMountPoint(mount_point.to_string()));
    }
    Ok(relative)
}

/// Key under which a mount point is stored for a scope.
pub fn stored_mount_point(scope: &MountScope, relative: &str) -> String {
    match scope {
        MountScope::System { .. } => format!("/{USER_PLACEHOLDER}/files/{relative}"),
        MountScope::Personal { user, .. } => format!("/{user}/files/{relative}"),
    }
}

/// Mount point relative to the user's file root, starting with `/`.
pub fn relative_mount_point(stored: &str) -> String {
    let trimmed = stored.trim_start_matches('/');
    let relative = match trimmed.split_once('/') {
        Some((_, rest)) => match rest.strip_prefix("files") {
            Some(tail) if tail.is_empty() || tail.starts_with('/') => tail,
            _ => rest,
        },
        None => trimmed,
    };
    normalize_mount_point(relative)
}

/// Replace `$user` with `uid`
pub fn substitute_user(value: &str, uid: &str) -> String {
    value.replace(USER_PLACEHOLDER, uid)
}

/// Replace `$user` in every string option, including strings inside arrays.
pub fn substitute_options(options: &mut BackendOptions, uid: &str) {
    for value in options.values_mut() {
        substitute_value(value, uid);
    }
}

fn substitute_value(value: &mut Value, uid: &str) {
    match value {
        Value::String(s) if s.contains(USER_PLACEHOLDER) => *s = substitute_user(s, uid),
        Value::Array(items) => items.iter_mut().for_each(|v| substitute_value(v, uid)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_mount_point() {
        assert!(validate_mount_point("").is_err());
        assert!(validate_mount_point("/").is_err());
        assert!(validate_mount_point("//").is_err());
        assert!(validate_mount_point("/Shared").is_err());
        assert!(validate_mount_point("Shared/").is_err());
        assert_eq!(validate_mount_point("/Shared/sub").unwrap(), "Shared/sub");
        assert_eq!(validate_mount_point("/ext/").unwrap(), "ext");
    }

    #[test]
    fn test_stored_and_relative_mount_points() {
        let system = stored_mount_point(&MountScope::group("staff"), "team/docs");
        assert_eq!(system, "/$user/files/team/docs");
        assert_eq!(relative_mount_point(&system), "/team/docs");

        let personal = stored_mount_point(&MountScope::personal("alice"), "ext");
        assert_eq!(personal, "/alice/files/ext");
        assert_eq!(relative_mount_point(&personal), "/ext");
    }

    #[test]
    fn test_substitution_reaches_arrays() {
        let mut options = BackendOptions::new();
        options.insert("root".into(), json!("/home/$user"));
        options.insert("paths".into(), json!(["/a/$user", 3]));
        options.insert("port".into(), json!(22));
        substitute_options(&mut options, "alice");
        assert_eq!(options["root"], "/home/alice");
        assert_eq!(options["paths"], json!(["/a/alice", 3]));
        assert_eq!(options["port"], 22);
    }

    #[test]
    fn test_coalesce_merges_applicables() {
        let mut table = MountTable::default();
        let mut entry = MountEntry::new("dav", BackendOptions::new());
        entry.id = Some(1);
        table.insert(MountType::Group, "g1", "/$user/files/x", entry.clone());
        table.insert(MountType::Group, "g2", "/$user/files/x", entry.clone());
        table.insert(MountType::User, "bob", "/$user/files/x", entry.clone());
        table.insert(MountType::User, ALL_USERS, "/$user/files/y", entry);

        let configs = coalesce(&table, |_, _| {});
        assert_eq!(configs.len(), 2);
        let x = configs.iter().find(|c| c.mount_point == "/x").unwrap();
        assert_eq!(x.applicable_groups, vec!["g1", "g2"]);
        assert_eq!(x.applicable_users, vec!["bob"]);
        let y = configs.iter().find(|c| c.mount_point == "/y").unwrap();
        assert!(y.is_global());
    }
}
