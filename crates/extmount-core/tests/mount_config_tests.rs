//! Integration tests for mount storage, resolution and live mounts.
//!
//! A `fake` backend backed by a local directory stands in for a remote
//! service; a host named `down` makes its construction fail.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p extmount-core --test mount_config_tests
//! ```

use extmount_core::config::StaticUserDirectory;
use extmount_core::definition::auth::{mechanism, scheme};
use extmount_core::definition::{DefinitionParameter, SessionCredentials};
use extmount_core::mount::store::{ALL_USERS, MountEntry, MountTableFile, MountType};
use extmount_core::mount::{
    ConnectivityTester, MountEvent, MountHook, MountSignal, NoopTester, TimeoutTester,
    list_external_mounts,
};
use extmount_core::registry::LOCAL_BACKEND;
use extmount_core::storage::error::code;
use extmount_core::etag::{ChangeLog, MemoryPreferenceStore};
use extmount_core::storage::LocalStorage;
use extmount_core::{
    EtagPropagator,
    BackendDefinition, BackendOptions, BackendRegistry, ConfigError, Mount, MountConfig,
    MountProvider, MountScope, NewMount, Storage, StorageError, StorageStatus, SystemConfig,
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

// ============================================================================
// Test Helpers
// ============================================================================

#[derive(Default)]
struct RecordingHook {
    events: Mutex<Vec<MountEvent>>,
}

impl MountHook for RecordingHook {
    fn on_mount_event(&self, event: &MountEvent) {
        self.events.lock().push(event.clone());
    }
}

fn fake_backend() -> BackendDefinition {
    BackendDefinition::new("fake", "Fake remote", |options, _| {
        let host = options.get("host").and_then(Value::as_str).unwrap_or_default();
        if host == "down" {
            return Err(StorageError::not_available(
                "host down is unreachable",
                code::NETWORK_ERROR,
            ));
        }
        let root = options.get("root").and_then(Value::as_str).unwrap_or_default();
        Ok(Arc::new(LocalStorage::new(root)) as Arc<dyn Storage>)
    })
    .with_alias("\\OC\\Files\\Storage\\Fake")
    .with_parameter(DefinitionParameter::new("host", "Host"))
    .with_parameter(DefinitionParameter::new("root", "Root").optional())
    .with_parameter(DefinitionParameter::new("password", "Password").password().optional())
    .with_auth_schemes(&[scheme::BUILTIN, scheme::PASSWORD])
}

struct Env {
    dir: TempDir,
    config: Arc<MountConfig>,
    hook: Arc<RecordingHook>,
}

impl Env {
    fn new(tester: Arc<dyn ConnectivityTester>) -> Self {
        Self::with_hooks(tester, Vec::new())
    }

    fn with_hooks(tester: Arc<dyn ConnectivityTester>, extra: Vec<Arc<dyn MountHook>>) -> Self {
        let dir = TempDir::new().unwrap();
        let mut system = SystemConfig::generate(dir.path().join("data"));
        system.users = StaticUserDirectory::new()
            .with_user("alice", &["staff"])
            .with_user("bob", &[]);
        let users = Arc::new(system.users.clone());

        let mut registry = BackendRegistry::with_builtin();
        registry.register_backend(fake_backend()).unwrap();

        let hook = Arc::new(RecordingHook::default());
        let mut config = MountConfig::new(system, Arc::new(registry), users)
            .unwrap()
            .with_tester(tester);
        config.add_hook(hook.clone());
        for extra_hook in extra {
            config.add_hook(extra_hook);
        }
        Self {
            dir,
            config: Arc::new(config),
            hook,
        }
    }

    fn noop() -> Self {
        Self::new(Arc::new(NoopTester))
    }

    fn remote_dir(&self, name: &str) -> PathBuf {
        let path = self.dir.path().join("remote").join(name);
        std::fs::create_dir_all(&path).unwrap();
        path
    }

    fn mount_file(&self) -> PathBuf {
        self.config.system().mount_file()
    }

    fn events(&self) -> Vec<MountEvent> {
        self.hook.events.lock().clone()
    }
}

fn fake_mount(mount_point: &str, host: &str) -> NewMount {
    let mut options = BackendOptions::new();
    options.insert("host".into(), json!(host));
    NewMount::new(mount_point, "fake", options)
}

fn fake_mount_at(mount_point: &str, root: &Path) -> NewMount {
    let mut mount = fake_mount(mount_point, "remote.example");
    mount
        .options
        .insert("root".into(), json!(root.to_str().unwrap()));
    mount
}

fn read_raw(path: &Path) -> Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

// ============================================================================
// Resolution
// ============================================================================

#[test]
fn test_merge_precedence_personal_wins() {
    let env = Env::noop();
    let config = &env.config;
    config.add_mount_point(&fake_mount("X", "global"), &MountScope::all()).unwrap();
    config.add_mount_point(&fake_mount("X", "group"), &MountScope::group("staff")).unwrap();

    let mounts = config.get_absolute_mount_points("alice").unwrap();
    assert_eq!(mounts["/alice/files/X"].options["host"], "group");

    config.add_mount_point(&fake_mount("X", "user"), &MountScope::user("alice")).unwrap();
    let mounts = config.get_absolute_mount_points("alice").unwrap();
    assert_eq!(mounts["/alice/files/X"].options["host"], "user");

    config
        .add_mount_point(&fake_mount("X", "personal"), &MountScope::personal("alice"))
        .unwrap();
    let mounts = config.get_absolute_mount_points("alice").unwrap();
    assert_eq!(mounts.len(), 1);
    let resolved = &mounts["/alice/files/X"];
    assert_eq!(resolved.class, "fake");
    assert_eq!(resolved.options["host"], "personal");
    assert!(resolved.personal);

    // bob is in no group and sees only the global mount
    let bob = config.get_absolute_mount_points("bob").unwrap();
    assert_eq!(bob["/bob/files/X"].options["host"], "global");
}

#[test]
fn test_user_mounts_match_case_insensitively() {
    let env = Env::noop();
    env.config
        .add_mount_point(&fake_mount("docs", "h"), &MountScope::user("Alice"))
        .unwrap();
    let mounts = env.config.get_absolute_mount_points("alice").unwrap();
    assert!(mounts.contains_key("/alice/files/docs"));
}

#[test]
fn test_user_placeholder_substitution() {
    let env = Env::noop();
    let file = MountTableFile::new(env.mount_file(), Duration::from_secs(1));
    file.update(|table| {
        let mut options = BackendOptions::new();
        options.insert("host".into(), json!("h"));
        options.insert("root".into(), json!("/home/$user"));
        table.insert(MountType::Group, "staff", "/$user/external", MountEntry::new("fake", options));
        Ok(())
    })
    .unwrap();

    let mounts = env.config.get_absolute_mount_points("alice").unwrap();
    let resolved = &mounts["/alice/external"];
    assert_eq!(resolved.options["root"], "/home/alice");
}

// ============================================================================
// Adding and removing
// ============================================================================

#[test]
fn test_root_and_shared_rejected_without_mutation() {
    let env = Env::noop();
    for mount_point in ["/", "", "/Shared"] {
        let err = env
            .config
            .add_mount_point(&fake_mount(mount_point, "h"), &MountScope::all())
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidMountPoint(_)), "{mount_point:?}");
    }
    assert!(!env.mount_file().exists());
    assert!(env.events().is_empty());
}

#[test]
fn test_unknown_backend_rejected() {
    let env = Env::noop();
    let err = env
        .config
        .add_mount_point(&NewMount::new("x", "nope", BackendOptions::new()), &MountScope::all())
        .unwrap_err();
    assert!(matches!(err, ConfigError::UnknownBackend(_)));
    assert!(!env.mount_file().exists());
}

#[test]
fn test_personal_restrictions() {
    let env = Env::noop();
    let mut options = BackendOptions::new();
    options.insert("datadir".into(), json!("/"));
    let local = NewMount::new("host", LOCAL_BACKEND, options);

    let err = env
        .config
        .add_mount_point(&local, &MountScope::personal("alice"))
        .unwrap_err();
    assert!(matches!(err, ConfigError::BackendNotAllowed(_)));

    let foreign = MountScope::Personal {
        acting_user: "alice".into(),
        user: "bob".into(),
    };
    let err = env
        .config
        .add_mount_point(&fake_mount("ext", "h"), &foreign)
        .unwrap_err();
    assert!(matches!(err, ConfigError::ForeignUser { .. }));

    assert!(!env.config.system().personal_mount_file("alice").exists());
    assert!(!env.config.system().personal_mount_file("bob").exists());
    assert!(env.config.get_absolute_mount_points("bob").unwrap().is_empty());
}

#[test]
fn test_forbidden_personal_backends_skipped_at_resolution() {
    let env = Env::noop();
    let file = MountTableFile::new(
        env.config.system().personal_mount_file("alice"),
        Duration::from_secs(1),
    );
    file.update(|table| {
        let mut local = BackendOptions::new();
        local.insert("datadir".into(), json!("/"));
        table.insert(MountType::User, "alice", "/alice/files/host", MountEntry::new(LOCAL_BACKEND, local));
        table.insert(MountType::User, "alice", "/alice/files/gone", MountEntry::new("nope", BackendOptions::new()));
        let mut fake = BackendOptions::new();
        fake.insert("host".into(), json!("h"));
        table.insert(MountType::User, "alice", "/alice/files/ext", MountEntry::new("fake", fake));
        Ok(())
    })
    .unwrap();

    let mounts = env.config.get_absolute_mount_points("alice").unwrap();
    assert_eq!(mounts.keys().collect::<Vec<_>>(), vec!["/alice/files/ext"]);
    assert!(mounts["/alice/files/ext"].personal);
}

#[test]
fn test_local_backend_allowed_for_admins() {
    let env = Env::noop();
    let root = env.remote_dir("local");
    let mut options = BackendOptions::new();
    options.insert("datadir".into(), json!(root.to_str().unwrap()));
    env.config
        .add_mount_point(&NewMount::new("srv", LOCAL_BACKEND, options), &MountScope::all())
        .unwrap();

    let raw = read_raw(&env.mount_file());
    assert_eq!(raw["user"][ALL_USERS]["/$user/files/srv"]["priority"], 150);
}

#[test]
fn test_passwords_encrypted_at_rest() {
    let env = Env::noop();
    let mut mount = fake_mount("secure", "h");
    mount.options.insert("password".into(), json!("hunter2"));
    env.config.add_mount_point(&mount, &MountScope::all()).unwrap();

    let raw = read_raw(&env.mount_file());
    let stored = &raw["user"]["all"]["/$user/files/secure"]["options"];
    assert_eq!(stored["password"], "");
    assert!(stored["password_encrypted"].as_str().is_some_and(|s| !s.is_empty()));
    assert!(!std::fs::read_to_string(env.mount_file()).unwrap().contains("hunter2"));

    let mounts = env.config.get_absolute_mount_points("alice").unwrap();
    let options = &mounts["/alice/files/secure"].options;
    assert_eq!(options["password"], "hunter2");
    assert!(options.get("password_encrypted").is_none());
}

#[test]
fn test_legacy_plaintext_password_accepted() {
    let env = Env::noop();
    let file = MountTableFile::new(env.mount_file(), Duration::from_secs(1));
    file.update(|table| {
        let mut options = BackendOptions::new();
        options.insert("host".into(), json!("h"));
        options.insert("password".into(), json!("plain"));
        table.insert(MountType::User, ALL_USERS, "/$user/files/old", MountEntry::new("fake", options));
        Ok(())
    })
    .unwrap();
    let mounts = env.config.get_absolute_mount_points("bob").unwrap();
    assert_eq!(mounts["/bob/files/old"].options["password"], "plain");
}

#[test]
fn test_ids_and_priority_kept_on_update() {
    let env = Env::noop();
    let mut first = fake_mount("a", "h");
    first.priority = Some(42);
    env.config.add_mount_point(&first, &MountScope::all()).unwrap();
    env.config.add_mount_point(&fake_mount("b", "h"), &MountScope::all()).unwrap();
    env.config.add_mount_point(&fake_mount("a", "other"), &MountScope::all()).unwrap();

    let raw = read_raw(&env.mount_file());
    let all = &raw["user"]["all"];
    assert_eq!(all["/$user/files/a"]["id"], 1);
    assert_eq!(all["/$user/files/b"]["id"], 2);
    assert_eq!(all["/$user/files/a"]["priority"], 42);
    assert_eq!(all["/$user/files/a"]["options"]["host"], "other");
    assert_eq!(all["/$user/files/b"]["priority"], 100);
}

#[test]
fn test_create_hook_only_for_new_successful_mounts() {
    let env = Env::new(Arc::new(TimeoutTester::new(Duration::from_secs(5))));
    let root = env.remote_dir("ok");

    let status = env
        .config
        .add_mount_point(&fake_mount_at("ok", &root), &MountScope::group("staff"))
        .unwrap();
    assert_eq!(status, StorageStatus::Success);

    let status = env
        .config
        .add_mount_point(&fake_mount_at("ok", &root), &MountScope::group("staff"))
        .unwrap();
    assert_eq!(status, StorageStatus::Success);

    let status = env
        .config
        .add_mount_point(&fake_mount("broken", "down"), &MountScope::all())
        .unwrap();
    assert_eq!(status, StorageStatus::Error);

    let events = env.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].signal, MountSignal::Create);
    assert_eq!(events[0].path, "/$user/files/ok");
    assert_eq!(events[0].mount_type, MountType::Group);
    assert_eq!(events[0].users, "staff");

    // Broken mounts are still stored
    assert!(env.config.get_absolute_mount_points("bob").unwrap().contains_key("/bob/files/broken"));
}

#[test]
fn test_remove_prunes_and_emits() {
    let env = Env::noop();
    env.config.add_mount_point(&fake_mount("team", "h"), &MountScope::group("staff")).unwrap();
    env.config.remove_mount_point("/team", &MountScope::group("staff")).unwrap();

    let raw = read_raw(&env.mount_file());
    assert!(raw.get("group").is_none());
    let last = env.events().pop().unwrap();
    assert_eq!(last.signal, MountSignal::Delete);
    assert_eq!(last.path, "/$user/files/team");

    let err = env
        .config
        .remove_mount_point("/team", &MountScope::group("staff"))
        .unwrap_err();
    assert!(matches!(err, ConfigError::MountNotFound(_)));
}

// ============================================================================
// Status and listings
// ============================================================================

#[test]
fn test_backend_status_never_fails() {
    let env = Env::new(Arc::new(TimeoutTester::new(Duration::from_secs(5))));
    let mut options = BackendOptions::new();
    options.insert("host".into(), json!("down"));
    assert_eq!(
        env.config.get_backend_status("fake", &options, None, None, None),
        StorageStatus::Error
    );
    assert_eq!(
        env.config.get_backend_status("missing", &options, None, None, None),
        StorageStatus::Error
    );
    assert_eq!(
        env.config.get_backend_status(
            "fake",
            &options,
            Some(mechanism::SESSION_CREDENTIALS),
            Some("alice"),
            None
        ),
        StorageStatus::Indeterminate
    );
}

#[test]
fn test_system_mounts_coalesced_by_hash() {
    let env = Env::noop();
    let mount = fake_mount("shared-docs", "h");
    env.config.add_mount_point(&mount, &MountScope::group("staff")).unwrap();
    env.config.add_mount_point(&mount, &MountScope::group("ops")).unwrap();
    env.config.add_mount_point(&mount, &MountScope::user("carol")).unwrap();
    env.config.add_mount_point(&fake_mount("shared-docs", "other"), &MountScope::group("x")).unwrap();

    let configs = env.config.get_system_mount_points(false).unwrap();
    assert_eq!(configs.len(), 2);
    let merged = configs
        .iter()
        .find(|c| c.backend_options["host"] == "h")
        .unwrap();
    assert_eq!(merged.mount_point, "/shared-docs");
    assert_eq!(merged.applicable_users, vec!["carol"]);
    let mut groups = merged.applicable_groups.clone();
    groups.sort();
    assert_eq!(groups, vec!["ops", "staff"]);
}

#[test]
fn test_personal_mount_listing_and_status() {
    let env = Env::new(Arc::new(TimeoutTester::new(Duration::from_secs(5))));
    let root = env.remote_dir("alice-ext");
    env.config
        .add_mount_point(&fake_mount_at("ext", &root), &MountScope::personal("alice"))
        .unwrap();

    let configs = env.config.get_personal_mount_points("alice", true).unwrap();
    assert_eq!(configs.len(), 1);
    assert_eq!(configs[0].mount_point, "/ext");
    assert_eq!(configs[0].status, Some(StorageStatus::Success));
}

#[test]
fn test_external_mount_entries() {
    let env = Env::noop();
    let mut system = fake_mount("team/docs", "h");
    system.options.insert("password".into(), json!("admin-secret"));
    env.config.add_mount_point(&system, &MountScope::group("staff")).unwrap();
    let mut personal = fake_mount("mine", "h");
    personal.options.insert("password".into(), json!("my-secret"));
    env.config.add_mount_point(&personal, &MountScope::personal("alice")).unwrap();

    let entries = list_external_mounts(&env.config, "alice").unwrap();
    assert_eq!(entries.len(), 2);

    let mine = entries.iter().find(|e| e.name == "mine").unwrap();
    let value = serde_json::to_value(mine).unwrap();
    assert_eq!(value["type"], "dir");
    assert_eq!(value["scope"], "personal");
    assert_eq!(value["path"], "");
    assert_eq!(value["backend"], "Fake remote");
    assert_eq!(value["permissions"], 1 | 8);
    assert_eq!(value["config"]["backendOptions"]["password"], "my-secret");

    let docs = entries.iter().find(|e| e.name == "docs").unwrap();
    assert_eq!(docs.path, "/team");
    assert_eq!(docs.permissions, 1);
    assert_eq!(docs.config.backend_options["password"], "");
}

// ============================================================================
// Live mounts
// ============================================================================

#[test]
fn test_failed_backend_becomes_failed_storage() {
    let env = Env::noop();
    env.config.add_mount_point(&fake_mount("broken", "down"), &MountScope::all()).unwrap();
    let root = env.remote_dir("fine");
    env.config.add_mount_point(&fake_mount_at("fine", &root), &MountScope::all()).unwrap();

    let provider = MountProvider::new(Arc::clone(&env.config));
    let mounts = provider.get_mounts_for_user("bob", None).unwrap();
    assert_eq!(mounts.len(), 2);

    let broken = mounts.iter().find(|m| m.mount_point() == "/bob/files/broken").unwrap();
    let (message, failure_code) = broken.external().failure().unwrap();
    assert_eq!(message, "host down is unreachable");
    assert_eq!(failure_code, code::NETWORK_ERROR);
    match broken.storage().mkdir("x") {
        Err(StorageError::NotAvailable { message, code: c }) => {
            assert_eq!(message, "host down is unreachable");
            assert_eq!(c, code::NETWORK_ERROR);
        }
        other => panic!("unexpected {other:?}"),
    }

    let fine = mounts.iter().find(|m| m.mount_point() == "/bob/files/fine").unwrap();
    assert!(fine.external().failure().is_none());
    fine.storage().mkdir("x").unwrap();
    assert!(root.join("x").is_dir());
}

#[test]
fn test_read_only_mount_option_masks_writes() {
    let env = Env::noop();
    let root = env.remote_dir("ro");
    std::fs::write(root.join("file.txt"), b"content").unwrap();
    let mut mount = fake_mount_at("ro", &root);
    mount.mount_options.set("read_only", true);
    env.config.add_mount_point(&mount, &MountScope::all()).unwrap();

    let provider = MountProvider::new(Arc::clone(&env.config));
    let mounts = provider.get_mounts_for_user("bob", None).unwrap();
    let storage = mounts[0].storage();
    assert_eq!(storage.file_get_contents("file.txt").unwrap(), b"content");
    assert!(matches!(storage.mkdir("new"), Err(StorageError::PermissionDenied(_))));
    assert!(matches!(storage.unlink("file.txt"), Err(StorageError::PermissionDenied(_))));
    assert!(root.join("file.txt").exists());
}

#[test]
fn test_session_credentials_mount() {
    let env = Env::noop();
    let root = env.remote_dir("sess");
    let mut mount = fake_mount_at("sess", &root);
    mount.auth_mechanism = Some(mechanism::SESSION_CREDENTIALS.to_string());
    env.config.add_mount_point(&mount, &MountScope::all()).unwrap();
    let provider = MountProvider::new(Arc::clone(&env.config));

    let without = provider.get_mounts_for_user("alice", None).unwrap();
    let (_, failure_code) = without[0].external().failure().unwrap();
    assert_eq!(failure_code, code::INDETERMINATE);

    let session = SessionCredentials::new("alice", "pw");
    let with = provider.get_mounts_for_user("alice", Some(&session)).unwrap();
    assert!(with[0].external().failure().is_none());
    assert_eq!(with[0].external().resolved().auth_mechanism.as_deref(), Some(mechanism::SESSION_CREDENTIALS));
    assert!(!with[0].storage().is_sharable("").unwrap());
}

#[test]
fn test_personal_mount_move_and_remove() {
    let env = Env::noop();
    let root = env.remote_dir("p");
    env.config
        .add_mount_point(&fake_mount_at("old", &root), &MountScope::personal("alice"))
        .unwrap();
    let provider = MountProvider::new(Arc::clone(&env.config));

    let mut mounts = provider.get_mounts_for_user("alice", None).unwrap();
    let Some(Mount::Personal(mut personal)) = mounts.pop() else {
        panic!("expected a personal mount");
    };
    personal.move_mount("/alice/files/new").unwrap();
    assert_eq!(personal.mount_point(), "/alice/files/new");

    let resolved = env.config.get_absolute_mount_points("alice").unwrap();
    assert!(resolved.contains_key("/alice/files/new"));
    assert!(!resolved.contains_key("/alice/files/old"));
    let id_after_move = resolved["/alice/files/new"].id;
    assert_eq!(id_after_move, Some(1));

    personal.remove_mount().unwrap();
    assert!(env.config.get_absolute_mount_points("alice").unwrap().is_empty());
}

#[test]
fn test_find_mount_prefers_longest_prefix() {
    let env = Env::noop();
    let outer = env.remote_dir("outer");
    let inner = env.remote_dir("inner");
    env.config.add_mount_point(&fake_mount_at("a", &outer), &MountScope::all()).unwrap();
    env.config.add_mount_point(&fake_mount_at("a/b", &inner), &MountScope::all()).unwrap();
    let provider = MountProvider::new(Arc::clone(&env.config));

    let (mount, rest) = provider.find_mount("bob", "/a/b/c.txt", None).unwrap().unwrap();
    assert_eq!(mount.mount_point(), "/bob/files/a/b");
    assert_eq!(rest, "c.txt");

    let (mount, rest) = provider.find_mount("bob", "/a", None).unwrap().unwrap();
    assert_eq!(mount.mount_point(), "/bob/files/a");
    assert_eq!(rest, "");

    assert!(provider.find_mount("bob", "/elsewhere", None).unwrap().is_none());
}

// ============================================================================
// Etag propagation
// ============================================================================

#[test]
fn test_group_mount_marked_dirty_until_propagated() {
    let prefs = Arc::new(MemoryPreferenceStore::new());
    let log = Arc::new(ChangeLog::new());
    let etags = Arc::new(EtagPropagator::new(prefs, log.clone()));
    let env = Env::with_hooks(
        Arc::new(TimeoutTester::new(Duration::from_secs(5))),
        vec![etags.clone() as Arc<dyn MountHook>],
    );
    let root = env.remote_dir("team");
    env.config
        .add_mount_point(&fake_mount_at("team", &root), &MountScope::group("staff"))
        .unwrap();
    // Group mounts are deferred
    assert!(log.propagated().is_empty());

    let mount_points: Vec<String> = env
        .config
        .get_absolute_mount_points("alice")
        .unwrap()
        .into_keys()
        .collect();
    let far_future = i64::MAX / 2;
    let propagated = etags
        .propagate_dirty_mount_points("alice", &mount_points, far_future)
        .unwrap();
    assert_eq!(propagated, vec!["/alice/files/team".to_string()]);
    assert_eq!(log.propagated(), vec![("/alice/files/team".to_string(), far_future)]);

    // Nothing left for alice
    assert!(etags.dirty_mount_points("alice", &mount_points).is_empty());
}

#[test]
fn test_user_mount_propagated_immediately() {
    let prefs = Arc::new(MemoryPreferenceStore::new());
    let log = Arc::new(ChangeLog::new());
    let etags = Arc::new(EtagPropagator::new(prefs, log.clone()));
    let env = Env::with_hooks(
        Arc::new(TimeoutTester::new(Duration::from_secs(5))),
        vec![etags as Arc<dyn MountHook>],
    );
    let root = env.remote_dir("solo");
    env.config
        .add_mount_point(&fake_mount_at("solo", &root), &MountScope::user("bob"))
        .unwrap();

    let propagated = log.propagated();
    assert_eq!(propagated.len(), 1);
    assert_eq!(propagated[0].0, "/bob/files/solo");
}
