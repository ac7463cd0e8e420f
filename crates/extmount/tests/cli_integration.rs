#![allow(deprecated)] // cargo_bin! macro doesn't exist yet in assert_cmd 2.1

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const EXIT_NOT_FOUND: i32 = 3;
const EXIT_CONFIG_INVALID: i32 = 5;

fn extmount(config_dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("extmount").unwrap();
    cmd.env("EXTMOUNT_CONFIG_DIR", config_dir);
    cmd.env_remove("EXTMOUNT_LOGIN_PASSWORD");
    cmd.env_remove("RUST_LOG");
    cmd
}

/// Configuration directory with `extmount init` already run
fn initialized() -> TempDir {
    let dir = TempDir::new().expect("Failed to create config dir");
    extmount(dir.path()).arg("init").assert().success();
    dir
}

/// Local directory with a file and a subdirectory to mount
fn share() -> TempDir {
    let dir = TempDir::new().expect("Failed to create share dir");
    fs::write(dir.path().join("hello.txt"), "hello from the share\n").unwrap();
    fs::create_dir(dir.path().join("sub")).unwrap();
    dir
}

fn add_local(config_dir: &Path, mount_point: &str, share: &Path) {
    extmount(config_dir)
        .args(["add", mount_point, "local", "-o"])
        .arg(format!("datadir={}", share.display()))
        .assert()
        .success()
        .stderr(predicate::str::contains(format!("Added {mount_point}")));
}

#[test]
fn test_help() {
    let dir = TempDir::new().unwrap();
    extmount(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("verify"))
        .stdout(predicate::str::contains("resolve"));
}

#[test]
fn test_init_writes_config_once() {
    let dir = initialized();
    assert!(dir.path().join("config.toml").exists());
    assert!(dir.path().join("data").is_dir());

    extmount(dir.path())
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
    extmount(dir.path()).args(["init", "--force"]).assert().success();
}

#[test]
fn test_commands_need_config() {
    let dir = TempDir::new().unwrap();
    extmount(dir.path())
        .arg("list")
        .assert()
        .code(EXIT_CONFIG_INVALID)
        .stderr(predicate::str::contains("extmount init"));
}

#[test]
fn test_backends_json() {
    let dir = TempDir::new().unwrap();
    let output = extmount(dir.path())
        .args(["backends", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let value: serde_json::Value = serde_json::from_slice(&output).unwrap();
    let backends = value["backends"].as_object().unwrap();
    for id in ["local", "amazons3", "dav", "owncloud", "ftp", "swift", "dropbox", "googledrive"] {
        assert!(backends.contains_key(id), "missing backend {id}");
    }
    assert!(value["authMechanisms"].as_object().unwrap().contains_key("password::password"));
}

#[test]
fn test_add_list_remove() {
    let dir = initialized();
    let share = share();
    add_local(dir.path(), "/ext", share.path());

    extmount(dir.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("/ext"))
        .stdout(predicate::str::contains("local"))
        .stdout(predicate::str::contains("all"));

    let output = extmount(dir.path())
        .args(["list", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let value: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(value.as_array().unwrap().len(), 1);

    extmount(dir.path()).args(["remove", "/ext"]).assert().success();
    extmount(dir.path())
        .arg("list")
        .assert()
        .success()
        .stderr(predicate::str::contains("No mounts configured"));
}

#[test]
fn test_browse_through_mount() {
    let dir = initialized();
    let share = share();
    add_local(dir.path(), "/ext", share.path());

    extmount(dir.path())
        .args(["resolve", "alice"])
        .assert()
        .success()
        .stdout(predicate::str::contains("/ext"));

    extmount(dir.path())
        .args(["ls", "alice", "/ext"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hello.txt"))
        .stdout(predicate::str::contains("sub"));

    extmount(dir.path())
        .args(["cat", "alice", "/ext/hello.txt"])
        .assert()
        .success()
        .stdout("hello from the share\n");

    extmount(dir.path())
        .args(["verify", "alice"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ok"));
}

#[test]
fn test_user_scoped_mount_is_private() {
    let dir = initialized();
    let share = share();
    extmount(dir.path())
        .args(["add", "/mine", "local", "--user", "alice", "-o"])
        .arg(format!("datadir={}", share.path().display()))
        .assert()
        .success();

    extmount(dir.path())
        .args(["cat", "alice", "/mine/hello.txt"])
        .assert()
        .success();
    extmount(dir.path())
        .args(["cat", "bob", "/mine/hello.txt"])
        .assert()
        .code(EXIT_NOT_FOUND);
}

#[test]
fn test_exit_codes() {
    let dir = initialized();

    extmount(dir.path())
        .args(["add", "/x", "nosuchbackend"])
        .assert()
        .code(EXIT_CONFIG_INVALID);

    extmount(dir.path())
        .args(["remove", "/missing"])
        .assert()
        .code(EXIT_NOT_FOUND);

    extmount(dir.path())
        .args(["ls", "alice", "/nowhere"])
        .assert()
        .code(EXIT_NOT_FOUND);
}

#[test]
fn test_verify_reports_broken_mount() {
    let dir = initialized();
    let share = share();
    add_local(dir.path(), "/gone", share.path());
    let share_path = share.path().to_path_buf();
    drop(share);
    assert!(!share_path.exists());

    extmount(dir.path())
        .args(["verify", "alice"])
        .assert()
        .code(8)
        .stdout(predicate::str::contains("/gone"));
}
