//! Add command - store a mount and test it.
//!
//! # Examples
//!
//! ```bash
//! # SFTP mount for everyone
//! extmount add /backup sftp -o host=files.example.com -o user=backup -o password=secret
//!
//! # Personal WebDAV mount using the login credentials
//! extmount add /dav dav --personal alice --auth password::sessioncredentials \
//!     -o host=dav.example.com -o secure=true
//! ```

use anyhow::Result;
use clap::Args as ClapArgs;
use extmount_core::{BackendOptions, MountOptions, NewMount, StorageStatus};
use serde_json::{Value, json};
use tracing::instrument;

use super::ScopeArgs;
use crate::output::{key_value_arg, print_json};
use crate::workspace::Workspace;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Mount point relative to the user's files, e.g. /backup
    pub mount_point: String,

    /// Backend identifier or legacy class name
    pub backend: String,

    /// Backend option as key=value (repeatable)
    #[arg(short = 'o', long = "option", value_name = "KEY=VALUE", value_parser = key_value_arg)]
    pub options: Vec<(String, Value)>,

    /// Mount option as key=value, e.g. read_only=true (repeatable)
    #[arg(short = 'm', long = "mount-option", value_name = "KEY=VALUE", value_parser = key_value_arg)]
    pub mount_options: Vec<(String, Value)>,

    /// Authentication mechanism (default: the backend's legacy mechanism)
    #[arg(long, value_name = "MECHANISM")]
    pub auth: Option<String>,

    /// Priority among overlapping mounts
    #[arg(long)]
    pub priority: Option<i32>,

    #[command(flatten)]
    pub scope: ScopeArgs,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

#[instrument(level = "info", name = "cmd::add", skip_all, fields(mount_point = %args.mount_point, backend = %args.backend))]
pub fn execute(workspace: &Workspace, args: &Args) -> Result<()> {
    let scope = args.scope.scope()?;
    let options: BackendOptions = args.options.iter().cloned().collect();
    let mut mount_options = MountOptions::default();
    for (key, value) in &args.mount_options {
        mount_options.set(key, value.clone());
    }

    let mut mount = NewMount::new(&args.mount_point, &args.backend, options);
    mount.auth_mechanism.clone_from(&args.auth);
    mount.priority = args.priority;
    mount.mount_options = mount_options;

    let status = workspace.mounts.add_mount_point(&mount, &scope)?;

    if args.json {
        return print_json(&json!({
            "mountPoint": args.mount_point,
            "backend": args.backend,
            "status": status.as_str(),
        }));
    }
    match status {
        StorageStatus::Success => eprintln!("Added {} ({})", args.mount_point, args.backend),
        StorageStatus::Indeterminate => eprintln!(
            "Added {} ({}); it cannot be tested until the user logs in",
            args.mount_point, args.backend
        ),
        StorageStatus::Error => eprintln!(
            "Added {} ({}), but the storage is not reachable with this configuration",
            args.mount_point, args.backend
        ),
    }
    Ok(())
}
