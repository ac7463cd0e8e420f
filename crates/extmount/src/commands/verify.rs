//! Verify command - connect to every mount a user sees.

use anyhow::Result;
use clap::Args as ClapArgs;
use comfy_table::Cell;
use extmount_core::mount::tester::classify;
use extmount_core::{Mount, StorageStatus};
use serde::Serialize;
use std::fmt;
use tracing::instrument;

use crate::output::{create_table, print_json, status_cell};
use crate::workspace::{Workspace, session};

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// User whose mounts are checked
    pub user: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Some mounts failed their check
#[derive(Debug)]
pub struct ChecksFailed {
    /// Number of failed mounts
    pub failed: usize,
}

impl fmt::Display for ChecksFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} mount(s) failed the connectivity check", self.failed)
    }
}

impl std::error::Error for ChecksFailed {}

#[derive(Serialize)]
struct CheckResult {
    mount_point: String,
    backend: String,
    personal: bool,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

fn check(mount: &Mount) -> (StorageStatus, Option<String>) {
    let backend = &mount.external().resolved().class;
    if let Some((message, _)) = mount.external().failure() {
        return (StorageStatus::Error, Some(message.to_string()));
    }
    match mount.storage().test() {
        Ok(()) => (StorageStatus::Success, None),
        Err(e) => {
            let message = e.to_string();
            (classify(backend, Err(e)), Some(message))
        }
    }
}

#[instrument(level = "info", name = "cmd::verify", skip_all, fields(user = %args.user))]
pub fn execute(workspace: &Workspace, args: &Args, login_password: Option<&str>) -> Result<()> {
    let session = session(&args.user, login_password);
    let mounts = workspace.provider().get_mounts_for_user(&args.user, session.as_ref())?;

    let results: Vec<(CheckResult, StorageStatus)> = mounts
        .iter()
        .map(|mount| {
            let (status, message) = check(mount);
            let result = CheckResult {
                mount_point: mount.mount_point().to_string(),
                backend: mount.external().resolved().class.clone(),
                personal: mount.is_personal(),
                status: status.as_str(),
                message,
            };
            (result, status)
        })
        .collect();

    if args.json {
        let rows: Vec<_> = results.iter().map(|(r, _)| r).collect();
        print_json(&rows)?;
    } else if results.is_empty() {
        eprintln!("No mounts for {}.", args.user);
    } else {
        let mut table = create_table();
        table.set_header(vec!["Mount point", "Backend", "Scope", "Status", "Detail"]);
        for (result, status) in &results {
            table.add_row(vec![
                Cell::new(&result.mount_point),
                Cell::new(&result.backend),
                Cell::new(if result.personal { "personal" } else { "system" }),
                status_cell(Some(*status)),
                Cell::new(result.message.as_deref().unwrap_or("")),
            ]);
        }
        println!("{table}");
    }

    let failed = results
        .iter()
        .filter(|(_, status)| *status == StorageStatus::Error)
        .count();
    if failed > 0 {
        return Err(ChecksFailed { failed }.into());
    }
    Ok(())
}
