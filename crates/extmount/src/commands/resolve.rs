//! Resolve command - the merged mount table of a user.
//!
//! Shows what the file browser lists: global, group, user and personal
//! mounts merged by mount point, with `$user` substituted.

use anyhow::Result;
use clap::Args as ClapArgs;
use extmount_core::mount::{MountScopeKind, list_external_mounts};
use tracing::instrument;

use crate::output::{create_table, print_json};
use crate::workspace::Workspace;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// User to resolve mounts for
    pub user: String,

    /// Output the file-browser entries as JSON
    #[arg(long)]
    pub json: bool,
}

#[instrument(level = "info", name = "cmd::resolve", skip_all, fields(user = %args.user))]
pub fn execute(workspace: &Workspace, args: &Args) -> Result<()> {
    let entries = list_external_mounts(&workspace.mounts, &args.user)?;

    if args.json {
        return print_json(&entries);
    }
    if entries.is_empty() {
        eprintln!("No mounts for {}.", args.user);
        return Ok(());
    }

    let mut table = create_table();
    table.set_header(vec!["Mount point", "Backend", "Scope", "Priority"]);
    for entry in &entries {
        let scope = match entry.scope {
            MountScopeKind::Personal => "personal",
            MountScopeKind::System => "system",
        };
        table.add_row(vec![
            entry.config.mount_point.clone(),
            entry.backend.clone(),
            scope.to_string(),
            entry.config.priority.map_or_else(|| "-".to_string(), |p| p.to_string()),
        ]);
    }
    println!("{table}");
    Ok(())
}
