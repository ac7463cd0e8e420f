//! Propagate command - catch a user up on changed group and global mounts.
//!
//! Mount changes that affect many users are only recorded as dirty; the
//! etags of the user's view are refreshed the next time they are resolved.

use anyhow::Result;
use clap::Args as ClapArgs;
use extmount_core::storage::unix_now;
use tracing::instrument;

use crate::output::print_json;
use crate::workspace::Workspace;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// User to propagate changes for
    pub user: String,

    /// Output the propagated mount points as JSON
    #[arg(long)]
    pub json: bool,
}

#[instrument(level = "info", name = "cmd::propagate", skip_all, fields(user = %args.user))]
pub fn execute(workspace: &Workspace, args: &Args) -> Result<()> {
    let mount_points: Vec<String> = workspace
        .mounts
        .get_absolute_mount_points(&args.user)?
        .into_keys()
        .collect();
    let propagated = workspace
        .etag
        .propagate_dirty_mount_points(&args.user, &mount_points, unix_now())?;

    if args.json {
        return print_json(&propagated);
    }
    if propagated.is_empty() {
        eprintln!("Nothing to propagate for {}.", args.user);
    }
    for mount_point in &propagated {
        println!("{mount_point}");
    }
    Ok(())
}
