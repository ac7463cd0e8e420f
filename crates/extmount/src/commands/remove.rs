use anyhow::Result;
use clap::Args as ClapArgs;
use tracing::instrument;

use super::ScopeArgs;
use crate::workspace::Workspace;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Mount point to remove
    pub mount_point: String,

    #[command(flatten)]
    pub scope: ScopeArgs,
}

#[instrument(level = "info", name = "cmd::remove", skip_all, fields(mount_point = %args.mount_point))]
pub fn execute(workspace: &Workspace, args: &Args) -> Result<()> {
    let scope = args.scope.scope()?;
    workspace.mounts.remove_mount_point(&args.mount_point, &scope)?;
    eprintln!("Removed {}", args.mount_point);
    Ok(())
}
