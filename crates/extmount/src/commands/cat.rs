use anyhow::Result;
use clap::Args as ClapArgs;
use std::io::{self, Write};
use tracing::instrument;

use super::locate;
use crate::workspace::Workspace;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// User whose file tree is read
    pub user: String,

    /// File in the user's files, inside an external mount
    pub file: String,
}

#[instrument(level = "info", name = "cmd::cat", skip_all, fields(user = %args.user, file = %args.file))]
pub fn execute(workspace: &Workspace, args: &Args, login_password: Option<&str>) -> Result<()> {
    let (mount, inner) = locate(workspace, &args.user, &args.file, login_password)?;
    let content = mount.storage().file_get_contents(&inner)?;
    io::stdout().write_all(&content)?;
    Ok(())
}
