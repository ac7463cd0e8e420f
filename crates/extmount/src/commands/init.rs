//! Init command - write a fresh system configuration.

use anyhow::{Context, Result, bail};
use clap::Args as ClapArgs;
use extmount_core::SystemConfig;
use std::path::{Path, PathBuf};
use tracing::instrument;

use crate::workspace::config_path;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Data directory holding mount tables (default: `data` next to the config file)
    #[arg(long, value_name = "DIR")]
    pub datadir: Option<PathBuf>,

    /// Disable personal mounts
    #[arg(long)]
    pub no_user_mounting: bool,

    /// Overwrite an existing configuration (stored passwords become unreadable)
    #[arg(long)]
    pub force: bool,
}

#[instrument(level = "info", name = "cmd::init", skip_all)]
pub fn execute(config: Option<&Path>, args: &Args) -> Result<()> {
    let path = config_path(config)?;
    if path.exists() && !args.force {
        bail!("{} already exists (use --force to replace it)", path.display());
    }

    let base = path.parent().map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    let datadir = match &args.datadir {
        Some(dir) if dir.is_absolute() => dir.clone(),
        Some(dir) => std::env::current_dir()
            .context("Failed to determine the current directory")?
            .join(dir),
        None => base.join("data"),
    };
    std::fs::create_dir_all(&datadir)
        .with_context(|| format!("Failed to create data directory {}", datadir.display()))?;

    let mut system = SystemConfig::generate(&datadir);
    system.allow_user_mounting = !args.no_user_mounting;
    system.save(&path)?;

    eprintln!("Wrote {}", path.display());
    eprintln!("Data directory: {}", datadir.display());
    Ok(())
}
