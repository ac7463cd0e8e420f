//! List command - browse a directory through an external mount.
//!
//! # Examples
//!
//! ```bash
//! # Top of alice's SFTP mount, with sizes and dates
//! extmount ls alice /backup -l
//!
//! # Mount needing the login password
//! EXTMOUNT_LOGIN_PASSWORD=... extmount ls alice /dav --json
//! ```

use anyhow::{Result, bail};
use clap::Args as ClapArgs;
use extmount_core::storage::join_path;
use extmount_core::{FileType, Storage};
use serde::Serialize;
use tracing::instrument;

use super::locate;
use crate::output::{create_table, format_size, format_time, print_json};
use crate::workspace::Workspace;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// User whose file tree is browsed
    pub user: String,

    /// Directory in the user's files, inside an external mount
    pub path: String,

    /// Show type, size and modification time
    #[arg(short, long)]
    pub long: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct EntryInfo {
    name: String,
    #[serde(rename = "type")]
    entry_type: FileType,
    size: u64,
    mtime: i64,
}

#[instrument(level = "info", name = "cmd::ls", skip_all, fields(user = %args.user, path = %args.path))]
pub fn execute(workspace: &Workspace, args: &Args, login_password: Option<&str>) -> Result<()> {
    let (mount, inner) = locate(workspace, &args.user, &args.path, login_password)?;
    let storage = mount.storage();
    if storage.filetype(&inner)? != FileType::Dir {
        bail!("Not a directory: {}", args.path);
    }

    let mut names = storage.opendir(&inner)?;
    names.sort();

    if !args.long && !args.json {
        for name in &names {
            println!("{name}");
        }
        return Ok(());
    }

    let entries = names
        .into_iter()
        .map(|name| entry(storage.as_ref(), &inner, name))
        .collect::<Result<Vec<_>>>()?;

    if args.json {
        return print_json(&entries);
    }
    let mut table = create_table();
    table.set_header(vec!["Type", "Size", "Modified", "Name"]);
    for entry in &entries {
        let size = match entry.entry_type {
            FileType::Dir => "-".to_string(),
            FileType::File => format_size(entry.size),
        };
        table.add_row(vec![
            entry.entry_type.to_string(),
            size,
            format_time(entry.mtime),
            entry.name.clone(),
        ]);
    }
    println!("{table}");
    Ok(())
}

fn entry(storage: &dyn Storage, dir: &str, name: String) -> Result<EntryInfo> {
    let path = join_path(dir, &name);
    let stat = storage.stat(&path)?;
    Ok(EntryInfo {
        entry_type: storage.filetype(&path)?,
        size: stat.size,
        mtime: stat.mtime,
        name,
    })
}
