//! List command - show stored mounts.
//!
//! # Examples
//!
//! ```bash
//! # System mounts, identical configurations merged
//! extmount list
//!
//! # A user's personal mounts with a connectivity test
//! extmount list --personal alice --test
//! ```

use anyhow::Result;
use clap::Args as ClapArgs;
use comfy_table::Cell;
use extmount_core::StorageConfig;
use tracing::instrument;

use crate::output::{create_table, print_json, status_cell};
use crate::workspace::Workspace;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// List the personal mounts of this user instead of system mounts
    #[arg(long, value_name = "UID")]
    pub personal: Option<String>,

    /// Test each mount and show its status
    #[arg(long)]
    pub test: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

#[instrument(level = "info", name = "cmd::list", skip_all, fields(personal = ?args.personal))]
pub fn execute(workspace: &Workspace, args: &Args) -> Result<()> {
    let mut configs = match &args.personal {
        Some(uid) => workspace.mounts.get_personal_mount_points(uid, args.test)?,
        None => workspace.mounts.get_system_mount_points(args.test)?,
    };
    for config in &mut configs {
        hide_secrets(config);
    }

    if args.json {
        return print_json(&configs);
    }
    if configs.is_empty() {
        eprintln!("No mounts configured.");
        return Ok(());
    }

    let mut table = create_table();
    let mut header = vec!["ID", "Mount point", "Backend", "Auth", "Applicable"];
    if args.test {
        header.push("Status");
    }
    table.set_header(header);
    for config in &configs {
        let mut row = vec![
            Cell::new(config.id.map_or_else(|| "-".to_string(), |id| id.to_string())),
            Cell::new(&config.mount_point),
            Cell::new(&config.backend_class),
            Cell::new(config.auth_mechanism.as_deref().unwrap_or("-")),
            Cell::new(applicable(config)),
        ];
        if args.test {
            row.push(status_cell(config.status));
        }
        table.add_row(row);
    }
    println!("{table}");
    Ok(())
}

fn applicable(config: &StorageConfig) -> String {
    if config.is_global() {
        return "all".to_string();
    }
    config
        .applicable_users
        .iter()
        .map(|u| format!("user:{u}"))
        .chain(config.applicable_groups.iter().map(|g| format!("group:{g}")))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Blank secrets so that listings never print them
fn hide_secrets(config: &mut StorageConfig) {
    for key in ["password", "private_key", "client_secret", "token", "secret", "key"] {
        if let Some(value) = config.backend_options.get_mut(key)
            && value.as_str().is_some_and(|s| !s.is_empty())
        {
            *value = serde_json::Value::String("***".to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hide_secrets_and_applicable() {
        let mut config = StorageConfig::new("/ext", "sftp")
            .with_option("host", "h")
            .with_option("password", "hunter2")
            .with_option("token", "");
        hide_secrets(&mut config);
        assert_eq!(config.backend_options["password"], "***");
        assert_eq!(config.backend_options["token"], "");
        assert_eq!(config.backend_options["host"], "h");
        assert_eq!(applicable(&config), "all");

        config.applicable_users.push("alice".into());
        config.applicable_groups.push("staff".into());
        assert_eq!(applicable(&config), "user:alice, group:staff");
    }
}
