#![deny(unsafe_code)]

mod commands;
mod exit_code;
mod output;
mod workspace;

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use extmount_core::{ConfigError, StorageError};

use crate::commands::verify::ChecksFailed;
use crate::commands::{add, backends, cat, init, list, ls, propagate, remove, resolve, verify};
use crate::workspace::Workspace;

/// Configure and inspect external storage mounts
#[derive(Parser)]
#[command(name = "extmount")]
#[command(author, version)]
#[command(propagate_version = true)]
#[command(after_help = "EXAMPLES:
    # Create the configuration (EXTMOUNT_CONFIG_DIR overrides the location)
    extmount init

    # Mount an S3 bucket for the staff group
    extmount add /archive amazons3 --group staff -o bucket=archive -o key=AKIA... -o secret=...

    # What alice sees, and whether it works
    extmount resolve alice
    extmount verify alice

    # Browse through a mount
    extmount ls alice /archive -l
")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Configuration file (default: config.toml in the configuration directory)
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Login password of the user, for mounts using session credentials
    #[arg(long, env = "EXTMOUNT_LOGIN_PASSWORD", hide_env_values = true, global = true)]
    login_password: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the system configuration
    Init(init::Args),

    /// List storage backends and authentication mechanisms
    Backends(backends::Args),

    /// List configured mounts
    List(list::Args),

    /// Add a mount
    Add(add::Args),

    /// Remove a mount
    Remove(remove::Args),

    /// Show the merged mounts of a user
    Resolve(resolve::Args),

    /// Test every mount of a user
    Verify(verify::Args),

    /// List a directory through a mount
    Ls(ls::Args),

    /// Print a file read through a mount
    Cat(cat::Args),

    /// Refresh etags of changed group and global mounts for a user
    Propagate(propagate::Args),
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::from(exit_code::SUCCESS),
        Err(e) => {
            let code = categorize_error(&e);

            let args: Vec<String> = std::env::args().collect();
            let is_quiet = args.iter().any(|a| a == "-q" || a == "--quiet");
            if !is_quiet {
                eprintln!("Error: {e:#}");
            }

            ExitCode::from(code)
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    if !cli.quiet {
        setup_tracing(cli.verbose);
    }

    let config = cli.config.as_deref();
    let password = cli.login_password.as_deref();
    let load = || Workspace::load(config);
    match &cli.command {
        Commands::Init(args) => init::execute(config, args),
        Commands::Backends(args) => backends::execute(args),
        Commands::List(args) => list::execute(&load()?, args),
        Commands::Add(args) => add::execute(&load()?, args),
        Commands::Remove(args) => remove::execute(&load()?, args),
        Commands::Resolve(args) => resolve::execute(&load()?, args),
        Commands::Verify(args) => verify::execute(&load()?, args, password),
        Commands::Ls(args) => ls::execute(&load()?, args, password),
        Commands::Cat(args) => cat::execute(&load()?, args, password),
        Commands::Propagate(args) => propagate::execute(&load()?, args),
    }
}

/// Set up tracing/logging based on verbosity level
fn setup_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(io::stderr)
        .init();
}

fn storage_exit_code(err: &StorageError) -> Option<u8> {
    match err {
        StorageError::NotFound(_) => Some(exit_code::NOT_FOUND),
        StorageError::PermissionDenied(_) => Some(exit_code::PERMISSION_DENIED),
        StorageError::Unauthorized(_) | StorageError::HostKeyMismatch { .. } => {
            Some(exit_code::AUTH_FAILED)
        }
        StorageError::NotAvailable { .. } | StorageError::Timeout(_) => Some(exit_code::UNAVAILABLE),
        StorageError::InvalidConfig(_) => Some(exit_code::CONFIG_INVALID),
        StorageError::Io(io_err) => io_exit_code(io_err),
        _ => None,
    }
}

fn io_exit_code(err: &io::Error) -> Option<u8> {
    match err.kind() {
        io::ErrorKind::PermissionDenied => Some(exit_code::PERMISSION_DENIED),
        io::ErrorKind::NotFound => Some(exit_code::NOT_FOUND),
        _ => None,
    }
}

/// Categorize an error into an exit code using typed error downcasting
fn categorize_error(e: &anyhow::Error) -> u8 {
    for cause in e.chain() {
        if cause.downcast_ref::<ChecksFailed>().is_some() {
            return exit_code::CHECK_FAILED;
        }

        if let Some(config_err) = cause.downcast_ref::<ConfigError>() {
            return match config_err {
                ConfigError::MountNotFound(_) => exit_code::NOT_FOUND,
                _ => exit_code::CONFIG_INVALID,
            };
        }

        if let Some(storage_err) = cause.downcast_ref::<StorageError>()
            && let Some(code) = storage_exit_code(storage_err)
        {
            return code;
        }

        if let Some(io_err) = cause.downcast_ref::<io::Error>()
            && let Some(code) = io_exit_code(io_err)
        {
            return code;
        }
    }
    exit_code::GENERAL_ERROR
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_categorize_error() {
        let not_found = anyhow::Error::from(StorageError::NotFound("/x".into()));
        assert_eq!(categorize_error(&not_found), exit_code::NOT_FOUND);

        let auth = anyhow::Error::from(StorageError::Unauthorized("nope".into()))
            .context("Failed to list");
        assert_eq!(categorize_error(&auth), exit_code::AUTH_FAILED);

        let rejected = anyhow::Error::from(ConfigError::UnknownBackend("nfs".into()));
        assert_eq!(categorize_error(&rejected), exit_code::CONFIG_INVALID);

        let missing = anyhow::Error::from(ConfigError::MountNotFound("/x".into()));
        assert_eq!(categorize_error(&missing), exit_code::NOT_FOUND);

        let checks = anyhow::Error::from(ChecksFailed { failed: 2 });
        assert_eq!(categorize_error(&checks), exit_code::CHECK_FAILED);

        assert_eq!(categorize_error(&anyhow::anyhow!("boom")), exit_code::GENERAL_ERROR);
    }
}
