//! Backends command - list storage backends and auth mechanisms.

use anyhow::Result;
use clap::Args as ClapArgs;
use comfy_table::{Cell, Color};
use extmount_core::BackendRegistry;
use tracing::instrument;

use crate::output::{create_table, print_json};

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Output in JSON format (backends and auth mechanisms)
    #[arg(long)]
    pub json: bool,

    /// JSON in the legacy flat form, with prefixed option names
    #[arg(long, requires = "json")]
    pub legacy: bool,

    /// List authentication mechanisms instead of backends
    #[arg(long, conflicts_with = "json")]
    pub auth: bool,
}

#[instrument(level = "info", name = "cmd::backends", skip_all)]
pub fn execute(args: &Args) -> Result<()> {
    let registry = extmount_backends::default_registry()?;

    if args.json {
        let value = if args.legacy {
            registry.legacy_json()
        } else {
            registry.structured_json()
        };
        return print_json(&value);
    }

    if args.auth {
        print_mechanisms(&registry);
    } else {
        print_backends(&registry);
    }
    Ok(())
}

fn print_backends(registry: &BackendRegistry) {
    let mut table = create_table();
    table.set_header(vec!["ID", "Name", "Auth schemes", "Priority", "Available"]);
    for backend in registry.backends() {
        let missing = backend.check_dependencies();
        let available = if missing.is_empty() {
            Cell::new("yes").fg(Color::Green)
        } else {
            let names: Vec<_> = missing.iter().map(|m| m.dependency.as_str()).collect();
            Cell::new(format!("no ({})", names.join(", "))).fg(Color::Red)
        };
        table.add_row(vec![
            Cell::new(backend.id()),
            Cell::new(backend.text()),
            Cell::new(backend.auth_schemes().join(", ")),
            Cell::new(backend.priority()),
            available,
        ]);
    }
    println!("{table}");

    for message in registry.dependency_messages() {
        eprintln!("{message}");
    }
}

fn print_mechanisms(registry: &BackendRegistry) {
    let mut table = create_table();
    table.set_header(vec!["ID", "Scheme", "Name"]);
    for mechanism in registry.auth_mechanisms() {
        table.add_row(vec![mechanism.id(), mechanism.scheme(), mechanism.frontend().text()]);
    }
    println!("{table}");
}
