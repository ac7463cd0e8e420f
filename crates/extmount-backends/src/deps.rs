//! System dependency checks for backends that drive external programs.

use extmount_core::definition::MissingDependency;
use extmount_core::definition::capability::dependency_message;
use std::path::PathBuf;

/// Location of an executable on `PATH`
pub fn find_executable(name: &str) -> Option<PathBuf> {
    which::which(name).ok()
}

/// Executables from `names` that cannot be found, with a remediation hint
/// naming `backends`
pub fn missing_executables(names: &[&str], backends: &[&str]) -> Vec<MissingDependency> {
    names
        .iter()
        .filter(|name| find_executable(name).is_none())
        .map(|name| MissingDependency::new(*name).with_message(dependency_message(name, backends)))
        .collect()
}
