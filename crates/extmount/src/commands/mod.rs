pub mod add;
pub mod backends;
pub mod cat;
pub mod init;
pub mod list;
pub mod ls;
pub mod propagate;
pub mod remove;
pub mod resolve;
pub mod verify;

use anyhow::{Result, bail};
use clap::Args as ClapArgs;
use extmount_core::{Mount, MountScope, StorageError};

use crate::workspace::{Workspace, session};

/// Which table a mount is stored in and who it applies to
#[derive(ClapArgs, Clone, Debug, Default)]
pub struct ScopeArgs {
    /// System mount for one user
    #[arg(long, value_name = "UID", conflicts_with_all = ["group", "personal"])]
    pub user: Option<String>,

    /// System mount for a group
    #[arg(long, value_name = "GID", conflicts_with = "personal")]
    pub group: Option<String>,

    /// Personal mount of a user
    #[arg(long, value_name = "UID")]
    pub personal: Option<String>,
}

impl ScopeArgs {
    /// Scope selected by the flags; everyone when none is given
    pub fn scope(&self) -> Result<MountScope> {
        Ok(match (&self.user, &self.group, &self.personal) {
            (None, None, None) => MountScope::all(),
            (Some(uid), None, None) => MountScope::user(uid.as_str()),
            (None, Some(gid), None) => MountScope::group(gid.as_str()),
            (None, None, Some(uid)) => MountScope::personal(uid.as_str()),
            _ => bail!("--user, --group and --personal are mutually exclusive"),
        })
    }
}

/// Path inside a user's file tree, always with a leading slash
pub fn user_path(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    format!("/{trimmed}")
}

/// The mount holding `path` in the tree of `user`, and the path inside it
pub fn locate(
    workspace: &Workspace,
    user: &str,
    path: &str,
    login_password: Option<&str>,
) -> Result<(Mount, String)> {
    let path = user_path(path);
    let session = session(user, login_password);
    let Some((mount, inner)) = workspace.provider().find_mount(user, &path, session.as_ref())? else {
        return Err(StorageError::NotFound(format!("no external mount holds {path}")).into());
    };
    Ok((mount, inner))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_selection() {
        assert_eq!(ScopeArgs::default().scope().unwrap(), MountScope::all());
        let personal = ScopeArgs {
            personal: Some("alice".into()),
            ..ScopeArgs::default()
        };
        assert_eq!(personal.scope().unwrap(), MountScope::personal("alice"));
        let both = ScopeArgs {
            user: Some("a".into()),
            group: Some("g".into()),
            ..ScopeArgs::default()
        };
        assert!(both.scope().is_err());
    }

    #[test]
    fn test_user_path() {
        assert_eq!(user_path("docs/"), "/docs");
        assert_eq!(user_path("/"), "/");
    }
}
