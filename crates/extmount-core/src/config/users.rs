//! User and group membership.
//!
//! Mount resolution needs to know which groups a user belongs to, and the
//! etag propagator needs to know which users a mount reaches. Both come from
//! the hosting platform; [`UserDirectory`] is the seam.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Source of user and group membership.
pub trait UserDirectory: Send + Sync {
    /// Whether the user is known
    fn user_exists(&self, uid: &str) -> bool;

    /// Groups the user belongs to
    fn groups_for_user(&self, uid: &str) -> Vec<String>;

    /// All known users
    fn all_users(&self) -> Vec<String>;

    /// Whether the user is a member of `gid`
    fn in_group(&self, uid: &str, gid: &str) -> bool {
        self.groups_for_user(uid).iter().any(|g| g == gid)
    }

    /// Members of a group
    fn users_in_group(&self, gid: &str) -> Vec<String> {
        self.all_users()
            .into_iter()
            .filter(|uid| self.in_group(uid, gid))
            .collect()
    }
}

/// One user entry in a static directory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEntry {
    /// Group memberships
    #[serde(default)]
    pub groups: Vec<String>,
}

/// Directory backed by a fixed table, as loaded from the `[users]` section
/// of the system configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StaticUserDirectory {
    users: BTreeMap<String, UserEntry>,
}

impl StaticUserDirectory {
    /// Empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    #[must_use]
    pub fn with_user(mut self, uid: &str, groups: &[&str]) -> Self {
        self.insert(uid, groups);
        self
    }

    /// Add or replace a user
    pub fn insert(&mut self, uid: &str, groups: &[&str]) {
        self.users.insert(
            uid.to_string(),
            UserEntry {
                groups: groups.iter().map(ToString::to_string).collect(),
            },
        );
    }
}

impl UserDirectory for StaticUserDirectory {
    fn user_exists(&self, uid: &str) -> bool {
        self.users.contains_key(uid)
    }

    fn groups_for_user(&self, uid: &str) -> Vec<String> {
        self.users
            .get(uid)
            .map(|entry| entry.groups.clone())
            .unwrap_or_default()
    }

    fn all_users(&self) -> Vec<String> {
        self.users.keys().cloned().collect()
    }
}
