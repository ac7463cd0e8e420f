//! Mount lifecycle signals.

use super::store::MountType;

/// Which lifecycle change happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountSignal {
    /// A mount was created
    Create,
    /// A mount was removed
    Delete,
}

/// A mount was created or removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEvent {
    /// Change kind
    pub signal: MountSignal,
    /// Stored mount point, for example `/$user/files/ext`
    pub path: String,
    /// Scope type
    pub mount_type: MountType,
    /// Applicable user or group, or `all`
    pub users: String,
}

/// Observer of mount lifecycle signals.
pub trait MountHook: Send + Sync {
    /// Handle one event. Observers must not fail the mutation that emitted it.
    fn on_mount_event(&self, event: &MountEvent);
}
