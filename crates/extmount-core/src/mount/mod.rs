//! Mount tables, resolution and live mounts.

pub mod config;
pub mod hooks;
pub mod listing;
pub mod provider;
pub mod store;
pub mod tester;

pub use config::{MountConfig, MountScope, NewMount, ResolvedMount};
pub use hooks::{MountEvent, MountHook, MountSignal};
pub use listing::{ExternalMountEntry, MountScopeKind, list_external_mounts};
pub use provider::{ExternalMount, Mount, MountProvider, PersonalMount};
pub use store::{ALL_USERS, MountEntry, MountTable, MountTableFile, MountType};
pub use tester::{ConnectivityTester, NoopTester, TimeoutTester};
