//! Process exit codes.
//!
//! Scripts can tell failure categories apart without parsing messages.

/// Command succeeded
pub const SUCCESS: u8 = 0;
/// Unclassified failure
pub const GENERAL_ERROR: u8 = 1;
/// Mount point, file or directory does not exist
pub const NOT_FOUND: u8 = 3;
/// Operation not permitted on the storage
pub const PERMISSION_DENIED: u8 = 4;
/// Configuration rejected or unreadable
pub const CONFIG_INVALID: u8 = 5;
/// Remote storage not reachable or misconfigured
pub const UNAVAILABLE: u8 = 6;
/// Remote rejected the credentials or host key
pub const AUTH_FAILED: u8 = 7;
/// A mount failed its connectivity test
pub const CHECK_FAILED: u8 = 8;
