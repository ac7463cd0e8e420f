//! Typed access to backend options.

use extmount_core::BackendOptions;
use extmount_core::config::is_truthy;
use extmount_core::storage::StorageError;
use extmount_core::StorageResult;
use serde_json::Value;

/// Non-empty string value; numbers are rendered as text
pub fn string(options: &BackendOptions, key: &str) -> Option<String> {
    match options.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// String value that must be present
pub fn required(options: &BackendOptions, key: &str) -> StorageResult<String> {
    string(options, key).ok_or_else(|| StorageError::InvalidConfig(format!("missing option '{key}'")))
}

/// String value with a fallback
pub fn string_or(options: &BackendOptions, key: &str, default: &str) -> String {
    string(options, key).unwrap_or_else(|| default.to_string())
}

/// Boolean flag; absent means false
pub fn flag(options: &BackendOptions, key: &str) -> bool {
    options.get(key).is_some_and(is_truthy)
}

/// Port number with a fallback
pub fn port(options: &BackendOptions, key: &str, default: u16) -> StorageResult<u16> {
    match string(options, key) {
        None => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|_| StorageError::InvalidConfig(format!("invalid port '{value}'"))),
    }
}

/// Split a host option that may carry a scheme.
///
/// Returns the bare host (with port, without trailing slashes) and whether the
/// scheme asked for TLS, if a scheme was given.
pub fn split_host(host: &str) -> (String, Option<bool>) {
    let (rest, secure) = if let Some(rest) = host.strip_prefix("https://") {
        (rest, Some(true))
    } else if let Some(rest) = host.strip_prefix("http://") {
        (rest, Some(false))
    } else {
        (host, None)
    };
    (rest.trim_end_matches('/').to_string(), secure)
}

/// Root option as a path without leading or trailing slashes
pub fn root(options: &BackendOptions, key: &str) -> String {
    string(options, key)
        .map(|r| r.trim_matches('/').to_string())
        .unwrap_or_default()
}

/// Access token from an OAuth `token` option.
///
/// The option is either the bare token or the token response as JSON, in
/// which case `access_token` is taken from it.
pub fn access_token(options: &BackendOptions) -> StorageResult<String> {
    let missing = || StorageError::InvalidConfig("missing OAuth token; authorize the mount first".into());
    let parsed = match options.get("token") {
        Some(Value::Object(map)) => Value::Object(map.clone()),
        Some(Value::String(s)) if s.trim_start().starts_with('{') => serde_json::from_str(s)
            .map_err(|e| StorageError::InvalidConfig(format!("invalid token: {e}")))?,
        Some(Value::String(s)) if !s.is_empty() => return Ok(s.clone()),
        _ => return Err(missing()),
    };
    parsed["access_token"]
        .as_str()
        .filter(|t| !t.is_empty())
        .map(ToString::to_string)
        .ok_or_else(missing)
}
