//! Locating a session credential inside loosely-structured API responses.
//!
//! Different endpoints hand back the token under different names and at
//! different depths (`{ token }`, `{ data: { accessToken } }`,
//! `{ data: { result: { jwt } } }`, ...). `extract_credential` checks a fixed
//! list of field names at a fixed list of locations and returns the first
//! non-empty string it finds.

use serde_json::Value;

/// Field names recognized as a bearer credential, in priority order.
pub const CREDENTIAL_FIELDS: [&str; 5] = ["token", "accessToken", "authToken", "bearerToken", "jwt"];

/// Object paths searched for credential fields, in priority order.
/// The empty path is the payload root.
const SEARCH_PATHS: [&[&str]; 5] = [
    &[],
    &["data"],
    &["data", "result"],
    &["data", "item"],
    &["result"],
];

/// Find the credential in a response payload.
///
/// Returns `None` for non-object payloads, missing levels, and fields whose
/// value is not a non-empty string.
pub fn extract_credential(payload: &Value) -> Option<&str> {
    SEARCH_PATHS
        .iter()
        .filter_map(|path| descend(payload, path))
        .find_map(credential_field)
}

/// Follow `path` through nested objects
fn descend<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter()
        .try_fold(value, |current, key| current.as_object()?.get(*key))
}

/// First recognized field on `value` holding a non-empty string
fn credential_field(value: &Value) -> Option<&str> {
    let object = value.as_object()?;
    CREDENTIAL_FIELDS
        .iter()
        .filter_map(|field| object.get(*field).and_then(Value::as_str))
        .find(|s| !s.is_empty())
}
