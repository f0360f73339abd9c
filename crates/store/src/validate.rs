//! Key and path validation shared by all backends
//!
//! Every backend validates before touching the filesystem, the network or a
//! child process. The artifact-CLI backend applies the stricter
//! [`validate_shell_safe_key`] on top of [`validate_key`].

use crate::{Error, Result};
use std::path::Path;

/// Maximum accepted key length in bytes
pub const MAX_KEY_LENGTH: usize = 1024;

/// Characters rejected in keys and paths handed to an external program
pub const SHELL_METACHARACTERS: &[char] = &[
    ';', '&', '|', '`', '$', '(', ')', '{', '}', '[', ']', '<', '>', '"', '\'', '\\',
];

/// Validate a storage key.
///
/// Keys are relative, `/`-separated and never contain traversal segments,
/// empty segments, backslashes or control characters.
///
/// # Errors
///
/// Returns [`Error::InvalidKey`] describing the first violation found.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::invalid_key(key, "key is empty"));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(Error::invalid_key(
            truncate(key),
            format!("key exceeds {MAX_KEY_LENGTH} bytes"),
        ));
    }
    if key.chars().any(char::is_control) {
        return Err(Error::invalid_key(key, "key contains control characters"));
    }
    if key.contains('\\') {
        return Err(Error::invalid_key(key, "key contains a backslash"));
    }
    if key.starts_with('/') {
        return Err(Error::invalid_key(key, "key must be relative"));
    }
    if key.contains("//") {
        return Err(Error::invalid_key(key, "key contains an empty segment"));
    }
    if key.split('/').any(|segment| segment == ".." || segment == ".") {
        return Err(Error::invalid_key(key, "key contains a traversal segment"));
    }
    if key.ends_with('/') {
        return Err(Error::invalid_key(key, "key must name an object, not a prefix"));
    }
    Ok(())
}

/// Validate a key that will be passed as an argument to an external program.
///
/// # Errors
///
/// Returns [`Error::InvalidKey`] if [`validate_key`] fails or the key contains
/// shell metacharacters, whitespace, or starts with `-`.
pub fn validate_shell_safe_key(key: &str) -> Result<()> {
    validate_key(key)?;
    check_shell_safe(key)
}

/// Validate a local path that will be passed as an argument to an external
/// program.
///
/// # Errors
///
/// Returns [`Error::InvalidKey`] for empty or non-UTF-8 paths, or paths
/// carrying shell metacharacters.
pub fn validate_shell_safe_path(path: &Path) -> Result<()> {
    let Some(text) = path.to_str() else {
        return Err(Error::invalid_key(
            path.to_string_lossy(),
            "path is not valid UTF-8",
        ));
    };
    if text.is_empty() {
        return Err(Error::invalid_key(text, "path is empty"));
    }
    if text.chars().any(char::is_control) {
        return Err(Error::invalid_key(text, "path contains control characters"));
    }
    // Windows paths legitimately use backslashes
    if cfg!(windows) {
        check_metacharacters(text, &['\\'])
    } else {
        check_metacharacters(text, &[])
    }?;
    if text.starts_with('-') {
        return Err(Error::invalid_key(text, "path must not start with '-'"));
    }
    Ok(())
}

fn check_shell_safe(value: &str) -> Result<()> {
    check_metacharacters(value, &[])?;
    if value.chars().any(char::is_whitespace) {
        return Err(Error::invalid_key(value, "contains whitespace"));
    }
    if value.starts_with('-') {
        return Err(Error::invalid_key(value, "must not start with '-'"));
    }
    Ok(())
}

fn check_metacharacters(value: &str, allowed: &[char]) -> Result<()> {
    if let Some(c) = value
        .chars()
        .find(|c| SHELL_METACHARACTERS.contains(c) && !allowed.contains(c))
    {
        return Err(Error::invalid_key(
            value,
            format!("contains shell metacharacter {c:?}"),
        ));
    }
    Ok(())
}

fn truncate(key: &str) -> String {
    let mut end = 64.min(key.len());
    while !key.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &key[..end])
}
