//! Mapping between configured cache paths, disk locations and archive entries
//!
//! Paths relative to the working directory are stored under their relative
//! name. Absolute paths, `~` paths and paths that climb out of the working
//! directory are stored under [`ROOT_PREFIX`] followed by their absolute
//! components, so the same archive restores to the same places on any agent
//! with the same layout.

use crate::{Error, Result};
use std::path::{Component, Path, PathBuf};

/// Entry prefix for paths outside the working directory
pub const ROOT_PREFIX: &str = "__root__";

/// A configured path resolved for archiving
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMapping {
    /// Path as configured
    pub spec: String,
    /// Location on disk
    pub disk: PathBuf,
    /// Entry name inside the archive (`/`-separated)
    pub entry: String,
}

impl PathMapping {
    /// Resolve `spec` against `working_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPath`] for empty paths, the working directory
    /// itself, the filesystem root, or non-UTF-8 components.
    pub fn new(working_dir: &Path, spec: &str) -> Result<Self> {
        let trimmed = spec.trim();
        if trimmed.is_empty() {
            return Err(Error::invalid_path(spec, "path is empty"));
        }

        let expanded = expand_tilde(trimmed)?;
        let relative_inside = expanded.is_relative()
            && !expanded.components().any(|c| c == Component::ParentDir);

        if relative_inside {
            let parts = entry_parts(spec, &expanded)?;
            if parts.is_empty() {
                return Err(Error::invalid_path(
                    spec,
                    "must name a file or directory below the working directory",
                ));
            }
            return Ok(Self {
                spec: spec.to_string(),
                disk: working_dir.join(parts.join("/")),
                entry: parts.join("/"),
            });
        }

        let absolute = normalize(&working_dir.join(&expanded));
        let parts = entry_parts(spec, &absolute)?;
        if parts.is_empty() {
            return Err(Error::invalid_path(spec, "refusing to cache the filesystem root"));
        }
        Ok(Self {
            spec: spec.to_string(),
            disk: absolute,
            entry: format!("{ROOT_PREFIX}/{}", parts.join("/")),
        })
    }

    /// If archive entry `name` lies at or below this mapping, the path relative
    /// to [`Self::disk`] (empty for an exact match).
    #[must_use]
    pub fn strip<'a>(&self, name: &'a str) -> Option<&'a str> {
        let rest = name.strip_prefix(self.entry.as_str())?;
        if rest.is_empty() {
            Some("")
        } else {
            rest.strip_prefix('/')
        }
    }
}

/// Resolve `spec` to a location on disk, expanding `~` and joining relative
/// paths onto `working_dir`.
///
/// # Errors
///
/// Returns [`Error::InvalidPath`] if the path is empty or `~` cannot be
/// expanded.
pub fn resolve(working_dir: &Path, spec: &str) -> Result<PathBuf> {
    PathMapping::new(working_dir, spec).map(|m| m.disk)
}

fn expand_tilde(spec: &str) -> Result<PathBuf> {
    let rest = match spec.strip_prefix('~') {
        Some("") => "",
        Some(rest) if rest.starts_with('/') || rest.starts_with('\\') => &rest[1..],
        _ => return Ok(PathBuf::from(spec)),
    };
    let home = dirs::home_dir()
        .ok_or_else(|| Error::invalid_path(spec, "cannot expand ~: home directory unknown"))?;
    Ok(if rest.is_empty() { home } else { home.join(rest) })
}

/// Lexically resolve `.` and `..` without touching the filesystem
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn entry_parts(spec: &str, path: &Path) -> Result<Vec<String>> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(
                part.to_str()
                    .ok_or_else(|| Error::invalid_path(spec, "path is not valid UTF-8"))?
                    .to_string(),
            ),
            Component::Prefix(prefix) => parts.push(
                prefix
                    .as_os_str()
                    .to_string_lossy()
                    .trim_end_matches(':')
                    .to_string(),
            ),
            Component::RootDir | Component::CurDir | Component::ParentDir => {}
        }
    }
    Ok(parts)
}
