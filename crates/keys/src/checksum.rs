//! Glob-matched file checksums
//!
//! `checksum` expands each pattern against the working directory, filters the
//! matches through a fixed ignore list, sorts them, hashes each file with
//! SHA-256 and hashes the concatenated hex digests once more. Traversal order
//! never influences the result.

use globset::{GlobBuilder, GlobMatcher};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// Path components that never contribute to a checksum
const IGNORED_NAMES: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    ".bzr",
    "CVS",
    ".DS_Store",
    "Thumbs.db",
    "desktop.ini",
    ".Spotlight-V100",
    ".Trashes",
];

fn is_ignored(name: &str) -> bool {
    IGNORED_NAMES.contains(&name) || name.starts_with("._")
}

fn looks_like_glob(p: &str) -> bool {
    p.contains('*') || p.contains('{') || p.contains('?') || p.contains('[')
}

/// A compiled pattern together with the directory it can be walked from.
struct PatternWalk {
    base: PathBuf,
    max_depth: Option<usize>,
    matcher: GlobMatcher,
}

impl PatternWalk {
    fn compile(pattern: &str) -> Option<Self> {
        let matcher = match GlobBuilder::new(pattern).literal_separator(true).build() {
            Ok(glob) => glob.compile_matcher(),
            Err(e) => {
                tracing::warn!(pattern, error = %e, "Invalid checksum pattern");
                return None;
            }
        };

        let mut base = PathBuf::new();
        let mut remaining = 0usize;
        let mut recursive = false;
        let mut in_glob = false;
        for part in pattern.split('/').filter(|p| !p.is_empty()) {
            if in_glob || looks_like_glob(part) {
                in_glob = true;
                remaining += 1;
                recursive |= part.contains("**");
            } else {
                base.push(part);
            }
        }

        Some(Self {
            base,
            max_depth: if recursive { None } else { Some(remaining) },
            matcher,
        })
    }
}

/// Turn a user pattern into the patterns actually matched.
///
/// With `recursive` set, every pattern is also tried beneath any directory.
fn expand_pattern(raw: &str, root: &Path, recursive: bool) -> Vec<String> {
    let mut p = raw.trim().replace('\\', "/");
    if p.is_empty() {
        return Vec::new();
    }
    if Path::new(&p).is_absolute() {
        match Path::new(&p).strip_prefix(root) {
            Ok(rel) => p = rel.to_string_lossy().replace('\\', "/"),
            Err(_) => {
                tracing::debug!(pattern = %raw, "Absolute pattern outside working directory");
                return Vec::new();
            }
        }
    }
    while let Some(rest) = p.strip_prefix("./") {
        p = rest.to_string();
    }

    let mut out = vec![p.clone()];
    if recursive && !p.starts_with("**/") {
        out.push(format!("**/{p}"));
    }
    out
}

fn rel_string(rel: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for comp in rel.components() {
        match comp {
            Component::Normal(s) => parts.push(s.to_str()?.to_string()),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Find every file under `root` matched by `patterns`, sorted and deduplicated.
pub fn matching_files(root: &Path, patterns: &[String], recursive: bool) -> BTreeSet<String> {
    let walks: Vec<PatternWalk> = patterns
        .iter()
        .flat_map(|p| expand_pattern(p, root, recursive))
        .filter_map(|p| PatternWalk::compile(&p))
        .collect();

    let mut matched = BTreeSet::new();
    for walk in &walks {
        let walk_root = root.join(&walk.base);
        if !walk_root.exists() {
            tracing::trace!(base = %walk.base.display(), "Checksum base does not exist");
            continue;
        }

        let mut walker = WalkDir::new(&walk_root).follow_links(false);
        if let Some(depth) = walk.max_depth {
            walker = walker.max_depth(depth);
        }

        for entry in walker
            .into_iter()
            .filter_entry(|e| !e.file_name().to_str().is_some_and(is_ignored))
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(rel) = path.strip_prefix(root).ok().and_then(rel_string) else {
                continue;
            };
            if rel.split('/').any(is_ignored) {
                continue;
            }
            if walk.matcher.is_match(&rel) {
                matched.insert(rel);
            }
        }
    }
    matched
}

/// Stream a file through SHA-256, returning its hex digest.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 1024 * 64];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Checksum the files matched by `patterns` beneath `root`.
///
/// Returns an empty string when nothing matches or any matched file cannot be
/// read.
#[must_use]
pub fn checksum(root: &Path, patterns: &[String], recursive: bool) -> String {
    let _span = tracing::debug_span!(
        "checksum",
        root = %root.display(),
        pattern_count = patterns.len(),
        recursive
    )
    .entered();

    let files = matching_files(root, patterns, recursive);
    if files.is_empty() {
        tracing::debug!(patterns = ?patterns, "No files matched checksum patterns");
        return String::new();
    }

    let mut combined = String::with_capacity(files.len() * 64);
    for rel in &files {
        match sha256_file(&root.join(rel)) {
            Ok(digest) => combined.push_str(&digest),
            Err(e) => {
                tracing::warn!(path = %rel, error = %e, "Unreadable file in checksum");
                return String::new();
            }
        }
    }

    let sum = hex::encode(Sha256::digest(combined.as_bytes()));
    tracing::debug!(files = files.len(), checksum = %sum, "Computed checksum");
    sum
}
