//! Result rendering: a human summary or JSON

use cistash_cache::{Error, ErrorKind, ExpandedCache, RestoreResult, SaveResult};
use cistash_keys::templates::CacheTemplate;
use indicatif::{HumanBytes, HumanDuration};
use serde::Serialize;
use std::fmt::Write;

/// One cache's outcome in JSON output
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Report<T> {
    Ok(T),
    Failed(FailureReport),
}

#[derive(Debug, Serialize)]
pub struct FailureReport {
    pub id: String,
    pub phase: Option<String>,
    pub kind: &'static str,
    pub error: String,
}

impl From<&Error> for FailureReport {
    fn from(err: &Error) -> Self {
        Self {
            id: err.cache_id().to_string(),
            phase: err.phase().map(|p| p.to_string()),
            kind: kind_name(err.kind()),
            error: err.to_string(),
        }
    }
}

const fn kind_name(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Validation => "validation",
        ErrorKind::RegistryProtocol => "registry_protocol",
        ErrorKind::Transfer => "transfer",
        ErrorKind::Archive => "archive",
        ErrorKind::Cancelled => "cancelled",
    }
}

#[derive(Debug, Serialize)]
pub struct SaveReport {
    pub id: String,
    pub key: String,
    pub fallback_keys: Vec<String>,
    pub registry: String,
    pub cache_created: bool,
    pub store: Option<String>,
    pub store_object_name: Option<String>,
    pub archive_size: Option<u64>,
    pub archive_sha256: Option<String>,
    pub written_bytes: Option<u64>,
    pub written_entries: Option<u64>,
    pub transfer_mb_per_sec: Option<f64>,
    pub duration_ms: u128,
}

impl From<&SaveResult> for SaveReport {
    fn from(r: &SaveResult) -> Self {
        Self {
            id: r.id.clone(),
            key: r.key.clone(),
            fallback_keys: r.fallback_keys.clone(),
            registry: r.registry.clone(),
            cache_created: r.cache_created,
            store: r.store.map(|s| s.to_string()),
            store_object_name: r.store_object_name.clone(),
            archive_size: r.archive.as_ref().map(|a| a.size),
            archive_sha256: r.archive.as_ref().map(|a| a.sha256_sum.clone()),
            written_bytes: r.archive.as_ref().map(|a| a.written_bytes),
            written_entries: r.archive.as_ref().map(|a| a.written_entries),
            transfer_mb_per_sec: r.transfer.as_ref().map(|t| t.transfer_speed),
            duration_ms: r.duration.as_millis(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RestoreReport {
    pub id: String,
    pub requested_key: String,
    pub key: String,
    pub registry: String,
    pub cache_restored: bool,
    pub cache_hit: bool,
    pub fallback_used: bool,
    pub expires_at: Option<String>,
    pub store: Option<String>,
    pub bytes_transferred: Option<u64>,
    pub extracted_bytes: Option<u64>,
    pub extracted_entries: Option<u64>,
    pub duration_ms: u128,
}

impl From<&RestoreResult> for RestoreReport {
    fn from(r: &RestoreResult) -> Self {
        Self {
            id: r.id.clone(),
            requested_key: r.requested_key.clone(),
            key: r.key.clone(),
            registry: r.registry.clone(),
            cache_restored: r.cache_restored,
            cache_hit: r.cache_hit,
            fallback_used: r.fallback_used,
            expires_at: r.expires_at.map(|t| t.to_rfc3339()),
            store: r.store.map(|s| s.to_string()),
            bytes_transferred: r.transfer.as_ref().map(|t| t.bytes_transferred),
            extracted_bytes: r.extract.as_ref().map(|e| e.extracted_bytes),
            extracted_entries: r.extract.as_ref().map(|e| e.extracted_entries),
            duration_ms: r.duration.as_millis(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct KeyReport<'a> {
    pub id: &'a str,
    pub key: &'a str,
    pub fallback_keys: &'a [String],
    pub paths: &'a [String],
}

impl<'a> From<&'a ExpandedCache> for KeyReport<'a> {
    fn from(c: &'a ExpandedCache) -> Self {
        Self {
            id: &c.id,
            key: &c.key,
            fallback_keys: &c.fallback_keys,
            paths: &c.paths,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TemplateReport<'a> {
    pub name: &'a str,
    #[serde(flatten)]
    pub template: &'a CacheTemplate,
}

pub fn report<T, R>(outcome: &cistash_cache::Result<T>) -> Report<R>
where
    R: for<'t> From<&'t T>,
{
    match outcome {
        Ok(value) => Report::Ok(R::from(value)),
        Err(e) => Report::Failed(FailureReport::from(e)),
    }
}

pub fn human_save(id: &str, outcome: &cistash_cache::Result<SaveResult>) -> String {
    match outcome {
        Ok(r) if !r.cache_created => format!("{id}: {} already saved", r.key),
        Ok(r) => {
            let mut line = format!("{id}: saved {}", r.key);
            if let Some(archive) = &r.archive {
                let _ = write!(
                    line,
                    " ({} from {}, {} entries)",
                    HumanBytes(archive.size),
                    HumanBytes(archive.written_bytes),
                    archive.written_entries
                );
            }
            if let Some(store) = r.store {
                let _ = write!(line, " to {store}");
            }
            let _ = write!(line, " in {}", HumanDuration(r.duration));
            line
        }
        Err(e) => failure_line(id, e),
    }
}

pub fn human_restore(id: &str, outcome: &cistash_cache::Result<RestoreResult>) -> String {
    match outcome {
        Ok(r) if !r.cache_restored => format!("{id}: miss for {}", r.requested_key),
        Ok(r) => {
            let mut line = if r.fallback_used {
                format!("{id}: restored fallback {} (wanted {})", r.key, r.requested_key)
            } else {
                format!("{id}: restored {}", r.key)
            };
            if let Some(transfer) = &r.transfer {
                let _ = write!(line, " ({}", HumanBytes(transfer.bytes_transferred));
                if let Some(extract) = &r.extract {
                    let _ = write!(line, ", {} entries", extract.extracted_entries);
                }
                line.push(')');
            }
            let _ = write!(line, " in {}", HumanDuration(r.duration));
            line
        }
        Err(e) => failure_line(id, e),
    }
}

pub fn human_key(cache: &ExpandedCache) -> String {
    let mut out = format!("{}: {}", cache.id, cache.key);
    for fallback in &cache.fallback_keys {
        let _ = write!(out, "\n  fallback: {fallback}");
    }
    for path in &cache.paths {
        let _ = write!(out, "\n  path: {path}");
    }
    out
}

pub fn human_template(name: &str, template: &CacheTemplate) -> String {
    format!(
        "{name:<8} {}\n         key: {}\n         paths: {}",
        template.description,
        template.key,
        template.paths.join(", ")
    )
}

fn failure_line(id: &str, err: &Error) -> String {
    match err.phase() {
        Some(phase) => format!("{id}: failed during {phase}: {err}"),
        None => format!("{id}: failed: {err}"),
    }
}
