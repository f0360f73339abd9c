//! Cache configuration and template expansion

use crate::{Error, Result};
use cistash_keys::{KeyResolver, templates};
use serde::{Deserialize, Serialize};

/// A cache as configured by the user.
///
/// `key`, `fallback_keys` and `paths` are templates until expanded with
/// [`CacheConfig::expand`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache identity, unique within a pipeline
    pub id: String,
    /// Primary key template
    pub key: String,
    /// Fallback key templates, most specific first
    pub fallback_keys: Vec<String>,
    /// Path templates to archive and restore
    pub paths: Vec<String>,
    /// Registry slug; empty selects the client default
    pub registry: String,
    /// Built-in template supplying unset fields
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    /// Let bare checksum patterns match in subdirectories
    pub recursive_checksums: bool,
}

/// A cache with every template resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpandedCache {
    /// Cache identity
    pub id: String,
    /// Resolved primary key
    pub key: String,
    /// Resolved fallback keys, without empties or duplicates
    pub fallback_keys: Vec<String>,
    /// Resolved paths
    pub paths: Vec<String>,
    /// Registry slug as configured (possibly empty)
    pub registry: String,
}

impl CacheConfig {
    /// Fill unset fields from the named built-in template.
    ///
    /// # Errors
    ///
    /// Returns a template error if the template does not exist.
    pub fn with_template_defaults(&self) -> Result<Self> {
        let Some(name) = self.template.as_deref().filter(|n| !n.trim().is_empty()) else {
            return Ok(self.clone());
        };
        let template = templates::lookup(name.trim()).map_err(|source| Error::Template {
            id: self.id.clone(),
            source,
        })?;

        let mut merged = self.clone();
        if merged.key.trim().is_empty() {
            merged.key.clone_from(&template.key);
        }
        if merged.fallback_keys.is_empty() {
            merged.fallback_keys.clone_from(&template.fallback_keys);
        }
        if merged.paths.is_empty() {
            merged.paths.clone_from(&template.paths);
        }
        Ok(merged)
    }

    /// Resolve every template against `resolver`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an empty ID, no paths or a key that
    /// resolves to an empty string, and a template error for unknown
    /// templates or invalid template syntax.
    pub fn expand(&self, resolver: &KeyResolver) -> Result<ExpandedCache> {
        let id = self.id.trim();
        if id.is_empty() {
            return Err(Error::configuration("", "cache id must not be empty"));
        }
        let config = self.with_template_defaults()?;
        let resolve = |template: &str| {
            resolver
                .resolve(id, template, config.recursive_checksums)
                .map_err(|source| Error::Template {
                    id: id.to_string(),
                    source,
                })
        };

        let key = resolve(&config.key)?;
        if key.is_empty() {
            return Err(Error::configuration(id, "key resolved to an empty string"));
        }

        let mut fallback_keys: Vec<String> = Vec::with_capacity(config.fallback_keys.len());
        for template in &config.fallback_keys {
            let fallback = resolve(template)?;
            if fallback.is_empty() || fallback == key || fallback_keys.contains(&fallback) {
                continue;
            }
            fallback_keys.push(fallback);
        }

        let mut paths = Vec::with_capacity(config.paths.len());
        for template in &config.paths {
            let path = resolve(template)?;
            if !path.is_empty() && !paths.contains(&path) {
                paths.push(path);
            }
        }
        if paths.is_empty() {
            return Err(Error::configuration(id, "no paths configured"));
        }

        Ok(ExpandedCache {
            id: id.to_string(),
            key,
            fallback_keys,
            paths,
            registry: config.registry.trim().to_string(),
        })
    }
}
