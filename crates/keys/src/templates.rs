//! Built-in cache templates
//!
//! The table is compiled into the binary and parsed once on first use.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;

const RAW_TEMPLATES: &str = include_str!("templates.json");

/// Defaults for a well-known kind of cache
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheTemplate {
    /// One-line description shown by `cistash templates`
    #[serde(default)]
    pub description: String,
    /// Primary key template
    pub key: String,
    /// Fallback key templates, tried by the registry in order
    #[serde(default)]
    pub fallback_keys: Vec<String>,
    /// Path templates to archive
    pub paths: Vec<String>,
}

static TEMPLATES: LazyLock<BTreeMap<String, CacheTemplate>> = LazyLock::new(|| {
    serde_json::from_str(RAW_TEMPLATES).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Built-in cache templates failed to parse");
        BTreeMap::new()
    })
});

/// Look up a built-in template by name
pub fn lookup(name: &str) -> Result<&'static CacheTemplate> {
    TEMPLATES.get(name).ok_or_else(|| Error::UnknownTemplate {
        name: name.to_string(),
    })
}

/// All built-in templates, sorted by name
pub fn all() -> impl Iterator<Item = (&'static str, &'static CacheTemplate)> {
    TEMPLATES.iter().map(|(k, v)| (k.as_str(), v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::Template;

    #[test]
    fn embedded_table_parses() {
        let parsed: BTreeMap<String, CacheTemplate> =
            serde_json::from_str(RAW_TEMPLATES).unwrap();
        assert_eq!(parsed.len(), all().count());
        assert!(parsed.contains_key("node"));
        assert!(parsed.contains_key("go"));
    }

    #[test]
    fn every_template_is_valid() {
        for (name, t) in all() {
            assert!(!t.paths.is_empty(), "{name} has no paths");
            Template::parse(&t.key).unwrap();
            for f in &t.fallback_keys {
                Template::parse(f).unwrap();
            }
            for p in &t.paths {
                Template::parse(p).unwrap();
            }
        }
    }

    #[test]
    fn unknown_template_is_an_error() {
        assert!(matches!(
            lookup("cobol"),
            Err(Error::UnknownTemplate { name }) if name == "cobol"
        ));
        assert_eq!(lookup("node").unwrap().paths, vec!["node_modules"]);
    }
}
