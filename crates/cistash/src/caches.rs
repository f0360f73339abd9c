//! Loading and filtering the caches file

use crate::errors::CliError;
use cistash_cache::CacheConfig;
use serde::Deserialize;
use std::path::Path;

#[derive(Deserialize)]
#[serde(untagged)]
enum CachesFile {
    List(Vec<CacheConfig>),
    Document { caches: Vec<CacheConfig> },
}

/// Parse a caches document.
///
/// Accepts a bare list of caches or a mapping with a `caches` key. JSON
/// loads too.
pub fn parse_caches(path: &Path, source: &str) -> Result<Vec<CacheConfig>, CliError> {
    let file: CachesFile =
        serde_yaml::from_str(source).map_err(|source| CliError::CachesFile {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(match file {
        CachesFile::List(caches) | CachesFile::Document { caches } => caches,
    })
}

/// Read and parse the caches file at `path`
pub fn load_caches(path: &Path) -> Result<Vec<CacheConfig>, CliError> {
    let source =
        std::fs::read_to_string(path).map_err(|e| CliError::file("read", path, e))?;
    let caches = parse_caches(path, &source)?;
    tracing::debug!(path = %path.display(), count = caches.len(), "Loaded caches file");
    Ok(caches)
}

/// Keep the caches named in `ids`, in file order.
///
/// An empty filter keeps everything. Naming an id the file does not define is
/// an error.
pub fn select(caches: Vec<CacheConfig>, ids: &[String]) -> Result<Vec<CacheConfig>, CliError> {
    if caches.is_empty() {
        return Err(CliError::NoCaches);
    }
    let wanted: Vec<&str> = ids
        .iter()
        .map(|id| id.trim())
        .filter(|id| !id.is_empty())
        .collect();
    if wanted.is_empty() {
        return Ok(caches);
    }
    if let Some(unknown) = wanted
        .iter()
        .find(|id| !caches.iter().any(|c| c.id.trim() == **id))
    {
        return Err(CliError::UnknownCache {
            id: (*unknown).to_string(),
        });
    }
    Ok(caches
        .into_iter()
        .filter(|c| wanted.contains(&c.id.trim()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const YAML: &str = r#"
- id: deps
  key: 'deps-{{ checksum "go.sum" }}'
  fallback_keys: ['deps-']
  paths: [vendor]
- id: node
  template: node
"#;

    fn ids(caches: &[CacheConfig]) -> Vec<&str> {
        caches.iter().map(|c| c.id.as_str()).collect()
    }

    #[test]
    fn parses_bare_list() {
        let caches = parse_caches(Path::new("caches.yml"), YAML).unwrap();
        assert_eq!(ids(&caches), vec!["deps", "node"]);
        assert_eq!(caches[0].paths, vec!["vendor"]);
        assert_eq!(caches[1].template.as_deref(), Some("node"));
    }

    #[test]
    fn parses_document_and_json() {
        let doc = "caches:\n  - id: a\n    key: k\n    paths: [p]\n";
        assert_eq!(ids(&parse_caches(Path::new("c.yml"), doc).unwrap()), vec!["a"]);

        let json = r#"{"caches": [{"id": "b", "key": "k", "paths": ["p"]}]}"#;
        assert_eq!(ids(&parse_caches(Path::new("c.json"), json).unwrap()), vec!["b"]);
    }

    #[test]
    fn reports_the_file_on_parse_errors() {
        let err = parse_caches(Path::new("broken.yml"), "caches: 3").unwrap_err();
        assert!(matches!(err, CliError::CachesFile { ref path, .. } if path == &PathBuf::from("broken.yml")));
    }

    #[test]
    fn missing_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let err = load_caches(&tmp.path().join("nope.yml")).unwrap_err();
        assert!(matches!(err, CliError::File { .. }));
    }

    #[test]
    fn loads_from_disk() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("caches.yml");
        std::fs::write(&path, YAML).unwrap();
        assert_eq!(load_caches(&path).unwrap().len(), 2);
    }

    #[test]
    fn selection() {
        let caches = parse_caches(Path::new("c.yml"), YAML).unwrap();
        assert_eq!(ids(&select(caches.clone(), &[]).unwrap()), vec!["deps", "node"]);
        assert_eq!(
            ids(&select(caches.clone(), &["node".to_string()]).unwrap()),
            vec!["node"]
        );
        assert!(matches!(
            select(caches, &["ruby".to_string()]),
            Err(CliError::UnknownCache { id }) if id == "ruby"
        ));
        assert!(matches!(select(Vec::new(), &[]), Err(CliError::NoCaches)));
    }
}
