//! Store configuration and URL parsing
//!
//! Stores are configured with URLs:
//!
//! - `s3://bucket/prefix?region=eu-west-1&endpoint=http://minio:9000&use_path_style=true&concurrency=8&part_size_mb=16`
//! - `file:///var/cache/cistash` or `file://~/cistash`
//! - `nsc://` or `nsc://?program=/usr/local/bin/nsc&arg=--region&arg=eu`

use crate::{ArtifactCliStore, BlobStore, Error, LocalFileStore, Result, S3Store, StoreType};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use url::Url;

/// Default number of parallel part transfers
pub const DEFAULT_CONCURRENCY: usize = 5;
/// Upper bound on parallel part transfers
pub const MAX_CONCURRENCY: usize = 100;
/// Default multipart part size in MiB
pub const DEFAULT_PART_SIZE_MB: u64 = 8;
/// Smallest part size S3 accepts (except for the last part)
pub const MIN_PART_SIZE_MB: u64 = 5;
/// Largest part size S3 accepts
pub const MAX_PART_SIZE_MB: u64 = 5120;

/// S3 backend settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Options {
    /// Bucket name
    pub bucket: String,
    /// Key prefix prepended to every object key (no leading or trailing `/`)
    #[serde(default)]
    pub prefix: String,
    /// Region override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible services
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Address buckets by path instead of virtual host
    #[serde(default)]
    pub use_path_style: bool,
    /// Parallel part transfers; 0 selects the default
    #[serde(default)]
    pub concurrency: usize,
    /// Part size in MiB; 0 selects the default
    #[serde(default)]
    pub part_size_mb: u64,
}

impl S3Options {
    /// Options for `bucket` with all defaults
    #[must_use]
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: String::new(),
            region: None,
            endpoint: None,
            use_path_style: false,
            concurrency: 0,
            part_size_mb: 0,
        }
    }

    /// Parse an `s3://` URL.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a missing bucket, an unknown or
    /// malformed query parameter, or out-of-range tuning values.
    pub fn from_url(raw: &str) -> Result<Self> {
        let url = Url::parse(raw)
            .map_err(|e| Error::configuration(format!("invalid store URL {raw:?}: {e}")))?;
        if url.scheme() != "s3" {
            return Err(Error::configuration(format!(
                "expected an s3:// URL, got {raw:?}"
            )));
        }
        let bucket = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::configuration(format!("S3 URL {raw:?} has no bucket")))?;

        let mut options = Self::new(bucket);
        options.prefix = url.path().trim_matches('/').to_string();

        for (name, value) in url.query_pairs() {
            match name.as_ref() {
                "region" => options.region = Some(value.into_owned()),
                "endpoint" => options.endpoint = Some(value.into_owned()),
                "use_path_style" => options.use_path_style = parse_bool(&name, &value)?,
                "concurrency" => options.concurrency = parse_number(&name, &value)?,
                "part_size_mb" => options.part_size_mb = parse_number(&name, &value)?,
                other => {
                    return Err(Error::configuration(format!(
                        "unknown S3 store parameter {other:?}"
                    )));
                }
            }
        }

        options.validate()?;
        Ok(options)
    }

    /// Check tuning bounds.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if concurrency exceeds
    /// [`MAX_CONCURRENCY`] or the part size is outside
    /// [`MIN_PART_SIZE_MB`]..=[`MAX_PART_SIZE_MB`].
    pub fn validate(&self) -> Result<()> {
        if self.bucket.is_empty() {
            return Err(Error::configuration("S3 bucket must not be empty"));
        }
        if self.concurrency > MAX_CONCURRENCY {
            return Err(Error::configuration(format!(
                "concurrency {} exceeds the maximum of {MAX_CONCURRENCY}",
                self.concurrency
            )));
        }
        if self.part_size_mb != 0
            && !(MIN_PART_SIZE_MB..=MAX_PART_SIZE_MB).contains(&self.part_size_mb)
        {
            return Err(Error::configuration(format!(
                "part_size_mb {} must be between {MIN_PART_SIZE_MB} and {MAX_PART_SIZE_MB}",
                self.part_size_mb
            )));
        }
        Ok(())
    }

    /// Concurrency with the default applied
    #[must_use]
    pub const fn effective_concurrency(&self) -> usize {
        if self.concurrency == 0 {
            DEFAULT_CONCURRENCY
        } else {
            self.concurrency
        }
    }

    /// Part size in bytes with the default applied
    #[must_use]
    pub const fn part_size_bytes(&self) -> u64 {
        let mb = if self.part_size_mb == 0 {
            DEFAULT_PART_SIZE_MB
        } else {
            self.part_size_mb
        };
        mb * 1024 * 1024
    }
}

/// Artifact CLI backend settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NscOptions {
    /// Program to execute
    #[serde(default = "default_program")]
    pub program: PathBuf,
    /// Arguments inserted before `artifact upload|download`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

fn default_program() -> PathBuf {
    PathBuf::from("nsc")
}

impl Default for NscOptions {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: Vec::new(),
        }
    }
}

/// Configuration for one storage backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    /// S3-compatible object storage
    S3(S3Options),
    /// Directory tree
    LocalFile {
        /// Store root
        root: PathBuf,
    },
    /// External artifact CLI
    Nsc(NscOptions),
}

impl StoreConfig {
    /// Parse a store URL (`s3://`, `file://` or `nsc://`).
    ///
    /// # Errors
    ///
    /// Returns a configuration error for unknown schemes or invalid
    /// parameters.
    pub fn from_url(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.starts_with("s3://") {
            return S3Options::from_url(raw).map(Self::S3);
        }
        if let Some(rest) = raw.strip_prefix("file://") {
            return parse_file_root(rest).map(|root| Self::LocalFile { root });
        }
        if raw == "nsc" || raw.starts_with("nsc:") {
            return parse_nsc(raw).map(Self::Nsc);
        }
        Err(Error::configuration(format!(
            "unsupported store URL {raw:?} (expected s3://, file:// or nsc://)"
        )))
    }

    /// Backend this configuration describes
    #[must_use]
    pub const fn store_type(&self) -> StoreType {
        match self {
            Self::S3(_) => StoreType::S3,
            Self::LocalFile { .. } => StoreType::LocalFile,
            Self::Nsc(_) => StoreType::Nsc,
        }
    }

    /// Construct the backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be initialized.
    pub async fn open(&self) -> Result<Arc<dyn BlobStore>> {
        Ok(match self {
            Self::S3(options) => Arc::new(S3Store::connect(options.clone()).await?),
            Self::LocalFile { root } => Arc::new(LocalFileStore::new(root)?),
            Self::Nsc(options) => Arc::new(ArtifactCliStore::new(options.clone())),
        })
    }
}

fn parse_file_root(rest: &str) -> Result<PathBuf> {
    let root = if rest == "~" {
        home_dir()?
    } else if let Some(tail) = rest.strip_prefix("~/") {
        home_dir()?.join(tail)
    } else {
        PathBuf::from(rest)
    };

    if !root.is_absolute() {
        return Err(Error::configuration(format!(
            "file store root {rest:?} must be an absolute path or start with ~/"
        )));
    }
    if root == Path::new("/") || root.parent().is_none() {
        return Err(Error::configuration(
            "file store root must not be the filesystem root",
        ));
    }
    Ok(root)
}

fn parse_nsc(raw: &str) -> Result<NscOptions> {
    let mut options = NscOptions::default();
    let Some(query) = raw.split_once('?').map(|(_, q)| q) else {
        return Ok(options);
    };
    for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
        match name.as_ref() {
            "program" if !value.is_empty() => options.program = PathBuf::from(value.as_ref()),
            "arg" => options.args.push(value.into_owned()),
            other => {
                return Err(Error::configuration(format!(
                    "unknown or empty nsc store parameter {other:?}"
                )));
            }
        }
    }
    Ok(options)
}

fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().ok_or_else(|| Error::configuration("cannot expand ~: home directory unknown"))
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(Error::configuration(format!(
            "{name} must be a boolean, got {value:?}"
        ))),
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| {
        Error::configuration(format!("{name} must be a non-negative integer, got {value:?}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn parses_full_s3_url() {
        let config = StoreConfig::from_url(
            "s3://ci-cache/team/builds/?region=eu-west-1&endpoint=http://minio:9000&use_path_style=true&concurrency=8&part_size_mb=16",
        )
        .unwrap();

        let StoreConfig::S3(options) = config else {
            panic!("expected S3 config");
        };
        assert_eq!(options.bucket, "ci-cache");
        assert_eq!(options.prefix, "team/builds");
        assert_eq!(options.region.as_deref(), Some("eu-west-1"));
        assert_eq!(options.endpoint.as_deref(), Some("http://minio:9000"));
        assert!(options.use_path_style);
        assert_eq!(options.effective_concurrency(), 8);
        assert_eq!(options.part_size_bytes(), 16 * 1024 * 1024);
    }

    #[test]
    fn s3_defaults_apply_for_zero() {
        let options = S3Options::from_url("s3://bucket?concurrency=0&part_size_mb=0").unwrap();
        assert_eq!(options.prefix, "");
        assert_eq!(options.effective_concurrency(), DEFAULT_CONCURRENCY);
        assert_eq!(options.part_size_bytes(), DEFAULT_PART_SIZE_MB * 1024 * 1024);
    }

    #[test]
    fn s3_bounds_are_enforced() {
        for url in [
            "s3://bucket?concurrency=101",
            "s3://bucket?part_size_mb=4",
            "s3://bucket?part_size_mb=5121",
            "s3://bucket?concurrency=-1",
            "s3://bucket?use_path_style=maybe",
            "s3://bucket?colour=blue",
            "s3:///prefix-only",
        ] {
            let err = StoreConfig::from_url(url).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Configuration, "{url}");
        }
        assert!(S3Options::from_url("s3://bucket?concurrency=100&part_size_mb=5").is_ok());
        assert!(S3Options::from_url("s3://bucket?part_size_mb=5120").is_ok());
    }

    #[test]
    fn parses_file_urls() {
        let config = StoreConfig::from_url("file:///var/cache/cistash").unwrap();
        assert_eq!(
            config,
            StoreConfig::LocalFile {
                root: PathBuf::from("/var/cache/cistash")
            }
        );
        assert_eq!(config.store_type(), StoreType::LocalFile);
    }

    #[test]
    fn file_url_expands_home() {
        temp_env::with_var("HOME", Some("/home/ci"), || {
            let config = StoreConfig::from_url("file://~/stash").unwrap();
            assert_eq!(
                config,
                StoreConfig::LocalFile {
                    root: PathBuf::from("/home/ci/stash")
                }
            );
        });
    }

    #[test]
    fn file_url_rejects_root_and_relative() {
        for url in ["file:///", "file://relative/dir", "file://."] {
            assert!(StoreConfig::from_url(url).is_err(), "{url}");
        }
    }

    #[test]
    fn parses_nsc_urls() {
        assert_eq!(
            StoreConfig::from_url("nsc://").unwrap(),
            StoreConfig::Nsc(NscOptions::default())
        );
        let StoreConfig::Nsc(options) =
            StoreConfig::from_url("nsc://?program=/opt/bin/nsc").unwrap()
        else {
            panic!("expected nsc config");
        };
        assert_eq!(options.program, PathBuf::from("/opt/bin/nsc"));
        assert!(options.args.is_empty());

        let StoreConfig::Nsc(options) =
            StoreConfig::from_url("nsc://?arg=--workspace&arg=ci").unwrap()
        else {
            panic!("expected nsc config");
        };
        assert_eq!(options.program, PathBuf::from("nsc"));
        assert_eq!(options.args, vec!["--workspace", "ci"]);
    }

    #[test]
    fn store_config_serializes_with_type_tag() {
        let config = StoreConfig::from_url("s3://bucket/p?concurrency=3").unwrap();
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["type"], "s3");
        assert_eq!(json["bucket"], "bucket");
        let back: StoreConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);

        let local: StoreConfig =
            serde_json::from_str(r#"{"type":"local_file","root":"/srv/cache"}"#).unwrap();
        assert_eq!(local.store_type(), StoreType::LocalFile);
    }

    #[test]
    fn rejects_unknown_scheme() {
        let err = StoreConfig::from_url("gs://bucket").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
