//! Command-line arguments

use crate::tracing::{LogLevel, TracingFormat};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "cistash")]
#[command(about = "Save and restore CI caches through a cache registry")]
#[command(long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(
        short = 'l',
        long,
        global = true,
        help = "Set logging level",
        default_value = "info",
        value_enum
    )]
    pub level: LogLevel,

    #[arg(
        long,
        global = true,
        help = "Log output format",
        default_value = "compact",
        value_enum
    )]
    pub log_format: TracingFormat,

    #[arg(long, global = true, help = "Print results as JSON")]
    pub json: bool,

    #[arg(
        long,
        global = true,
        env = "CISTASH_CACHES",
        help = "YAML or JSON file listing the caches"
    )]
    pub caches: Option<PathBuf>,

    #[arg(
        long = "id",
        global = true,
        value_delimiter = ',',
        help = "Only act on these cache ids"
    )]
    pub ids: Vec<String>,

    #[arg(
        short = 'C',
        long,
        global = true,
        default_value = ".",
        help = "Directory paths and checksums are resolved against"
    )]
    pub working_dir: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(about = "Archive and upload caches whose key is not in the registry")]
    Save(RemoteArgs),
    #[command(about = "Download and extract caches, falling back to older keys")]
    Restore(RemoteArgs),
    #[command(about = "Print resolved keys without contacting the registry")]
    Key,
    #[command(about = "List built-in cache templates")]
    Templates,
}

/// Registry, store and pipeline settings for commands that touch the network
#[derive(Args, Debug, Clone)]
pub struct RemoteArgs {
    #[arg(long, env = "CISTASH_REGISTRY_URL", help = "Base URL of the registry API")]
    pub registry_url: String,

    #[arg(
        long,
        env = "CISTASH_REGISTRY_TOKEN",
        hide_env_values = true,
        help = "Bearer token for the registry"
    )]
    pub registry_token: Option<String>,

    #[arg(
        long = "registry",
        env = "CISTASH_REGISTRY_SLUG",
        default_value = "",
        help = "Registry slug for caches that do not name one"
    )]
    pub registry_slug: String,

    #[arg(
        long = "store",
        env = "CISTASH_STORE_URL",
        value_delimiter = ',',
        help = "Blob store URLs (s3://bucket/prefix, file:///path, nsc://); the first is the default"
    )]
    pub stores: Vec<String>,

    #[arg(
        long,
        default_value_t = cistash_registry::DEFAULT_TIMEOUT_SECS,
        help = "Registry request timeout in seconds"
    )]
    pub timeout: u64,

    #[arg(long, env = "BUILDKITE_BRANCH", default_value = "", help = "Branch being built")]
    pub branch: String,

    #[arg(
        long,
        env = "BUILDKITE_PIPELINE_SLUG",
        default_value = "",
        help = "Pipeline slug"
    )]
    pub pipeline: String,

    #[arg(
        long,
        env = "BUILDKITE_ORGANIZATION_SLUG",
        default_value = "",
        help = "Organization slug"
    )]
    pub organization: String,
}

pub fn parse() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    const REMOTE_VARS: [&str; 8] = [
        "CISTASH_CACHES",
        "CISTASH_REGISTRY_URL",
        "CISTASH_REGISTRY_TOKEN",
        "CISTASH_REGISTRY_SLUG",
        "CISTASH_STORE_URL",
        "BUILDKITE_BRANCH",
        "BUILDKITE_PIPELINE_SLUG",
        "BUILDKITE_ORGANIZATION_SLUG",
    ];

    fn clean_env<R>(f: impl FnOnce() -> R) -> R {
        temp_env::with_vars_unset(REMOTE_VARS, f)
    }

    #[test]
    fn defaults() {
        clean_env(|| {
            let cli = Cli::try_parse_from(["cistash", "key"]).unwrap();
            assert_eq!(cli.level, LogLevel::Info);
            assert_eq!(cli.log_format, TracingFormat::Compact);
            assert!(!cli.json);
            assert!(cli.caches.is_none());
            assert!(cli.ids.is_empty());
            assert_eq!(cli.working_dir, PathBuf::from("."));
            assert!(matches!(cli.command, Commands::Key));
        });
    }

    #[test]
    fn ids_accept_commas_and_repeats() {
        clean_env(|| {
            let cli = Cli::try_parse_from(["cistash", "key", "--id", "a,b", "--id", "c"]).unwrap();
            assert_eq!(cli.ids, vec!["a", "b", "c"]);
        });
    }

    #[test]
    fn save_requires_registry_url() {
        clean_env(|| {
            assert!(Cli::try_parse_from(["cistash", "save"]).is_err());
            let cli = Cli::try_parse_from([
                "cistash",
                "save",
                "--registry-url",
                "https://registry.example.com",
            ])
            .unwrap();
            let Commands::Save(args) = cli.command else {
                panic!("expected save");
            };
            assert_eq!(args.timeout, cistash_registry::DEFAULT_TIMEOUT_SECS);
            assert!(args.stores.is_empty());
            assert!(args.registry_slug.is_empty());
        });
    }

    #[test]
    fn remote_settings_come_from_env() {
        temp_env::with_vars(
            [
                ("CISTASH_CACHES", Some("caches.yml")),
                ("CISTASH_REGISTRY_URL", Some("https://registry.example.com")),
                ("CISTASH_REGISTRY_TOKEN", Some("secret")),
                ("CISTASH_REGISTRY_SLUG", Some("main")),
                ("CISTASH_STORE_URL", Some("s3://bucket/ci,file:///tmp/cache")),
                ("BUILDKITE_BRANCH", Some("feature/x")),
                ("BUILDKITE_PIPELINE_SLUG", Some("build")),
                ("BUILDKITE_ORGANIZATION_SLUG", Some("acme")),
            ],
            || {
                let cli = Cli::try_parse_from(["cistash", "restore"]).unwrap();
                assert_eq!(cli.caches, Some(PathBuf::from("caches.yml")));
                let Commands::Restore(args) = cli.command else {
                    panic!("expected restore");
                };
                assert_eq!(args.registry_url, "https://registry.example.com");
                assert_eq!(args.registry_token.as_deref(), Some("secret"));
                assert_eq!(args.registry_slug, "main");
                assert_eq!(args.stores, vec!["s3://bucket/ci", "file:///tmp/cache"]);
                assert_eq!(args.branch, "feature/x");
                assert_eq!(args.pipeline, "build");
                assert_eq!(args.organization, "acme");
            },
        );
    }

    #[test]
    fn invalid_level_is_rejected() {
        clean_env(|| {
            assert!(Cli::try_parse_from(["cistash", "--level", "loud", "key"]).is_err());
        });
    }

    #[test]
    fn missing_subcommand() {
        clean_env(|| {
            assert!(Cli::try_parse_from(["cistash"]).is_err());
        });
    }
}
