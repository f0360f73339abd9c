//! Subcommand execution

use crate::cli::{Cli, Commands, RemoteArgs};
use crate::errors::CliError;
use crate::{caches, output};
use cistash_cache::{BuildContext, Cache, CacheConfig};
use cistash_keys::{KeyResolver, templates};
use cistash_registry::{HttpRegistryClient, RegistryConfig};
use cistash_store::{StoreConfig, StoreSet};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Run the parsed command line, writing results to `out`
pub async fn run(cli: Cli, cancel: CancellationToken, out: &mut dyn Write) -> Result<(), CliError> {
    match &cli.command {
        Commands::Templates => templates_command(cli.json, out),
        Commands::Key => {
            let working_dir = absolute(&cli.working_dir)?;
            let caches = configured_caches(&cli)?;
            key_command(&KeyResolver::new(working_dir), &caches, cli.json, out)
        }
        Commands::Save(args) => {
            let caches = configured_caches(&cli)?;
            let cache = connect(args, absolute(&cli.working_dir)?, cancel.clone())?;
            let outcome = save_command(&cache, &caches, cli.json, out).await;
            check_cancelled(&cancel)?;
            outcome
        }
        Commands::Restore(args) => {
            let caches = configured_caches(&cli)?;
            let cache = connect(args, absolute(&cli.working_dir)?, cancel.clone())?;
            let outcome = restore_command(&cache, &caches, cli.json, out).await;
            check_cancelled(&cancel)?;
            outcome
        }
    }
}

fn configured_caches(cli: &Cli) -> Result<Vec<CacheConfig>, CliError> {
    let path = cli.caches.as_deref().ok_or(CliError::NoCaches)?;
    caches::select(caches::load_caches(path)?, &cli.ids)
}

fn absolute(dir: &Path) -> Result<PathBuf, CliError> {
    std::path::absolute(dir).map_err(|e| CliError::file("resolve", dir, e))
}

fn check_cancelled(cancel: &CancellationToken) -> Result<(), CliError> {
    if cancel.is_cancelled() {
        return Err(CliError::Cancelled);
    }
    Ok(())
}

/// Build an orchestrator from the remote settings
pub fn connect(
    args: &RemoteArgs,
    working_dir: PathBuf,
    cancel: CancellationToken,
) -> Result<Cache, CliError> {
    let mut config = RegistryConfig::new(args.registry_url.trim());
    config.timeout_secs = args.timeout;
    if let Some(token) = args.registry_token.as_deref().filter(|t| !t.is_empty()) {
        config = config.with_token(token);
    }
    let client = HttpRegistryClient::new(config)?;

    let stores = args
        .stores
        .iter()
        .map(|url| url.trim())
        .filter(|url| !url.is_empty())
        .map(StoreConfig::from_url)
        .collect::<Result<Vec<_>, _>>()?;
    if stores.is_empty() {
        warn!("No blob store URL configured; only the nsc store is available");
    }

    Ok(Cache::new(
        Arc::new(client),
        StoreSet::new(stores),
        KeyResolver::new(working_dir),
    )
    .with_build_context(BuildContext {
        branch: args.branch.clone(),
        pipeline: args.pipeline.clone(),
        organization: args.organization.clone(),
    })
    .with_default_registry(args.registry_slug.trim())
    .with_cancellation(cancel))
}

#[instrument(skip_all, fields(count = caches.len()))]
async fn save_command(
    cache: &Cache,
    caches: &[CacheConfig],
    json: bool,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let results = cache.save_all(caches).await;
    if json {
        let reports: Vec<output::Report<output::SaveReport>> =
            results.iter().map(|(_, r)| output::report(r)).collect();
        write_json(out, &reports)?;
    } else {
        for (id, outcome) in &results {
            write_line(out, &output::human_save(id, outcome))?;
        }
    }
    let failed = results.iter().filter(|(_, r)| r.is_err()).count();
    summarize(failed, results.len())
}

#[instrument(skip_all, fields(count = caches.len()))]
async fn restore_command(
    cache: &Cache,
    caches: &[CacheConfig],
    json: bool,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let results = cache.restore_all(caches).await;
    if json {
        let reports: Vec<output::Report<output::RestoreReport>> =
            results.values().map(output::report).collect();
        write_json(out, &reports)?;
    } else {
        for (id, outcome) in &results {
            write_line(out, &output::human_restore(id, outcome))?;
        }
    }
    let failed = results.values().filter(|r| r.is_err()).count();
    summarize(failed, results.len())
}

fn key_command(
    resolver: &KeyResolver,
    caches: &[CacheConfig],
    json: bool,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let expanded = caches
        .iter()
        .map(|c| c.expand(resolver))
        .collect::<Result<Vec<_>, _>>()?;
    if json {
        let reports: Vec<output::KeyReport<'_>> = expanded.iter().map(Into::into).collect();
        write_json(out, &reports)
    } else {
        for cache in &expanded {
            write_line(out, &output::human_key(cache))?;
        }
        Ok(())
    }
}

fn templates_command(json: bool, out: &mut dyn Write) -> Result<(), CliError> {
    if json {
        let reports: Vec<output::TemplateReport<'_>> = templates::all()
            .map(|(name, template)| output::TemplateReport { name, template })
            .collect();
        write_json(out, &reports)
    } else {
        for (name, template) in templates::all() {
            write_line(out, &output::human_template(name, template))?;
        }
        Ok(())
    }
}

fn summarize(failed: usize, total: usize) -> Result<(), CliError> {
    if failed > 0 {
        return Err(CliError::CachesFailed { failed, total });
    }
    info!(total, "All caches processed");
    Ok(())
}

fn write_json<T: Serialize + ?Sized>(out: &mut dyn Write, value: &T) -> Result<(), CliError> {
    serde_json::to_writer_pretty(&mut *out, value)
        .map_err(|e| CliError::Output { source: e.into() })?;
    write_line(out, "")
}

fn write_line(out: &mut dyn Write, line: &str) -> Result<(), CliError> {
    writeln!(out, "{line}").map_err(|source| CliError::Output { source })
}
