//! Blob store that shells out to an artifact CLI
//!
//! Invokes `<program> [args..] artifact upload <src> <key>` and
//! `<program> [args..] artifact download <key> <dest>`. Arguments are passed directly
//! to the process (no shell), and keys and paths are additionally screened for
//! shell metacharacters before the program is started.

use crate::atomic;
use crate::validate::{validate_shell_safe_key, validate_shell_safe_path};
use crate::{BlobStore, Error, NscOptions, Result, StoreType, TransferInfo};
use async_trait::async_trait;
use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;

/// Blob store backed by an external artifact CLI
#[derive(Debug, Clone)]
pub struct ArtifactCliStore {
    options: NscOptions,
}

impl ArtifactCliStore {
    /// Create a store that runs `options.program`
    #[must_use]
    pub const fn new(options: NscOptions) -> Self {
        Self { options }
    }

    async fn run(&self, args: &[&OsStr]) -> Result<()> {
        let program = self.options.program.display().to_string();
        tracing::debug!(program = %program, ?args, "Running artifact CLI");

        let output = Command::new(&self.options.program)
            .args(&self.options.args)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                Error::transfer(StoreType::Nsc, format!("failed to execute {program}: {e}"))
            })?;

        if !output.status.success() {
            return Err(Error::CommandFailed {
                program,
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for ArtifactCliStore {
    fn store_type(&self) -> StoreType {
        StoreType::Nsc
    }

    async fn upload(&self, source: &Path, key: &str) -> Result<TransferInfo> {
        validate_shell_safe_key(key)?;
        validate_shell_safe_path(source)?;
        let size = tokio::fs::metadata(source)
            .await
            .map_err(|e| Error::io(e, source, "stat"))?
            .len();

        let start = Instant::now();
        self.run(&[
            OsStr::new("artifact"),
            OsStr::new("upload"),
            source.as_os_str(),
            OsStr::new(key),
        ])
        .await?;

        Ok(TransferInfo::new(size, start.elapsed()))
    }

    async fn download(&self, key: &str, dest: &Path) -> Result<TransferInfo> {
        validate_shell_safe_key(key)?;
        validate_shell_safe_path(dest)?;

        // The CLI writes to a temp path that is renamed into place on success
        let temp = atomic::temp_file_for(dest)?.into_temp_path();
        validate_shell_safe_path(&temp)?;

        let start = Instant::now();
        self.run(&[
            OsStr::new("artifact"),
            OsStr::new("download"),
            OsStr::new(key),
            temp.as_os_str(),
        ])
        .await?;

        let size = tokio::fs::metadata(&temp)
            .await
            .map_err(|e| Error::io(e, &temp, "stat"))?
            .len();
        atomic::replace(temp, dest)?;

        Ok(TransferInfo::new(size, start.elapsed()))
    }
}
