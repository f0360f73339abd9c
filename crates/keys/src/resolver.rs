//! Template resolution against the live filesystem

use crate::checksum;
use crate::platform;
use crate::template::{Scope, Template};
use crate::Result;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Resolves key and path templates relative to a working directory
#[derive(Debug, Clone)]
pub struct KeyResolver {
    working_dir: PathBuf,
    env: Option<HashMap<String, String>>,
}

impl KeyResolver {
    /// Create a resolver that reads the process environment
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            env: None,
        }
    }

    /// Use the given variables instead of the process environment
    #[must_use]
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = Some(env);
        self
    }

    /// Directory checksum patterns are matched against
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Resolve `template` for the cache `id`.
    ///
    /// With `recursive` set, bare checksum patterns also match in
    /// subdirectories. The result is whitespace-trimmed.
    pub fn resolve(&self, id: &str, template: &str, recursive: bool) -> Result<String> {
        let parsed = Template::parse(template)?;
        let scope = ResolveScope {
            resolver: self,
            id,
            recursive,
        };
        let key = parsed.render(&scope).trim().to_string();
        tracing::debug!(id, template, key = %key, "Resolved template");
        Ok(key)
    }

    fn lookup_env(&self, name: &str) -> Option<String> {
        match &self.env {
            Some(env) => env.get(name).cloned(),
            None => std::env::var(name).ok(),
        }
    }
}

struct ResolveScope<'r> {
    resolver: &'r KeyResolver,
    id: &'r str,
    recursive: bool,
}

impl Scope for ResolveScope<'_> {
    fn id(&self) -> &str {
        self.id
    }

    fn env(&self, name: &str) -> Option<String> {
        self.resolver.lookup_env(name)
    }

    fn checksum(&self, patterns: &[String]) -> String {
        checksum::checksum(&self.resolver.working_dir, patterns, self.recursive)
    }

    fn agent_os(&self) -> &str {
        platform::agent_os()
    }

    fn agent_arch(&self) -> &str {
        platform::agent_arch()
    }
}
