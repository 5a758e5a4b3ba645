// executable.rs - Locating and validating the phpmd executable
//
// The executable is either configured by the user, installed into the
// project by composer, or expected on PATH. Whatever is chosen must answer
// `--version` successfully before it is used.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;

/// Command name used when nothing more specific is found
pub const DEFAULT_COMMAND: &str = "phpmd";

/// Composer package that ships phpmd
pub const COMPOSER_PACKAGE: &str = "phpmd/phpmd";

const COMPOSER_MANIFEST: &str = "composer.json";

/// Why no usable executable could be found
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// The user-configured path does not run
    #[error("No such phpmd executable: {}", .0.display())]
    NoExecutable(PathBuf),

    /// Neither the project nor PATH provide a working phpmd
    #[error("Unable to locate phpmd. Please add phpmd in your global or project local using composer.")]
    UnableToLocate,
}

/// Checks whether a candidate executable works
#[async_trait]
pub trait VersionProbe: Send + Sync {
    async fn probe(&self, executable: &Path) -> bool;
}

/// Runs `<executable> --version` and trusts the exit status
#[derive(Debug, Clone)]
pub struct CommandProbe {
    timeout: Duration,
}

impl CommandProbe {
    /// Default timeout for version probes (10 seconds).
    const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for CommandProbe {
    fn default() -> Self {
        Self::with_timeout(Self::PROBE_TIMEOUT)
    }
}

#[async_trait]
impl VersionProbe for CommandProbe {
    async fn probe(&self, executable: &Path) -> bool {
        let mut cmd = Command::new(executable);
        cmd.arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                log::debug!("Failed to spawn {} --version: {}", executable.display(), e);
                return false;
            }
        };

        match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) => {
                log::trace!("{} --version exited with {}", executable.display(), status);
                status.success()
            }
            Ok(Err(e)) => {
                log::debug!("Failed to wait for {} --version: {}", executable.display(), e);
                false
            }
            Err(_) => {
                log::debug!(
                    "{} --version timed out after {:?}",
                    executable.display(),
                    self.timeout
                );
                false
            }
        }
    }
}

/// Resolves the phpmd executable and caches it per workspace root
pub struct ExecutableResolver {
    probe: Arc<dyn VersionProbe>,
    cache: DashMap<Option<PathBuf>, PathBuf>,
}

impl Default for ExecutableResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutableResolver {
    pub fn new() -> Self {
        Self::with_probe(Arc::new(CommandProbe::default()))
    }

    pub fn with_probe(probe: Arc<dyn VersionProbe>) -> Self {
        Self {
            probe,
            cache: DashMap::new(),
        }
    }

    /// Resolve the executable for a workspace, using the cached result when
    /// one exists.
    ///
    /// Lookup order when nothing is cached:
    /// 1. `configured`, which must pass the version probe
    ///    (otherwise [`ResolveError::NoExecutable`]);
    /// 2. `<root>/vendor/bin/phpmd` when `<root>/composer.json` requires
    ///    `phpmd/phpmd`;
    /// 3. the bare `phpmd` command.
    ///
    /// Candidates from 2 and 3 that fail the probe yield
    /// [`ResolveError::UnableToLocate`]. Failures are not cached.
    pub async fn resolve(
        &self,
        workspace_root: Option<&Path>,
        configured: Option<&Path>,
    ) -> Result<PathBuf, ResolveError> {
        let key = workspace_root.map(Path::to_path_buf);
        if let Some(cached) = self.cache.get(&key).map(|entry| entry.value().clone()) {
            return Ok(cached);
        }

        let resolved = self.resolve_uncached(workspace_root, configured).await?;
        log::info!("Using phpmd executable at {}", resolved.display());
        self.cache.insert(key, resolved.clone());
        Ok(resolved)
    }

    async fn resolve_uncached(
        &self,
        workspace_root: Option<&Path>,
        configured: Option<&Path>,
    ) -> Result<PathBuf, ResolveError> {
        if let Some(path) = configured {
            return if self.probe.probe(path).await {
                Ok(path.to_path_buf())
            } else {
                log::trace!("Configured phpmd path is not valid: {:?}", path);
                Err(ResolveError::NoExecutable(path.to_path_buf()))
            };
        }

        let candidate = match workspace_root {
            Some(root) => composer_executable(root).await,
            None => None,
        }
        .unwrap_or_else(|| PathBuf::from(DEFAULT_COMMAND));

        if self.probe.probe(&candidate).await {
            Ok(candidate)
        } else {
            Err(ResolveError::UnableToLocate)
        }
    }

    /// Cached executable for a workspace root, if any
    pub fn cached(&self, workspace_root: Option<&Path>) -> Option<PathBuf> {
        self.cache
            .get(&workspace_root.map(Path::to_path_buf))
            .map(|entry| entry.value().clone())
    }

    /// Drop every cached resolution (after reconfiguration)
    pub fn invalidate(&self) {
        self.cache.clear();
    }
}

/// The parts of composer.json that matter here. The dependency maps are kept
/// as raw values so a malformed one does not hide the other.
#[derive(Debug, Deserialize)]
struct ComposerManifest {
    #[serde(default)]
    require: serde_json::Value,
    #[serde(default, rename = "require-dev")]
    require_dev: serde_json::Value,
}

/// Whether a dependency map lists phpmd with a version constraint
fn requires_phpmd(dependencies: &serde_json::Value) -> bool {
    dependencies
        .as_object()
        .and_then(|deps| deps.get(COMPOSER_PACKAGE))
        .and_then(serde_json::Value::as_str)
        .is_some_and(|constraint| !constraint.trim().is_empty())
}

/// Whether a composer.json document declares phpmd as a dependency in
/// `require` or `require-dev`.
///
/// Anything that does not parse as a manifest object counts as "no".
fn manifest_requires_phpmd(contents: &str) -> bool {
    match serde_json::from_str::<ComposerManifest>(contents) {
        Ok(manifest) => requires_phpmd(&manifest.require) || requires_phpmd(&manifest.require_dev),
        Err(e) => {
            log::debug!("Ignoring malformed {}: {}", COMPOSER_MANIFEST, e);
            false
        }
    }
}

/// Path of the composer-installed phpmd for a project, when the project
/// requires it and the binary is present.
async fn composer_executable(root: &Path) -> Option<PathBuf> {
    let manifest_path = root.join(COMPOSER_MANIFEST);
    let contents = match tokio::fs::read_to_string(&manifest_path).await {
        Ok(contents) => contents,
        Err(e) => {
            log::trace!("No readable {}: {}", manifest_path.display(), e);
            return None;
        }
    };

    if !manifest_requires_phpmd(&contents) {
        return None;
    }

    let binary = root.join("vendor").join("bin").join(DEFAULT_COMMAND);
    if tokio::fs::metadata(&binary).await.is_ok() {
        Some(binary)
    } else {
        log::debug!(
            "{} requires {} but {} is missing",
            manifest_path.display(),
            COMPOSER_PACKAGE,
            binary.display()
        );
        None
    }
}
