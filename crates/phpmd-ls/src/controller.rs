//
// controller.rs
//
// Decides when phpmd runs for a document and what happens to its results
//

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tower_lsp::lsp_types::{Diagnostic, MessageType, Url};

use crate::config::PhpmdConfig;
use crate::executable::ExecutableResolver;
use crate::publisher::DiagnosticPublisher;
use crate::runner::{Invocation, PhpmdRunner};
use crate::schedule::{DebounceScheduler, InvocationGate};
use crate::sink::{DiagnosticsSink, Notifier};

/// Prefix for messages shown to the user
const NOTICE_PREFIX: &str = "phpmd";

/// What a finished phpmd run means for the published diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitAction {
    /// No violations: clear the document
    Clear,
    /// Violations found: publish what was parsed
    Publish,
    /// phpmd itself failed: leave the document as it is
    Keep,
}

impl ExitAction {
    /// phpmd exits with 0 (clean), 1 (internal error) or 2 (violations).
    /// Unknown non-zero codes are treated like violations; a run killed by a
    /// signal is treated like an internal error.
    pub fn from_exit_code(code: Option<i32>) -> Self {
        match code {
            Some(0) => ExitAction::Clear,
            Some(1) | None => ExitAction::Keep,
            Some(_) => ExitAction::Publish,
        }
    }
}

/// Owns the per-document invocation state machine:
/// idle, pending (debounce timer armed), running (process live).
///
/// Cloning is cheap; clones share state.
#[derive(Clone)]
pub struct LintController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    config: RwLock<PhpmdConfig>,
    workspace_root: RwLock<Option<PathBuf>>,
    /// Open documents and their file-system paths
    documents: Mutex<HashMap<Url, PathBuf>>,
    resolver: ExecutableResolver,
    runner: Arc<dyn PhpmdRunner>,
    publisher: DiagnosticPublisher,
    notifier: Arc<dyn Notifier>,
    scheduler: DebounceScheduler,
    gate: InvocationGate,
    /// Last resolution error shown to the user, to avoid repeating it on
    /// every save
    reported_error: Mutex<Option<String>>,
}

impl LintController {
    pub fn new(
        config: PhpmdConfig,
        resolver: ExecutableResolver,
        runner: Arc<dyn PhpmdRunner>,
        sink: Arc<dyn DiagnosticsSink>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                config: RwLock::new(config),
                workspace_root: RwLock::new(None),
                documents: Mutex::new(HashMap::new()),
                resolver,
                runner,
                publisher: DiagnosticPublisher::new(sink),
                notifier,
                scheduler: DebounceScheduler::new(),
                gate: InvocationGate::new(),
                reported_error: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> PhpmdConfig {
        self.inner.config()
    }

    /// Replace the configuration without re-linting (before any document
    /// is open).
    pub fn set_config(&self, config: PhpmdConfig) {
        *self
            .inner
            .config
            .write()
            .unwrap_or_else(PoisonError::into_inner) = config;
        self.inner.resolver.invalidate();
    }

    pub fn set_workspace_root(&self, root: Option<PathBuf>) {
        log::info!("Workspace root: {:?}", root);
        *self
            .inner
            .workspace_root
            .write()
            .unwrap_or_else(PoisonError::into_inner) = root;
    }

    /// Apply new settings: re-resolve the executable and re-lint every open
    /// document. Disabling clears everything that was published.
    pub async fn update_config(&self, config: PhpmdConfig) -> Vec<JoinHandle<()>> {
        let enabled = config.enabled;
        self.set_config(config);
        *self
            .inner
            .reported_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;

        let open = self.open_documents();
        if !enabled {
            log::info!("phpmd disabled, clearing diagnostics of {} documents", open.len());
            self.inner.scheduler.cancel_all();
            for uri in &open {
                if let Some(generation) = self.inner.dispatch_if_open(uri) {
                    if !self.inner.publisher.clear(uri, generation).await {
                        log::debug!("Diagnostics of {} were not cleared", uri);
                    }
                }
            }
            return Vec::new();
        }

        open.iter().filter_map(|uri| self.trigger(uri)).collect()
    }

    /// Start tracking an open document
    pub async fn open(&self, uri: Url, path: PathBuf) {
        {
            let mut documents = self
                .inner
                .documents
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            documents.insert(uri.clone(), path);
        }
        self.inner
            .publisher
            .open(&uri, self.inner.gate.high_water_mark())
            .await;
    }

    /// Stop tracking a document: cancel its timer, make in-flight runs
    /// stale and clear its diagnostics.
    pub async fn close(&self, uri: &Url) {
        self.inner.scheduler.cancel(uri);
        {
            let mut documents = self
                .inner
                .documents
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            documents.remove(uri);
            self.inner.gate.forget(uri);
        }
        self.inner.publisher.close(uri).await;
    }

    pub fn open_documents(&self) -> Vec<Url> {
        self.inner
            .documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn is_pending(&self, uri: &Url) -> bool {
        self.inner.scheduler.is_pending(uri)
    }

    /// Diagnostics currently published for a document
    pub async fn diagnostics(&self, uri: &Url) -> Option<Vec<Diagnostic>> {
        self.inner.publisher.current(uri).await
    }

    /// Request a lint of an open document.
    ///
    /// (Re)arms the document's debounce timer; the last trigger within the
    /// quiet period wins. A phpmd process that is already running is left
    /// alone. Returns `None` when linting is disabled or the document is not
    /// open.
    pub fn trigger(&self, uri: &Url) -> Option<JoinHandle<()>> {
        let config = self.inner.config();
        if !config.enabled {
            return None;
        }
        let path = self.inner.document_path(uri)?;

        let (run_id, token) = self.inner.scheduler.schedule(uri.clone());
        let debounce = Duration::from_millis(config.debounce_ms);
        let inner = self.inner.clone();
        let uri = uri.clone();

        Some(tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    log::trace!("Debounced lint of {} superseded", uri);
                    return;
                }
                _ = tokio::time::sleep(debounce) => {}
            }
            inner.scheduler.complete(&uri, run_id);
            inner.lint(uri, path).await;
        }))
    }
}

impl ControllerInner {
    fn config(&self) -> PhpmdConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn workspace_root(&self) -> Option<PathBuf> {
        self.workspace_root
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn document_path(&self, uri: &Url) -> Option<PathBuf> {
        self.documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(uri)
            .cloned()
    }

    /// Take a sequence number for a new invocation, unless the document was
    /// closed in the meantime.
    fn dispatch_if_open(&self, uri: &Url) -> Option<u64> {
        let documents = self.documents.lock().unwrap_or_else(PoisonError::into_inner);
        documents.contains_key(uri).then(|| self.gate.dispatch(uri))
    }

    async fn lint(&self, uri: Url, path: PathBuf) {
        let config = self.config();
        if !config.enabled {
            return;
        }
        let Some(generation) = self.dispatch_if_open(&uri) else {
            log::trace!("Skipping lint of closed document {}", uri);
            return;
        };

        let workspace_root = self.workspace_root();
        let executable = match self
            .resolver
            .resolve(workspace_root.as_deref(), config.executable_path.as_deref())
            .await
        {
            Ok(executable) => executable,
            Err(e) => {
                log::warn!("Skipping lint of {}: {}", uri, e);
                self.report_resolution_error(e.to_string()).await;
                return;
            }
        };

        let invocation = Invocation {
            executable,
            document: path,
            rulesets: config.rulesets_argument(),
            max_problems: config.max_number_of_problems,
            working_dir: workspace_root,
        };
        log::debug!("Running {}", invocation);

        let outcome = match self.runner.run(&invocation).await {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("phpmd run for {} failed: {:#}", uri, e);
                self.notifier
                    .log(MessageType::ERROR, format!("{NOTICE_PREFIX}: {e:#}"))
                    .await;
                return;
            }
        };

        let stderr = outcome.stderr.trim_end();
        if !stderr.is_empty() {
            log::warn!("phpmd stderr for {}: {}", uri, stderr);
            self.notifier
                .log(MessageType::ERROR, format!("{NOTICE_PREFIX}: {stderr}"))
                .await;
        }

        if !self.gate.is_latest(&uri, generation) {
            log::trace!(
                "Dropping stale phpmd result for {} (invocation {})",
                uri,
                generation
            );
            return;
        }

        let accepted = match ExitAction::from_exit_code(outcome.exit_code) {
            ExitAction::Clear => self.publisher.clear(&uri, generation).await,
            ExitAction::Publish => {
                self.publisher
                    .publish(&uri, generation, outcome.diagnostics)
                    .await
            }
            ExitAction::Keep => {
                let message = format!(
                    "phpmd failed on {} (exit code {:?}); keeping previous diagnostics",
                    invocation.document.display(),
                    outcome.exit_code
                );
                log::warn!("{}", message);
                self.notifier
                    .log(MessageType::WARNING, format!("{NOTICE_PREFIX}: {message}"))
                    .await;
                true
            }
        };
        if !accepted {
            log::debug!(
                "Result of invocation {} for {} was not published",
                generation,
                uri
            );
        }
    }

    async fn report_resolution_error(&self, message: String) {
        {
            let mut reported = self
                .reported_error
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if reported.as_deref() == Some(message.as_str()) {
                return;
            }
            *reported = Some(message.clone());
        }
        self.notifier
            .notify(MessageType::WARNING, format!("{NOTICE_PREFIX}: {message}"))
            .await;
    }
}
