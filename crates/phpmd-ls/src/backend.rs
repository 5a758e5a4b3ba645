//
// backend.rs
//
// Copyright (C) 2026 Jonathan Marc Bearak
//

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tower_lsp::jsonrpc::Result;
use tower_lsp::lsp_types::*;
use tower_lsp::Client;
use tower_lsp::LanguageServer;
use tower_lsp::LspService;
use tower_lsp::Server;

use crate::config::{parse_config, parse_section, PhpmdConfig, RunMode, CONFIG_SECTION};
use crate::controller::LintController;
use crate::executable::ExecutableResolver;
use crate::runner::ProcessRunner;
use crate::sink::{DiagnosticsSink, Notifier};

/// Language id of the documents phpmd can analyse
const PHP_LANGUAGE_ID: &str = "php";

/// File-system root of the first workspace folder, falling back to the root URI
fn workspace_root(params: &InitializeParams) -> Option<PathBuf> {
    #[allow(deprecated)]
    let root_uri = params.root_uri.as_ref();

    params
        .workspace_folders
        .as_ref()
        .and_then(|folders| folders.first())
        .map(|folder| &folder.uri)
        .or(root_uri)
        .and_then(|uri| uri.to_file_path().ok())
}

pub struct Backend {
    client: Client,
    controller: LintController,
    supports_configuration: AtomicBool,
}

impl Backend {
    pub fn new(client: Client) -> Self {
        let sink: Arc<dyn DiagnosticsSink> = Arc::new(client.clone());
        let notifier: Arc<dyn Notifier> = Arc::new(client.clone());
        let controller = LintController::new(
            PhpmdConfig::default(),
            ExecutableResolver::new(),
            Arc::new(ProcessRunner::default()),
            sink,
            notifier,
        );

        Self {
            client,
            controller,
            supports_configuration: AtomicBool::new(false),
        }
    }

    /// Ask the client for the `phpmd` section and apply it
    async fn pull_configuration(&self) {
        let items = vec![ConfigurationItem {
            scope_uri: None,
            section: Some(CONFIG_SECTION.to_string()),
        }];

        match self.client.configuration(items).await {
            Ok(values) => match values.first().and_then(parse_section) {
                Some(config) => {
                    self.controller.update_config(config).await;
                }
                None => log::warn!("Client returned no usable phpmd configuration"),
            },
            Err(e) => log::warn!("Failed to pull phpmd configuration: {}", e),
        }
    }

    fn lint_target(uri: &Url) -> Option<PathBuf> {
        match uri.to_file_path() {
            Ok(path) => Some(path),
            Err(()) => {
                log::trace!("Not linting {}: no file-system path", uri);
                None
            }
        }
    }
}

#[tower_lsp::async_trait]
impl LanguageServer for Backend {
    async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
        log::info!("Initializing phpmd-ls");

        self.controller.set_workspace_root(workspace_root(&params));

        let supports_configuration = params
            .capabilities
            .workspace
            .as_ref()
            .and_then(|w| w.configuration)
            .unwrap_or(false);
        self.supports_configuration
            .store(supports_configuration, Ordering::Relaxed);

        if let Some(config) = params.initialization_options.as_ref().and_then(parse_config) {
            self.controller.set_config(config);
        }

        Ok(InitializeResult {
            capabilities: ServerCapabilities {
                text_document_sync: Some(TextDocumentSyncCapability::Options(
                    TextDocumentSyncOptions {
                        open_close: Some(true),
                        change: Some(TextDocumentSyncKind::FULL),
                        save: Some(TextDocumentSyncSaveOptions::Supported(true)),
                        ..Default::default()
                    },
                )),
                ..Default::default()
            },
            server_info: Some(ServerInfo {
                name: String::from("phpmd-ls"),
                version: Some(String::from(env!("CARGO_PKG_VERSION"))),
            }),
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        log::info!("phpmd-ls initialized");

        if self.supports_configuration.load(Ordering::Relaxed) {
            self.pull_configuration().await;
        }
    }

    async fn shutdown(&self) -> Result<()> {
        log::info!("phpmd-ls shutting down");
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let document = params.text_document;
        if document.language_id != PHP_LANGUAGE_ID {
            log::trace!(
                "Ignoring {} with language id {}",
                document.uri,
                document.language_id
            );
            return;
        }
        let Some(path) = Self::lint_target(&document.uri) else {
            return;
        };

        self.controller.open(document.uri.clone(), path).await;
        self.controller.trigger(&document.uri);
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        if self.controller.config().run_mode == RunMode::OnType {
            self.controller.trigger(&params.text_document.uri);
        }
    }

    async fn did_save(&self, params: DidSaveTextDocumentParams) {
        self.controller.trigger(&params.text_document.uri);
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        self.controller.close(&params.text_document.uri).await;
    }

    async fn did_change_configuration(&self, params: DidChangeConfigurationParams) {
        log::trace!("Configuration changed, parsing new config and scheduling lint");

        match parse_config(&params.settings) {
            Some(config) => {
                self.controller.update_config(config).await;
            }
            None if self.supports_configuration.load(Ordering::Relaxed) => {
                self.pull_configuration().await;
            }
            None => {
                log::warn!("Failed to parse phpmd configuration from settings, using existing configuration");
            }
        }
    }
}

pub async fn start_lsp() -> anyhow::Result<()> {
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    let (service, socket) = LspService::new(Backend::new);
    Server::new(stdin, stdout, socket).serve(service).await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_root_prefers_first_folder() {
        let folder = Url::parse("file:///work/app").unwrap();
        #[allow(deprecated)]
        let params = InitializeParams {
            root_uri: Some(Url::parse("file:///other").unwrap()),
            workspace_folders: Some(vec![WorkspaceFolder {
                uri: folder.clone(),
                name: "app".to_string(),
            }]),
            ..Default::default()
        };
        assert_eq!(workspace_root(&params), folder.to_file_path().ok());
    }

    #[test]
    fn test_workspace_root_falls_back_to_root_uri() {
        let root = Url::parse("file:///work/app").unwrap();
        #[allow(deprecated)]
        let params = InitializeParams {
            root_uri: Some(root.clone()),
            ..Default::default()
        };
        assert_eq!(workspace_root(&params), root.to_file_path().ok());
    }

    #[test]
    fn test_workspace_root_absent() {
        assert_eq!(workspace_root(&InitializeParams::default()), None);
    }

    #[test]
    fn test_untitled_documents_have_no_lint_target() {
        let untitled = Url::parse("untitled:Untitled-1").unwrap();
        assert_eq!(Backend::lint_target(&untitled), None);
    }
}
