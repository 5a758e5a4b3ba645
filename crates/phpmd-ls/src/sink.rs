//
// sink.rs
//
// Editor-facing outputs of the linter
//

use async_trait::async_trait;
use tower_lsp::lsp_types::{Diagnostic, MessageType, Url};
use tower_lsp::Client;

/// Receives the finished diagnostic list for a document
#[async_trait]
pub trait DiagnosticsSink: Send + Sync {
    async fn publish(&self, uri: Url, diagnostics: Vec<Diagnostic>);
}

/// User-visible messages and the server log channel
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Pop-up message shown to the user
    async fn notify(&self, level: MessageType, message: String);
    /// Entry in the client's output log
    async fn log(&self, level: MessageType, message: String);
}

#[async_trait]
impl DiagnosticsSink for Client {
    async fn publish(&self, uri: Url, diagnostics: Vec<Diagnostic>) {
        self.publish_diagnostics(uri, diagnostics, None).await;
    }
}

#[async_trait]
impl Notifier for Client {
    async fn notify(&self, level: MessageType, message: String) {
        self.show_message(level, message).await;
    }

    async fn log(&self, level: MessageType, message: String) {
        self.log_message(level, message).await;
    }
}
