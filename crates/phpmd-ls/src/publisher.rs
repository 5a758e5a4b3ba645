//
// publisher.rs
//
// Last-known phpmd diagnostics per open document
//

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tower_lsp::lsp_types::{Diagnostic, Url};

use crate::sink::DiagnosticsSink;

#[derive(Debug, Default)]
struct PublishedDiagnostics {
    /// Sequence number of the invocation that produced `diagnostics`
    generation: u64,
    diagnostics: Vec<Diagnostic>,
}

/// Owns the published diagnostic list of every open document.
///
/// Publishing is monotonic per document: a list tagged with a generation at
/// or below the last accepted one is dropped. Documents that are not open
/// have no slot, so late publications for them are dropped too. The lock is
/// held while the sink is notified, so the sink sees updates in the same
/// order as the stored state.
pub struct DiagnosticPublisher {
    sink: Arc<dyn DiagnosticsSink>,
    documents: Mutex<HashMap<Url, PublishedDiagnostics>>,
}

impl DiagnosticPublisher {
    pub fn new(sink: Arc<dyn DiagnosticsSink>) -> Self {
        Self {
            sink,
            documents: Mutex::new(HashMap::new()),
        }
    }

    /// Start tracking a document. Publications with a generation at or
    /// below `floor` (issued before the document was opened) are rejected.
    pub async fn open(&self, uri: &Url, floor: u64) {
        let mut documents = self.documents.lock().await;
        documents
            .entry(uri.clone())
            .or_insert_with(|| PublishedDiagnostics {
                generation: floor,
                diagnostics: Vec::new(),
            });
    }

    /// Stop tracking a document and clear whatever was shown for it
    pub async fn close(&self, uri: &Url) {
        let mut documents = self.documents.lock().await;
        if let Some(previous) = documents.remove(uri) {
            if !previous.diagnostics.is_empty() {
                self.sink.publish(uri.clone(), Vec::new()).await;
            }
        }
    }

    /// Replace the diagnostics of an open document.
    ///
    /// Returns `true` when the list was accepted. Re-publishing an identical
    /// list is accepted without notifying the sink again.
    pub async fn publish(&self, uri: &Url, generation: u64, diagnostics: Vec<Diagnostic>) -> bool {
        let mut documents = self.documents.lock().await;
        let Some(slot) = documents.get_mut(uri) else {
            log::trace!("Dropping diagnostics for closed document {}", uri);
            return false;
        };
        if generation <= slot.generation {
            log::trace!(
                "Dropping diagnostics for {}: generation {} is not newer than {}",
                uri,
                generation,
                slot.generation
            );
            return false;
        }

        slot.generation = generation;
        if slot.diagnostics == diagnostics {
            return true;
        }
        slot.diagnostics = diagnostics.clone();
        log::debug!("Publishing {} diagnostics for {}", diagnostics.len(), uri);
        self.sink.publish(uri.clone(), diagnostics).await;
        true
    }

    /// Clear the diagnostics of an open document
    pub async fn clear(&self, uri: &Url, generation: u64) -> bool {
        self.publish(uri, generation, Vec::new()).await
    }

    /// Currently published diagnostics; `None` when the document is not open
    pub async fn current(&self, uri: &Url) -> Option<Vec<Diagnostic>> {
        self.documents
            .lock()
            .await
            .get(uri)
            .map(|slot| slot.diagnostics.clone())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use tower_lsp::lsp_types::{Position, Range};

    /// Sink that records every publication
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        published: std::sync::Mutex<Vec<(Url, Vec<Diagnostic>)>>,
    }

    impl RecordingSink {
        pub(crate) fn published(&self) -> Vec<(Url, Vec<Diagnostic>)> {
            self.published.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DiagnosticsSink for RecordingSink {
        async fn publish(&self, uri: Url, diagnostics: Vec<Diagnostic>) {
            self.published.lock().unwrap().push((uri, diagnostics));
        }
    }

    fn test_uri(name: &str) -> Url {
        Url::parse(&format!("file:///{}", name)).unwrap()
    }

    fn diagnostic(line: u32, message: &str) -> Diagnostic {
        Diagnostic {
            range: Range::new(Position::new(line, 0), Position::new(line, u32::MAX)),
            message: message.to_string(),
            ..Default::default()
        }
    }

    fn publisher() -> (Arc<RecordingSink>, DiagnosticPublisher) {
        let sink = Arc::new(RecordingSink::default());
        (sink.clone(), DiagnosticPublisher::new(sink))
    }

    #[tokio::test]
    async fn test_publish_replaces_previous_list() {
        let (sink, publisher) = publisher();
        let uri = test_uri("a.php");
        publisher.open(&uri, 0).await;

        assert!(publisher.publish(&uri, 1, vec![diagnostic(0, "one"), diagnostic(1, "two")]).await);
        assert!(publisher.publish(&uri, 2, vec![diagnostic(5, "three")]).await);

        assert_eq!(publisher.current(&uri).await, Some(vec![diagnostic(5, "three")]));
        assert_eq!(sink.published().len(), 2);
        assert_eq!(sink.published()[1].1, vec![diagnostic(5, "three")]);
    }

    #[tokio::test]
    async fn test_older_generation_is_dropped() {
        let (sink, publisher) = publisher();
        let uri = test_uri("a.php");
        publisher.open(&uri, 0).await;

        assert!(publisher.publish(&uri, 5, vec![diagnostic(0, "fresh")]).await);
        assert!(!publisher.publish(&uri, 3, vec![diagnostic(0, "stale")]).await);
        assert!(!publisher.publish(&uri, 5, vec![diagnostic(0, "again")]).await);

        assert_eq!(publisher.current(&uri).await, Some(vec![diagnostic(0, "fresh")]));
        assert_eq!(sink.published().len(), 1);
    }

    #[tokio::test]
    async fn test_identical_list_is_not_resent() {
        let (sink, publisher) = publisher();
        let uri = test_uri("a.php");
        publisher.open(&uri, 0).await;

        assert!(publisher.publish(&uri, 1, vec![diagnostic(0, "same")]).await);
        assert!(publisher.publish(&uri, 2, vec![diagnostic(0, "same")]).await);
        assert_eq!(sink.published().len(), 1);
    }

    #[tokio::test]
    async fn test_publish_for_unopened_document_is_dropped() {
        let (sink, publisher) = publisher();
        let uri = test_uri("a.php");

        assert!(!publisher.publish(&uri, 1, vec![diagnostic(0, "x")]).await);
        assert_eq!(publisher.current(&uri).await, None);
        assert!(sink.published().is_empty());
    }

    #[tokio::test]
    async fn test_close_clears_and_drops_late_results() {
        let (sink, publisher) = publisher();
        let uri = test_uri("a.php");
        publisher.open(&uri, 0).await;
        publisher.publish(&uri, 1, vec![diagnostic(0, "x")]).await;

        publisher.close(&uri).await;
        assert!(!publisher.publish(&uri, 2, vec![diagnostic(0, "late")]).await);

        let published = sink.published();
        assert_eq!(published.len(), 2);
        assert!(published[1].1.is_empty());
        assert_eq!(publisher.current(&uri).await, None);
    }

    #[tokio::test]
    async fn test_close_without_diagnostics_sends_nothing() {
        let (sink, publisher) = publisher();
        let uri = test_uri("a.php");
        publisher.open(&uri, 0).await;
        publisher.close(&uri).await;
        assert!(sink.published().is_empty());
    }

    #[tokio::test]
    async fn test_reopen_rejects_generations_below_floor() {
        let (_sink, publisher) = publisher();
        let uri = test_uri("a.php");
        publisher.open(&uri, 0).await;
        publisher.close(&uri).await;
        publisher.open(&uri, 7).await;

        assert!(!publisher.publish(&uri, 7, vec![diagnostic(0, "from before")]).await);
        assert!(publisher.publish(&uri, 8, vec![diagnostic(0, "after")]).await);
    }

    #[tokio::test]
    async fn test_clear() {
        let (sink, publisher) = publisher();
        let uri = test_uri("a.php");
        publisher.open(&uri, 0).await;
        publisher.publish(&uri, 1, vec![diagnostic(0, "x")]).await;

        assert!(publisher.clear(&uri, 2).await);
        assert_eq!(publisher.current(&uri).await, Some(Vec::new()));
        assert!(sink.published().last().unwrap().1.is_empty());
    }
}
