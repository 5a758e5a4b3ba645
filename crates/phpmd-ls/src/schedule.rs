//
// schedule.rs
//
// Debounce timers and invocation sequencing per document
//

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio_util::sync::CancellationToken;
use tower_lsp::lsp_types::Url;

/// A debounce timer waiting to fire
#[derive(Debug)]
struct PendingRun {
    id: u64,
    token: CancellationToken,
}

/// Tracks the armed debounce timer per document
#[derive(Debug, Default)]
pub struct DebounceScheduler {
    next_id: AtomicU64,
    pending: Mutex<HashMap<Url, PendingRun>>,
}

impl DebounceScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a timer for a document, cancelling the one already armed.
    /// Returns the run id and the token the timer must race against.
    pub fn schedule(&self, uri: Url) -> (u64, CancellationToken) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(old) = pending.insert(
            uri,
            PendingRun {
                id,
                token: token.clone(),
            },
        ) {
            old.token.cancel();
        }
        (id, token)
    }

    /// Disarm after the timer fired. A newer timer for the same document is
    /// left in place.
    pub fn complete(&self, uri: &Url, id: u64) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if pending.get(uri).is_some_and(|run| run.id == id) {
            pending.remove(uri);
        }
    }

    /// Cancel the armed timer for a document
    pub fn cancel(&self, uri: &Url) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(run) = pending.remove(uri) {
            run.token.cancel();
        }
    }

    /// Cancel every armed timer
    pub fn cancel_all(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, run) in pending.drain() {
            run.token.cancel();
        }
    }

    pub fn is_pending(&self, uri: &Url) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(uri)
    }
}

/// Hands out monotonically increasing invocation numbers and remembers the
/// latest one dispatched per document.
///
/// A completion may only be published while its number is still the latest
/// for its document; anything older is stale.
#[derive(Debug, Default)]
pub struct InvocationGate {
    counter: AtomicU64,
    latest: Mutex<HashMap<Url, u64>>,
}

impl InvocationGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new invocation for `uri` and return its sequence number.
    /// Numbers start at 1 and are unique across documents.
    pub fn dispatch(&self, uri: &Url) -> u64 {
        let seq = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let mut latest = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = latest.entry(uri.clone()).or_insert(seq);
        *entry = (*entry).max(seq);
        seq
    }

    pub fn is_latest(&self, uri: &Url, seq: u64) -> bool {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(uri)
            .is_some_and(|&latest| latest == seq)
    }

    /// Highest sequence number handed out so far
    pub fn high_water_mark(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }

    /// Forget a document (e.g. when it is closed); every outstanding
    /// invocation for it becomes stale.
    pub fn forget(&self, uri: &Url) {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(uri);
    }
}
