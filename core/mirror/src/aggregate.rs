//! Outcome aggregation and progress events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;

use docmirror_common::{ErrorKind, NodeId};

use crate::export::ExportOutcome;
use crate::materialize::PathMap;
use crate::traversal::Traversal;

/// Live progress notification.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// Traversal finished.
    Discovered { folders: usize, documents: usize },
    /// A folder could not be listed; its subtree is skipped.
    FolderFailed {
        node_id: NodeId,
        path: PathBuf,
        kind: ErrorKind,
        message: String,
    },
    /// A folder was reached through a second parent.
    CycleDetected { node_id: NodeId, path: PathBuf },
    /// A document reached a terminal outcome.
    Exported {
        node_id: NodeId,
        outcome: ExportOutcome,
        completed: usize,
        total: usize,
    },
    /// The run stopped dispatching new work.
    Aborted { reason: String },
}

/// One line of the failure or note listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryEntry {
    pub path: PathBuf,
    pub kind: ErrorKind,
    pub message: String,
}

/// Final report of a mirror run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirrorSummary {
    pub folders_visited: usize,
    pub folders_failed: usize,
    pub documents_discovered: usize,
    pub documents_exported: usize,
    pub documents_skipped: usize,
    pub documents_failed: usize,
    /// Documents never dispatched because the run was aborted or cancelled.
    pub documents_not_attempted: usize,
    pub bytes_written: u64,
    /// Failures in emission order.
    pub errors: Vec<SummaryEntry>,
    /// Informational entries such as `CycleDetected`.
    pub notes: Vec<SummaryEntry>,
    /// Reason the run was aborted, if it was.
    pub aborted: Option<String>,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl MirrorSummary {
    /// Create an empty summary starting now.
    pub fn new() -> Self {
        Self {
            folders_visited: 0,
            folders_failed: 0,
            documents_discovered: 0,
            documents_exported: 0,
            documents_skipped: 0,
            documents_failed: 0,
            documents_not_attempted: 0,
            bytes_written: 0,
            errors: Vec::new(),
            notes: Vec::new(),
            aborted: None,
            cancelled: false,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Percentage of discovered documents that were exported or skipped.
    /// 100% when nothing was discovered.
    pub fn success_rate(&self) -> f64 {
        if self.documents_discovered == 0 {
            return 100.0;
        }
        let ok = self.documents_exported + self.documents_skipped;
        ok as f64 / self.documents_discovered as f64 * 100.0
    }

    /// Check if the run finished without any failure, abort or cancellation.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
            && self.documents_not_attempted == 0
            && self.aborted.is_none()
            && !self.cancelled
    }

    /// Wall-clock duration, if the run has finished.
    pub fn duration(&self) -> Option<Duration> {
        self.finished_at
            .and_then(|end| (end - self.started_at).to_std().ok())
    }
}

impl Default for MirrorSummary {
    fn default() -> Self {
        Self::new()
    }
}

struct Inner {
    summary: MirrorSummary,
    completed: usize,
}

/// Collects traversal failures and export outcomes into a `MirrorSummary`.
///
/// Clones share the same summary. Updates are serialized by a mutex; each
/// one is also pushed to the event channel when one was requested.
#[derive(Clone)]
pub struct ResultAggregator {
    inner: Arc<Mutex<Inner>>,
    events: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl ResultAggregator {
    /// Create an aggregator without an event stream.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                summary: MirrorSummary::new(),
                completed: 0,
            })),
            events: None,
        }
    }

    /// Create an aggregator and the receiving end of its event stream.
    pub fn with_events() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut aggregator = Self::new();
        aggregator.events = Some(tx);
        (aggregator, rx)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.events {
            // A dropped receiver only means nobody is watching.
            let _ = tx.send(event);
        }
    }

    /// Record the result of the traversal: counts, failed subtrees, cycle
    /// notes and documents left with a fallback name.
    pub fn record_traversal(&self, traversal: &Traversal, paths: &PathMap) {
        let tree = &traversal.tree;
        let mut events = Vec::new();
        {
            let mut inner = self.lock();
            let summary = &mut inner.summary;
            summary.folders_visited = tree.folders_expanded();
            summary.documents_discovered = tree.documents().len();

            for failure in &traversal.failures {
                let node = tree.get(failure.index);
                let path = paths.path(failure.index).to_path_buf();
                summary.folders_failed += 1;
                summary.errors.push(SummaryEntry {
                    path: path.clone(),
                    kind: failure.kind,
                    message: failure.message.clone(),
                });
                events.push(ProgressEvent::FolderFailed {
                    node_id: node.node.id.clone(),
                    path,
                    kind: failure.kind,
                    message: failure.message.clone(),
                });
            }

            for &index in &traversal.cycles {
                let node = tree.get(index);
                let path = paths.path(index).to_path_buf();
                summary.notes.push(SummaryEntry {
                    path: path.clone(),
                    kind: ErrorKind::CycleDetected,
                    message: format!(
                        "Folder {} is reachable from more than one parent; expanded once",
                        node.node.id
                    ),
                });
                events.push(ProgressEvent::CycleDetected {
                    node_id: node.node.id.clone(),
                    path,
                });
            }

            for failure in &traversal.untitled {
                summary.notes.push(SummaryEntry {
                    path: paths.path(failure.index).to_path_buf(),
                    kind: failure.kind,
                    message: format!(
                        "Title lookup failed, exported under a fallback name: {}",
                        failure.message
                    ),
                });
            }

            events.push(ProgressEvent::Discovered {
                folders: summary.folders_visited,
                documents: summary.documents_discovered,
            });
        }

        for event in events {
            self.emit(event);
        }
    }

    /// Record the terminal outcome of one document.
    pub fn record_outcome(&self, node_id: &NodeId, outcome: ExportOutcome) {
        let (completed, total) = {
            let mut inner = self.lock();
            inner.completed += 1;
            let summary = &mut inner.summary;
            match &outcome {
                ExportOutcome::Success { bytes_written, .. } => {
                    summary.documents_exported += 1;
                    summary.bytes_written += bytes_written;
                }
                ExportOutcome::Skipped { .. } => summary.documents_skipped += 1,
                ExportOutcome::Failed {
                    path,
                    kind,
                    message,
                } => {
                    summary.documents_failed += 1;
                    summary.errors.push(SummaryEntry {
                        path: path.clone(),
                        kind: *kind,
                        message: message.clone(),
                    });
                }
            }
            (inner.completed, inner.summary.documents_discovered)
        };

        self.emit(ProgressEvent::Exported {
            node_id: node_id.clone(),
            outcome,
            completed,
            total,
        });
    }

    /// Mark the run as aborted. Only the first reason is kept.
    pub fn abort(&self, reason: impl Into<String>) {
        let reason = reason.into();
        {
            let mut inner = self.lock();
            if inner.summary.aborted.is_some() {
                return;
            }
            inner.summary.aborted = Some(reason.clone());
        }
        self.emit(ProgressEvent::Aborted { reason });
    }

    /// Mark the run as cancelled by the caller.
    pub fn mark_cancelled(&self) {
        self.lock().summary.cancelled = true;
    }

    /// Check if the run was aborted.
    pub fn is_aborted(&self) -> bool {
        self.lock().summary.aborted.is_some()
    }

    #[cfg(test)]
    pub(crate) fn set_discovered(&self, documents: usize) {
        self.lock().summary.documents_discovered = documents;
    }

    /// Close the summary. Documents without an outcome are counted as not
    /// attempted.
    pub fn finalize(&self) -> MirrorSummary {
        let mut inner = self.lock();
        let summary = &mut inner.summary;
        let settled =
            summary.documents_exported + summary.documents_skipped + summary.documents_failed;
        summary.documents_not_attempted = summary.documents_discovered.saturating_sub(settled);
        summary.finished_at = Some(Utc::now());
        summary.clone()
    }
}

impl Default for ResultAggregator {
    fn default() -> Self {
        Self::new()
    }
}
