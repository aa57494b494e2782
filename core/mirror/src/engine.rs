//! Mirror engine entry point.
//!
//! Runs one mirror: traversal, path materialization, export, and
//! aggregation into a `MirrorSummary`.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use docmirror_common::{Error, Result};
use docmirror_remote::{RemoteDirectory, RetryingDirectory};

use crate::aggregate::{MirrorSummary, ResultAggregator};
use crate::config::MirrorConfig;
use crate::export::{ExportOptions, ExportOrchestrator, ExportTask};
use crate::materialize::Materializer;
use crate::traversal::TraversalEngine;

/// Mirrors one remote folder into a local directory.
pub struct MirrorEngine<D: RemoteDirectory + ?Sized> {
    client: Arc<RetryingDirectory<D>>,
    config: MirrorConfig,
    cancel: CancellationToken,
}

impl<D: RemoteDirectory + ?Sized + 'static> MirrorEngine<D> {
    /// Create a new engine. Every remote call goes through the retry
    /// policy of `config.retry`.
    ///
    /// # Errors
    /// Returns `InvalidInput` if the configuration does not validate.
    pub fn new(client: Arc<D>, config: MirrorConfig) -> Result<Self> {
        config.validate()?;
        let client = Arc::new(RetryingDirectory::new(client, config.retry.clone()));
        Ok(Self {
            client,
            config,
            cancel: CancellationToken::new(),
        })
    }

    /// Token that cancels the run cooperatively.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Get the configuration.
    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    /// Run the mirror, reporting progress through `aggregator`.
    ///
    /// Failures below the root are recorded in the summary. An export
    /// rejected for authentication aborts the run but still yields a summary.
    ///
    /// # Errors
    /// Any failure to list the root folder.
    pub async fn run(&self, aggregator: &ResultAggregator) -> Result<MirrorSummary> {
        let config = &self.config;
        info!(
            "Mirroring folder {} into {} via {}",
            config.root_folder_id,
            config.target_root.display(),
            self.client.name()
        );

        let traversal = TraversalEngine::new(
            self.client.clone(),
            config.max_depth,
            self.cancel.clone(),
        )
        .walk(&config.root_folder_id)
        .await;

        let traversal = match traversal {
            Ok(traversal) => traversal,
            Err(Error::Cancelled) => {
                warn!("Mirror cancelled during traversal");
                aggregator.mark_cancelled();
                return Ok(aggregator.finalize());
            }
            Err(e) => {
                error!("Cannot mirror folder {}: {}", config.root_folder_id, e);
                return Err(e);
            }
        };

        let paths = Materializer::new(&config.target_root, &config.extension)
            .materialize(&traversal.tree);
        aggregator.record_traversal(&traversal, &paths);

        let tree = &traversal.tree;
        let tasks: Vec<ExportTask> = tree
            .documents()
            .iter()
            .map(|&index| {
                ExportTask::new(index, tree.get(index).node.id.clone(), paths.path(index))
            })
            .collect();

        ExportOrchestrator::new(
            self.client.clone(),
            ExportOptions::from(config),
            self.cancel.clone(),
        )
        .run(tasks, aggregator)
        .await;

        if self.cancel.is_cancelled() {
            aggregator.mark_cancelled();
        }

        let summary = aggregator.finalize();
        info!(
            "Mirror finished: {} exported, {} skipped, {} failed, {} not attempted",
            summary.documents_exported,
            summary.documents_skipped,
            summary.documents_failed,
            summary.documents_not_attempted
        );
        Ok(summary)
    }
}

/// Mirror `config.root_folder_id` without observing progress.
pub async fn mirror<D>(client: Arc<D>, config: MirrorConfig) -> Result<MirrorSummary>
where
    D: RemoteDirectory + ?Sized + 'static,
{
    let engine = MirrorEngine::new(client, config)?;
    engine.run(&ResultAggregator::new()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::ProgressEvent;
    use crate::export::{ExportOutcome, SkipReason};
    use docmirror_common::{ErrorKind, NodeId};
    use docmirror_remote::{MemoryDirectory, Operation, RetryConfig};
    use std::collections::BTreeSet;
    use std::path::{Path, PathBuf};
    use std::time::Duration;
    use tempfile::TempDir;

    fn config(dir: &Path) -> MirrorConfig {
        MirrorConfig::new(NodeId::new("F1"), dir).with_retry(
            RetryConfig::new(2)
                .with_initial_delay(Duration::from_millis(1))
                .with_jitter(false),
        )
    }

    /// Files below `root`, relative to it.
    fn files(root: &Path) -> BTreeSet<PathBuf> {
        fn visit(root: &Path, dir: &Path, out: &mut BTreeSet<PathBuf>) {
            let Ok(entries) = std::fs::read_dir(dir) else {
                return;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    visit(root, &path, out);
                } else {
                    out.insert(path.strip_prefix(root).unwrap().to_path_buf());
                }
            }
        }
        let mut out = BTreeSet::new();
        visit(root, root, &mut out);
        out
    }

    fn set(paths: &[&str]) -> BTreeSet<PathBuf> {
        paths.iter().map(PathBuf::from).collect()
    }

    fn sample_tree() -> Arc<MemoryDirectory> {
        let remote = MemoryDirectory::new();
        remote.add_root("F1", "F1");
        remote.add_document("F1", "D1", "Report/Q1", b"first".to_vec());
        remote.add_folder("F1", "F2", "F2");
        remote.add_document("F2", "D2", "Report/Q1", b"second".to_vec());
        remote.add_folder("F2", "F3", "Archive");
        remote.add_document("F3", "D3", "Old", b"third".to_vec());
        Arc::new(remote)
    }

    #[tokio::test]
    async fn test_mirror_preserves_hierarchy() {
        let dir = TempDir::new().unwrap();
        let remote = sample_tree();

        let summary = mirror(remote, config(dir.path())).await.unwrap();

        assert_eq!(
            files(dir.path()),
            set(&[
                "F1/Report-Q1.docx",
                "F1/F2/Report-Q1.docx",
                "F1/F2/Archive/Old.docx",
            ])
        );
        assert_eq!(
            std::fs::read(dir.path().join("F1/F2/Report-Q1.docx")).unwrap(),
            b"second"
        );
        assert_eq!(summary.folders_visited, 3);
        assert_eq!(summary.documents_discovered, 3);
        assert_eq!(summary.documents_exported, 3);
        assert!(summary.is_clean());
        assert_eq!(summary.success_rate(), 100.0);
    }

    #[tokio::test]
    async fn test_same_titles_in_one_folder() {
        let dir = TempDir::new().unwrap();
        let remote = MemoryDirectory::new();
        remote.add_root("F1", "F1");
        remote.add_document("F1", "D1", "Notes", b"a".to_vec());
        remote.add_document("F1", "D2", "Notes", b"b".to_vec());

        mirror(Arc::new(remote), config(dir.path())).await.unwrap();

        assert_eq!(
            files(dir.path()),
            set(&["F1/Notes.docx", "F1/Notes (1).docx"])
        );
        assert_eq!(std::fs::read(dir.path().join("F1/Notes.docx")).unwrap(), b"a");
        assert_eq!(
            std::fs::read(dir.path().join("F1/Notes (1).docx")).unwrap(),
            b"b"
        );
    }

    #[tokio::test]
    async fn test_rerun_without_overwrite_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let remote = sample_tree();
        mirror(remote.clone(), config(dir.path())).await.unwrap();

        let (aggregator, mut events) = ResultAggregator::with_events();
        let engine =
            MirrorEngine::new(remote.clone(), config(dir.path()).with_overwrite(false)).unwrap();
        let summary = engine.run(&aggregator).await.unwrap();
        drop(aggregator);

        assert_eq!(summary.documents_skipped, 3);
        assert_eq!(summary.documents_exported, 0);
        assert_eq!(remote.total_calls(Operation::FetchExport), 3);

        let mut skipped = 0;
        while let Some(event) = events.recv().await {
            if let ProgressEvent::Exported { outcome, .. } = event {
                assert!(matches!(
                    outcome,
                    ExportOutcome::Skipped {
                        reason: SkipReason::AlreadyExists,
                        ..
                    }
                ));
                skipped += 1;
            }
        }
        assert_eq!(skipped, 3);
    }

    #[tokio::test]
    async fn test_rerun_with_overwrite_refetches_everything() {
        let dir = TempDir::new().unwrap();
        let remote = sample_tree();
        mirror(remote.clone(), config(dir.path())).await.unwrap();
        let summary = mirror(remote.clone(), config(dir.path())).await.unwrap();

        assert_eq!(summary.documents_exported, 3);
        for id in ["D1", "D2", "D3"] {
            assert_eq!(remote.call_count(Operation::FetchExport, id), 2);
        }
    }

    #[tokio::test]
    async fn test_cross_linked_folder_exported_once() {
        let dir = TempDir::new().unwrap();
        let remote = MemoryDirectory::new();
        remote.add_root("F1", "F1");
        remote.add_folder("F1", "A", "A");
        remote.add_folder("F1", "B", "B");
        remote.add_folder("A", "S", "Shared");
        remote.add_document("S", "D1", "Doc", b"x".to_vec());
        remote.link_folder("B", "S");
        remote.link_folder("S", "F1");
        let remote = Arc::new(remote);

        let summary = mirror(remote.clone(), config(dir.path())).await.unwrap();

        assert_eq!(files(dir.path()), set(&["F1/A/Shared/Doc.docx"]));
        assert_eq!(remote.call_count(Operation::ListChildren, "S"), 1);
        assert_eq!(remote.call_count(Operation::FetchExport, "D1"), 1);
        assert_eq!(summary.notes.len(), 2);
        assert!(summary
            .notes
            .iter()
            .all(|n| n.kind == ErrorKind::CycleDetected));
        assert!(summary.errors.is_empty());
    }

    #[tokio::test]
    async fn test_document_failure_does_not_stop_others() {
        let dir = TempDir::new().unwrap();
        let remote = sample_tree();
        remote.inject_failure(Operation::FetchExport, "D2", ErrorKind::NotFound, 1);

        let summary = mirror(remote, config(dir.path())).await.unwrap();

        assert_eq!(summary.documents_exported, 2);
        assert_eq!(summary.documents_failed, 1);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].path, dir.path().join("F1/F2/Report-Q1.docx"));
        assert_eq!(
            files(dir.path()),
            set(&["F1/Report-Q1.docx", "F1/F2/Archive/Old.docx"])
        );
    }

    #[tokio::test]
    async fn test_failed_title_lookup_exports_under_fallback_name() {
        let dir = TempDir::new().unwrap();
        let remote = MemoryDirectory::new();
        remote.add_root("F1", "F1");
        remote.add_document_listed_as("F1", "D1", "", "Hidden", b"x".to_vec());
        remote.inject_failure(Operation::FetchMetadata, "D1", ErrorKind::NotFound, 1);

        let summary = mirror(Arc::new(remote), config(dir.path())).await.unwrap();

        assert_eq!(files(dir.path()), set(&["F1/untitled-D1.docx"]));
        assert_eq!(summary.documents_exported, 1);
        assert!(summary.errors.is_empty());
        assert_eq!(summary.notes.len(), 1);
        assert_eq!(summary.notes[0].kind, ErrorKind::NotFound);
        assert_eq!(summary.notes[0].path, dir.path().join("F1/untitled-D1.docx"));
    }

    #[tokio::test]
    async fn test_subfolder_auth_failure_is_contained() {
        let dir = TempDir::new().unwrap();
        let remote = MemoryDirectory::new();
        remote.add_root("F1", "F1");
        remote.add_folder("F1", "A", "Private");
        remote.add_folder("F1", "B", "Public");
        remote.add_document("A", "D1", "Secret", b"x".to_vec());
        remote.add_document("B", "D2", "Open", b"y".to_vec());
        remote.inject_failure(Operation::ListChildren, "A", ErrorKind::AuthFailure, 1);

        let summary = mirror(Arc::new(remote), config(dir.path())).await.unwrap();

        assert_eq!(files(dir.path()), set(&["F1/Public/Open.docx"]));
        assert_eq!(summary.folders_failed, 1);
        assert_eq!(summary.errors[0].kind, ErrorKind::AuthFailure);
        assert_eq!(summary.errors[0].path, dir.path().join("F1/Private"));
        assert!(summary.aborted.is_none());
    }

    #[tokio::test]
    async fn test_transient_listing_failure_is_retried() {
        let dir = TempDir::new().unwrap();
        let remote = sample_tree();
        remote.inject_failure(Operation::ListChildren, "F2", ErrorKind::Transient, 2);

        let summary = mirror(remote.clone(), config(dir.path())).await.unwrap();

        assert!(summary.is_clean());
        assert_eq!(remote.call_count(Operation::ListChildren, "F2"), 3);
    }

    #[tokio::test]
    async fn test_root_failure_is_fatal() {
        let dir = TempDir::new().unwrap();
        let remote = MemoryDirectory::new();
        remote.add_root("F1", "F1");
        remote.inject_failure(Operation::ListChildren, "F1", ErrorKind::AuthFailure, 1);

        let err = mirror(Arc::new(remote), config(dir.path())).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::AuthFailure);
        assert!(files(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_export_auth_failure_aborts_with_summary() {
        let dir = TempDir::new().unwrap();
        let remote = sample_tree();
        remote.inject_failure(Operation::FetchExport, "D1", ErrorKind::AuthFailure, 1);

        let summary = mirror(remote.clone(), config(dir.path()).with_concurrency(1))
            .await
            .unwrap();

        assert!(summary.aborted.is_some());
        assert_eq!(summary.documents_failed, 1);
        assert_eq!(summary.documents_not_attempted, 2);
        assert_eq!(remote.call_count(Operation::FetchExport, "D2"), 0);
        assert!(!summary.is_clean());
    }

    #[tokio::test]
    async fn test_empty_folders_create_no_directories() {
        let dir = TempDir::new().unwrap();
        let remote = MemoryDirectory::new();
        remote.add_root("F1", "F1");
        remote.add_folder("F1", "E", "Empty");
        remote.add_document("F1", "D1", "Doc", b"x".to_vec());

        mirror(Arc::new(remote), config(dir.path())).await.unwrap();

        assert!(dir.path().join("F1").is_dir());
        assert!(!dir.path().join("F1/Empty").exists());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let dir = TempDir::new().unwrap();
        let engine = MirrorEngine::new(sample_tree(), config(dir.path())).unwrap();
        engine.cancellation_token().cancel();

        let summary = engine.run(&ResultAggregator::new()).await.unwrap();

        assert!(summary.cancelled);
        assert!(files(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let dir = TempDir::new().unwrap();
        let result = MirrorEngine::new(sample_tree(), config(dir.path()).with_concurrency(0));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_progress_events() {
        let dir = TempDir::new().unwrap();
        let (aggregator, mut events) = ResultAggregator::with_events();
        let engine = MirrorEngine::new(sample_tree(), config(dir.path())).unwrap();

        engine.run(&aggregator).await.unwrap();
        drop(aggregator);

        let mut received = Vec::new();
        while let Some(event) = events.recv().await {
            received.push(event);
        }

        assert_eq!(
            received[0],
            ProgressEvent::Discovered {
                folders: 3,
                documents: 3
            }
        );
        let completed: BTreeSet<usize> = received
            .iter()
            .filter_map(|event| match event {
                ProgressEvent::Exported {
                    completed, total, ..
                } => {
                    assert_eq!(*total, 3);
                    Some(*completed)
                }
                _ => None,
            })
            .collect();
        assert_eq!(completed, BTreeSet::from([1, 2, 3]));
    }
}
