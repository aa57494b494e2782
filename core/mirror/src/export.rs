//! Concurrent document export.
//!
//! A fixed pool of workers drains a shared task queue. Each document is
//! streamed into a hidden temporary file next to its target and renamed into
//! place once complete, so a target path only ever holds a finished export.

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use docmirror_common::{Error, ErrorKind, NodeId, Result};
use docmirror_remote::{ExportStream, RemoteDirectory, RetryConfig};

use crate::aggregate::ResultAggregator;
use crate::config::MirrorConfig;
use crate::traversal::NodeIndex;

/// One document to export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportTask {
    /// Position of the document in the tree.
    pub index: NodeIndex,
    pub document_id: NodeId,
    pub target_path: PathBuf,
    /// Number of fetch attempts made so far.
    pub attempt: u32,
}

impl ExportTask {
    pub fn new(index: NodeIndex, document_id: NodeId, target_path: impl Into<PathBuf>) -> Self {
        Self {
            index,
            document_id,
            target_path: target_path.into(),
            attempt: 0,
        }
    }
}

/// Why a document was not written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// Target exists and overwriting is disabled.
    AlreadyExists,
    /// Dry run.
    DryRun,
    /// The run was cancelled while the export was in flight.
    Cancelled,
}

/// Terminal result of one export task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExportOutcome {
    Success { path: PathBuf, bytes_written: u64 },
    Skipped { path: PathBuf, reason: SkipReason },
    Failed {
        path: PathBuf,
        kind: ErrorKind,
        message: String,
    },
}

impl ExportOutcome {
    /// Target path of the document.
    pub fn path(&self) -> &Path {
        match self {
            Self::Success { path, .. } | Self::Skipped { path, .. } | Self::Failed { path, .. } => {
                path
            }
        }
    }
}

/// Export behaviour.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Replace existing files.
    pub overwrite: bool,
    /// Number of workers.
    pub concurrency: usize,
    /// Decide outcomes without fetching or writing.
    pub dry_run: bool,
    /// Time in-flight exports get to finish after cancellation.
    pub shutdown_grace: Duration,
    /// Maximum number of times one document is fetched.
    pub max_export_attempts: u32,
    /// Backoff between re-attempts.
    pub retry: RetryConfig,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            overwrite: true,
            concurrency: crate::config::DEFAULT_CONCURRENCY,
            dry_run: false,
            shutdown_grace: Duration::from_secs(10),
            max_export_attempts: 2,
            retry: RetryConfig::default(),
        }
    }
}

impl From<&MirrorConfig> for ExportOptions {
    fn from(config: &MirrorConfig) -> Self {
        Self {
            overwrite: config.overwrite,
            concurrency: config.concurrency,
            dry_run: config.dry_run,
            shutdown_grace: config.shutdown_grace,
            max_export_attempts: config.max_export_attempts,
            retry: config.retry.clone(),
        }
    }
}

/// Drives concurrent export of a document list.
pub struct ExportOrchestrator<D: RemoteDirectory + ?Sized> {
    client: Arc<D>,
    options: ExportOptions,
    cancel: CancellationToken,
}

impl<D: RemoteDirectory + ?Sized + 'static> ExportOrchestrator<D> {
    /// Create a new orchestrator. Cancelling `cancel` stops dispatch and
    /// starts the grace period for in-flight exports.
    pub fn new(client: Arc<D>, options: ExportOptions, cancel: CancellationToken) -> Self {
        Self {
            client,
            options,
            cancel,
        }
    }

    /// Export every task, reporting each outcome to `aggregator`.
    ///
    /// Returns once all workers have stopped. Tasks still queued when the
    /// run is cancelled or aborted get no outcome.
    pub async fn run(&self, tasks: Vec<ExportTask>, aggregator: &ResultAggregator) {
        if tasks.is_empty() {
            return;
        }

        let workers = self.options.concurrency.clamp(1, tasks.len());
        info!("Exporting {} documents with {} workers", tasks.len(), workers);

        let queue = Arc::new(Mutex::new(VecDeque::from(tasks)));
        // Child token so an abort stops this run without touching the caller.
        let stop = self.cancel.child_token();

        let mut join_set = JoinSet::new();
        for id in 0..workers {
            let worker = Worker {
                id,
                client: self.client.clone(),
                options: self.options.clone(),
                stop: stop.clone(),
                aggregator: aggregator.clone(),
            };
            join_set.spawn(worker.run(queue.clone()));
        }

        while let Some(joined) = join_set.join_next().await {
            if let Err(e) = joined {
                error!("Export worker terminated unexpectedly: {}", e);
            }
        }

        let remaining = queue.lock().map(|q| q.len()).unwrap_or_default();
        if remaining > 0 {
            warn!("{} documents were not attempted", remaining);
        }
    }
}

struct Worker<D: ?Sized> {
    id: usize,
    client: Arc<D>,
    options: ExportOptions,
    stop: CancellationToken,
    aggregator: ResultAggregator,
}

impl<D: RemoteDirectory + ?Sized> Worker<D> {
    async fn run(self, queue: Arc<Mutex<VecDeque<ExportTask>>>) {
        loop {
            if self.stop.is_cancelled() {
                debug!("Worker {} stopping", self.id);
                break;
            }

            let task = match queue.lock() {
                Ok(mut queue) => queue.pop_front(),
                Err(poisoned) => poisoned.into_inner().pop_front(),
            };
            let Some(task) = task else {
                break;
            };

            let document_id = task.document_id.clone();
            let outcome = self.run_task(task).await;

            if let ExportOutcome::Failed {
                kind: ErrorKind::AuthFailure,
                message,
                ..
            } = &outcome
            {
                error!(
                    "Authentication rejected while exporting {}, aborting run",
                    document_id
                );
                self.aggregator
                    .abort(format!("Authentication failed: {}", message));
                self.stop.cancel();
            }

            self.aggregator.record_outcome(&document_id, outcome);
        }
    }

    /// Export one document, giving up once the grace period after a stop
    /// request has elapsed.
    async fn run_task(&self, mut task: ExportTask) -> ExportOutcome {
        let path = task.target_path.clone();
        let document_id = task.document_id.clone();
        let temp = temp_path(&path);
        let stop = self.stop.clone();
        let grace = self.options.shutdown_grace;
        let deadline = async move {
            stop.cancelled().await;
            tokio::time::sleep(grace).await;
        };

        tokio::select! {
            outcome = self.export(&mut task, &temp) => outcome,
            _ = deadline => {
                warn!("Export of {} did not finish within the grace period", document_id);
                remove_temp(&temp).await;
                ExportOutcome::Skipped { path, reason: SkipReason::Cancelled }
            }
        }
    }

    async fn export(&self, task: &mut ExportTask, temp: &Path) -> ExportOutcome {
        match self.try_export(task, temp).await {
            Ok(outcome) => outcome,
            Err(err) => {
                remove_temp(temp).await;
                warn!(
                    "Failed to export {} to {}: {}",
                    task.document_id,
                    task.target_path.display(),
                    err
                );
                ExportOutcome::Failed {
                    path: task.target_path.clone(),
                    kind: err.kind(),
                    message: err.to_string(),
                }
            }
        }
    }

    async fn try_export(&self, task: &mut ExportTask, temp: &Path) -> Result<ExportOutcome> {
        let path = task.target_path.clone();

        if !self.options.overwrite && fs::try_exists(&path).await? {
            debug!("Skipping existing file {}", path.display());
            return Ok(ExportOutcome::Skipped {
                path,
                reason: SkipReason::AlreadyExists,
            });
        }

        if self.options.dry_run {
            debug!("Dry run: would export {} to {}", task.document_id, path.display());
            return Ok(ExportOutcome::Skipped {
                path,
                reason: SkipReason::DryRun,
            });
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        loop {
            task.attempt += 1;
            let stream = self.client.fetch_export(&task.document_id).await?;

            match write_stream(stream, temp).await {
                Ok(0) => {
                    return Err(Error::Remote(format!(
                        "Export of {} returned no data",
                        task.document_id
                    )));
                }
                Ok(bytes_written) => {
                    fs::rename(temp, &path).await?;
                    debug!("Exported {} ({} bytes)", path.display(), bytes_written);
                    return Ok(ExportOutcome::Success {
                        path,
                        bytes_written,
                    });
                }
                Err(err)
                    if err.is_retryable() && task.attempt < self.options.max_export_attempts =>
                {
                    let delay = self.options.retry.delay_for_attempt(task.attempt - 1);
                    warn!(
                        "Export of {} interrupted (attempt {}/{}), retrying in {:?}: {}",
                        task.document_id,
                        task.attempt,
                        self.options.max_export_attempts,
                        delay,
                        err
                    );
                    remove_temp(temp).await;
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Stream an export into `temp`, returning the number of bytes written.
async fn write_stream(mut stream: ExportStream, temp: &Path) -> Result<u64> {
    let mut file = fs::File::create(temp).await?;
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}

/// Hidden sibling of `target` used while the export is in progress. The
/// name does not grow with the target's, which may already be near the
/// file name limit.
fn temp_path(target: &Path) -> PathBuf {
    target.with_file_name(format!(".{}.part", Uuid::new_v4()))
}

async fn remove_temp(temp: &Path) {
    match fs::remove_file(temp).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove temporary file {}: {}", temp.display(), e),
    }
}
