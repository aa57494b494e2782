//! Retry strategy with exponential backoff for transient remote errors.

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use docmirror_common::{Error, NodeId, Result};

use crate::provider::{DocumentMetadata, ExportStream, FolderListing, RemoteDirectory};

/// Configuration for retry behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first call.
    pub max_retries: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay (cap for exponential growth).
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub jitter: bool,
    /// Upper bound for a single remote call, and for the gap between two
    /// chunks of an export stream.
    pub call_timeout: Duration,
}

impl RetryConfig {
    /// Create a new retry configuration.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
            call_timeout: Duration::from_secs(30),
        }
    }

    /// Set initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enable or disable jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Set the per-call timeout.
    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Calculate delay for a given attempt number.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi(attempt as i32);

        let capped_delay = base_delay.min(self.max_delay.as_millis() as f64);

        let final_delay = if self.jitter {
            // Add random jitter of +/- 25%
            let jitter_factor = 0.75 + (rand::random::<f64>() * 0.5);
            capped_delay * jitter_factor
        } else {
            capped_delay
        };

        Duration::from_millis(final_delay as u64)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Retry executor for running remote calls with retry logic.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    /// Create a new retry executor.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Execute an operation with retry logic.
    ///
    /// Every attempt is bounded by `call_timeout`. The operation is retried
    /// only when it fails with a retryable error (`Transient` or
    /// `RateLimited`); anything else is returned immediately.
    pub async fn execute<F, Fut, T>(&self, label: &str, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;

        loop {
            let outcome = match timeout(self.config.call_timeout, operation()).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(format!(
                    "{} did not complete within {:?}",
                    label, self.config.call_timeout
                ))),
            };

            match outcome {
                Ok(result) => {
                    if attempt > 0 {
                        debug!("{} succeeded after {} retries", label, attempt);
                    }
                    return Ok(result);
                }
                Err(err) => {
                    if !err.is_retryable() {
                        return Err(err);
                    }

                    attempt += 1;
                    if attempt > self.config.max_retries {
                        warn!(
                            "{} failed after {} attempts: {}",
                            label, attempt, err
                        );
                        return Err(err);
                    }

                    let delay = self.config.delay_for_attempt(attempt - 1);
                    warn!(
                        "{}: attempt {} failed: {}. Retrying in {:?}...",
                        label, attempt, err, delay
                    );

                    sleep(delay).await;
                }
            }
        }
    }

    /// Get the retry configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}

/// Decorator that applies the retry policy and call timeouts to every
/// operation of an inner `RemoteDirectory`.
pub struct RetryingDirectory<D: ?Sized> {
    inner: Arc<D>,
    executor: RetryExecutor,
}

impl<D: RemoteDirectory + ?Sized> RetryingDirectory<D> {
    /// Wrap a directory with the given retry configuration.
    pub fn new(inner: Arc<D>, config: RetryConfig) -> Self {
        Self {
            inner,
            executor: RetryExecutor::new(config),
        }
    }

    /// Get the wrapped directory.
    pub fn inner(&self) -> &Arc<D> {
        &self.inner
    }
}

#[async_trait]
impl<D: RemoteDirectory + ?Sized> RemoteDirectory for RetryingDirectory<D> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn list_children(&self, folder_id: &NodeId) -> Result<FolderListing> {
        let label = format!("list folder {}", folder_id);
        self.executor
            .execute(&label, || self.inner.list_children(folder_id))
            .await
    }

    async fn fetch_metadata(&self, document_id: &NodeId) -> Result<DocumentMetadata> {
        let label = format!("fetch metadata {}", document_id);
        self.executor
            .execute(&label, || self.inner.fetch_metadata(document_id))
            .await
    }

    async fn fetch_export(&self, document_id: &NodeId) -> Result<ExportStream> {
        let label = format!("export {}", document_id);
        let stream = self
            .executor
            .execute(&label, || self.inner.fetch_export(document_id))
            .await?;
        Ok(with_idle_timeout(stream, self.executor.config().call_timeout))
    }
}

/// Fail a stream that stays silent for longer than `idle`.
fn with_idle_timeout(stream: ExportStream, idle: Duration) -> ExportStream {
    Box::pin(futures::stream::unfold(Some(stream), move |state| async move {
        let mut stream = state?;
        match timeout(idle, stream.next()).await {
            Ok(Some(item)) => Some((item, Some(stream))),
            Ok(None) => None,
            Err(_) => Some((
                Err(Error::Timeout(format!(
                    "no export data received for {:?}",
                    idle
                ))),
                None,
            )),
        }
    }))
}
