//! Mirror run configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use docmirror_common::{Error, NodeId, Result};
use docmirror_remote::RetryConfig;

/// Default number of concurrent export workers.
pub const DEFAULT_CONCURRENCY: usize = 4;
/// Default maximum folder depth below the root.
pub const DEFAULT_MAX_DEPTH: usize = 50;
/// Default export file extension.
pub const DEFAULT_EXTENSION: &str = "docx";

/// Configuration for one mirror run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// Remote folder to mirror.
    pub root_folder_id: NodeId,
    /// Local directory the root folder is materialized under.
    pub target_root: PathBuf,
    /// Replace existing files. When false, existing files are skipped
    /// without fetching anything.
    pub overwrite: bool,
    /// Number of concurrent export workers.
    pub concurrency: usize,
    /// Folders deeper than this below the root are not listed.
    pub max_depth: usize,
    /// Discover and plan only; never fetch or write documents.
    pub dry_run: bool,
    /// Extension given to exported documents, without the dot.
    pub extension: String,
    /// How long in-flight exports may keep running after cancellation.
    pub shutdown_grace: Duration,
    /// Whole-document attempts when an export stream breaks mid-transfer.
    pub max_export_attempts: u32,
    /// Retry policy for remote calls.
    pub retry: RetryConfig,
}

impl MirrorConfig {
    /// Create a configuration with defaults for everything but the endpoints.
    pub fn new(root_folder_id: NodeId, target_root: impl Into<PathBuf>) -> Self {
        Self {
            root_folder_id,
            target_root: target_root.into(),
            overwrite: true,
            concurrency: DEFAULT_CONCURRENCY,
            max_depth: DEFAULT_MAX_DEPTH,
            dry_run: false,
            extension: DEFAULT_EXTENSION.to_string(),
            shutdown_grace: Duration::from_secs(10),
            max_export_attempts: 2,
            retry: RetryConfig::default(),
        }
    }

    /// Set overwrite behavior.
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Set worker count.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set maximum traversal depth.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Enable or disable dry-run mode.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Set export extension.
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// Set cancellation grace period.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Set whole-document export attempts.
    pub fn with_max_export_attempts(mut self, attempts: u32) -> Self {
        self.max_export_attempts = attempts;
        self
    }

    /// Set remote retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    /// - Zero concurrency or zero export attempts
    /// - Empty extension, or one containing a separator or dot prefix
    /// - Target root exists but is not a directory
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(Error::InvalidInput(
                "Concurrency must be at least 1".to_string(),
            ));
        }

        if self.max_export_attempts == 0 {
            return Err(Error::InvalidInput(
                "Export attempts must be at least 1".to_string(),
            ));
        }

        if self.extension.is_empty()
            || self.extension.starts_with('.')
            || self.extension.contains(['/', '\\'])
        {
            return Err(Error::InvalidInput(format!(
                "Invalid export extension: {:?}",
                self.extension
            )));
        }

        if self.target_root.as_os_str().is_empty() {
            return Err(Error::InvalidInput("Target path is required".to_string()));
        }

        if self.target_root.exists() && !self.target_root.is_dir() {
            return Err(Error::InvalidInput(format!(
                "Target path exists but is not a directory: {}",
                self.target_root.display()
            )));
        }

        Ok(())
    }
}
