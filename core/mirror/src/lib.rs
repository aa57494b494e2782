//! DocMirror mirroring engine
//!
//! This module mirrors a remote folder hierarchy into a local directory tree:
//! - Deterministic depth-first traversal with cross-link and cycle protection
//! - Pure path materialization with sanitization and sibling disambiguation
//! - Bounded-concurrency export with atomic writes and failure isolation
//! - A single aggregation point producing a live event stream and a summary
//! - Cooperative cancellation with a grace period for in-flight exports

pub mod aggregate;
pub mod config;
pub mod engine;
pub mod export;
pub mod materialize;
pub mod traversal;

// Re-export main types
pub use aggregate::{MirrorSummary, ProgressEvent, ResultAggregator, SummaryEntry};
pub use config::MirrorConfig;
pub use engine::{mirror, MirrorEngine};
pub use export::{ExportOptions, ExportOrchestrator, ExportOutcome, ExportTask, SkipReason};
pub use materialize::{sanitize_component, MaterializedPath, Materializer, PathMap};
pub use traversal::{
    FolderFailure, FolderState, NodeIndex, RemoteTree, TitleFailure, Traversal, TraversalEngine,
    TreeNode,
};
