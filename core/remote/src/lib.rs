//! Remote directory access for DocMirror.
//!
//! This module provides a trait-based interface over a remote hierarchical
//! document store, exposing three primitives: list a folder, fetch document
//! metadata, and fetch a document's export bytes.
//!
//! # Design Principles
//! - Provider isolation: the mirroring engine only sees `RemoteDirectory`
//! - Classified errors: every failure carries an `ErrorKind`
//! - Bounded retries: only `Transient` and `RateLimited` failures are retried
//! - Streaming exports: large documents are never buffered whole

pub mod memory;
pub mod provider;
pub mod quip;
pub mod retry;

pub use memory::{MemoryDirectory, Operation};
pub use provider::{DocumentMetadata, ExportStream, FolderListing, RemoteDirectory};
pub use quip::{extract_folder_id, QuipClient, QuipConfig};
pub use retry::{RetryConfig, RetryExecutor, RetryingDirectory};
