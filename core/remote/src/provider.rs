//! Remote directory trait definition.

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;

use docmirror_common::{NodeId, RemoteNode, Result};

/// Byte stream carrying a document export.
pub type ExportStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Result of listing a folder.
#[derive(Debug, Clone, Default)]
pub struct FolderListing {
    /// Title of the listed folder itself, when the API reports it.
    pub title: Option<String>,
    /// Children in the order the API returned them.
    pub children: Vec<RemoteNode>,
}

/// Metadata for a single document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: String,
}

/// Remote hierarchical document store.
///
/// Implementations must be safe to call concurrently. Failures are reported
/// through `Error` variants whose `kind()` follows the mirror taxonomy:
/// `NotFound` for missing or inaccessible nodes, `Authentication` for a
/// rejected credential, `RateLimited` when throttled, `Network`/`Timeout` for
/// transient transport failures.
#[async_trait]
pub trait RemoteDirectory: Send + Sync {
    /// Get the provider name (e.g., "quip", "memory").
    fn name(&self) -> &str;

    /// List the children of a folder.
    ///
    /// Children are tagged unambiguously as folders or documents. Titles may be
    /// empty when the API does not include them in listings.
    async fn list_children(&self, folder_id: &NodeId) -> Result<FolderListing>;

    /// Fetch metadata for a document.
    async fn fetch_metadata(&self, document_id: &NodeId) -> Result<DocumentMetadata>;

    /// Fetch the export of a document as a byte stream.
    ///
    /// The stream yields the complete payload; errors may occur mid-stream.
    async fn fetch_export(&self, document_id: &NodeId) -> Result<ExportStream>;
}

#[async_trait]
impl<T: RemoteDirectory + ?Sized> RemoteDirectory for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn list_children(&self, folder_id: &NodeId) -> Result<FolderListing> {
        (**self).list_children(folder_id).await
    }

    async fn fetch_metadata(&self, document_id: &NodeId) -> Result<DocumentMetadata> {
        (**self).fetch_metadata(document_id).await
    }

    async fn fetch_export(&self, document_id: &NodeId) -> Result<ExportStream> {
        (**self).fetch_export(document_id).await
    }
}
