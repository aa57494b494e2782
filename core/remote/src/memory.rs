//! In-memory remote directory for testing.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use docmirror_common::{Error, ErrorKind, NodeId, RemoteNode, Result};

use crate::provider::{DocumentMetadata, ExportStream, FolderListing, RemoteDirectory};

/// Size of the chunks an export is split into.
const EXPORT_CHUNK_SIZE: usize = 64 * 1024;

/// Remote operation, used to target failure injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ListChildren,
    FetchMetadata,
    FetchExport,
}

#[derive(Debug, Clone)]
struct Folder {
    title: String,
    children: Vec<RemoteNode>,
}

#[derive(Debug, Clone)]
struct Document {
    title: String,
    content: Bytes,
}

#[derive(Default)]
struct State {
    folders: HashMap<String, Folder>,
    documents: HashMap<String, Document>,
    faults: HashMap<(Operation, String), VecDeque<ErrorKind>>,
    stream_faults: HashMap<String, usize>,
    calls: HashMap<(Operation, String), usize>,
    latency: Option<Duration>,
}

/// In-memory remote directory.
///
/// Useful for testing and development. The tree is built with the `add_*`
/// methods; cross-links and cycles are expressed with `link_folder`.
#[derive(Default)]
pub struct MemoryDirectory {
    state: Mutex<State>,
}

impl MemoryDirectory {
    /// Create a new empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add a top-level folder that has no parent.
    pub fn add_root(&self, id: &str, title: &str) {
        self.state().folders.insert(
            id.to_string(),
            Folder {
                title: title.to_string(),
                children: Vec::new(),
            },
        );
    }

    /// Add a folder under `parent`.
    ///
    /// The child entry in the parent listing carries `title`, like the folder's
    /// own listing does.
    pub fn add_folder(&self, parent: &str, id: &str, title: &str) {
        let mut state = self.state();
        state.folders.insert(
            id.to_string(),
            Folder {
                title: title.to_string(),
                children: Vec::new(),
            },
        );
        if let Some(folder) = state.folders.get_mut(parent) {
            folder.children.push(RemoteNode::folder(id, title));
        }
    }

    /// Add a document under `parent`.
    pub fn add_document(&self, parent: &str, id: &str, title: &str, content: impl Into<Bytes>) {
        self.add_document_listed_as(parent, id, title, title, content);
    }

    /// Add a document whose listing entry carries `listed_title` while its
    /// metadata reports `title`. An empty `listed_title` mimics APIs that omit
    /// titles from folder listings.
    pub fn add_document_listed_as(
        &self,
        parent: &str,
        id: &str,
        listed_title: &str,
        title: &str,
        content: impl Into<Bytes>,
    ) {
        let mut state = self.state();
        state.documents.insert(
            id.to_string(),
            Document {
                title: title.to_string(),
                content: content.into(),
            },
        );
        if let Some(folder) = state.folders.get_mut(parent) {
            folder.children.push(RemoteNode::document(id, listed_title));
        }
    }

    /// List an existing folder under a second parent.
    pub fn link_folder(&self, parent: &str, id: &str) {
        let mut state = self.state();
        let title = state
            .folders
            .get(id)
            .map(|f| f.title.clone())
            .unwrap_or_default();
        if let Some(folder) = state.folders.get_mut(parent) {
            folder.children.push(RemoteNode::folder(id, title));
        }
    }

    /// Make the next `times` calls of `operation` on `id` fail with `kind`.
    pub fn inject_failure(&self, operation: Operation, id: &str, kind: ErrorKind, times: usize) {
        let mut state = self.state();
        let queue = state
            .faults
            .entry((operation, id.to_string()))
            .or_default();
        queue.extend(std::iter::repeat(kind).take(times));
    }

    /// Make the next `times` exports of `id` fail with a transient error
    /// after the first chunk has been delivered.
    pub fn fail_export_midway(&self, id: &str, times: usize) {
        *self.state().stream_faults.entry(id.to_string()).or_default() += times;
    }

    /// Delay every operation by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = Some(latency);
    }

    /// Number of calls made for `operation` on `id`.
    pub fn call_count(&self, operation: Operation, id: &str) -> usize {
        self.state()
            .calls
            .get(&(operation, id.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Total number of calls made for `operation` across all ids.
    pub fn total_calls(&self, operation: Operation) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|((op, _), _)| *op == operation)
            .map(|(_, count)| count)
            .sum()
    }

    /// Record a call and return the injected failure, if any.
    async fn enter(&self, operation: Operation, id: &NodeId) -> Result<()> {
        let (latency, fault) = {
            let mut state = self.state();
            *state
                .calls
                .entry((operation, id.as_str().to_string()))
                .or_default() += 1;
            let fault = state
                .faults
                .get_mut(&(operation, id.as_str().to_string()))
                .and_then(|queue| queue.pop_front());
            (state.latency, fault)
        };

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        match fault {
            Some(kind) => Err(Error::from_kind(
                kind,
                format!("injected failure for {}", id),
            )),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteDirectory for MemoryDirectory {
    fn name(&self) -> &str {
        "memory"
    }

    async fn list_children(&self, folder_id: &NodeId) -> Result<FolderListing> {
        self.enter(Operation::ListChildren, folder_id).await?;

        let state = self.state();
        let folder = state
            .folders
            .get(folder_id.as_str())
            .ok_or_else(|| Error::NotFound(format!("Folder {} not found", folder_id)))?;

        Ok(FolderListing {
            title: Some(folder.title.clone()),
            children: folder.children.clone(),
        })
    }

    async fn fetch_metadata(&self, document_id: &NodeId) -> Result<DocumentMetadata> {
        self.enter(Operation::FetchMetadata, document_id).await?;

        let state = self.state();
        let document = state
            .documents
            .get(document_id.as_str())
            .ok_or_else(|| Error::NotFound(format!("Document {} not found", document_id)))?;

        Ok(DocumentMetadata {
            title: document.title.clone(),
        })
    }

    async fn fetch_export(&self, document_id: &NodeId) -> Result<ExportStream> {
        self.enter(Operation::FetchExport, document_id).await?;

        let mut state = self.state();
        let content = state
            .documents
            .get(document_id.as_str())
            .map(|d| d.content.clone())
            .ok_or_else(|| Error::NotFound(format!("Document {} not found", document_id)))?;

        let fail_midway = match state.stream_faults.get_mut(document_id.as_str()) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        };

        let mut chunks: Vec<Result<Bytes>> = Vec::new();
        let mut offset = 0;
        while offset < content.len() {
            let end = (offset + EXPORT_CHUNK_SIZE).min(content.len());
            chunks.push(Ok(content.slice(offset..end)));
            offset = end;
        }

        if fail_midway {
            chunks.truncate(1);
            chunks.push(Err(Error::Network(format!(
                "connection reset while exporting {}",
                document_id
            ))));
        }

        Ok(Box::pin(stream::iter(chunks)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    async fn collect(mut stream: ExportStream) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        while let Some(chunk) = stream.next().await {
            data.extend_from_slice(&chunk?);
        }
        Ok(data)
    }

    #[tokio::test]
    async fn test_list_children_in_insertion_order() {
        let remote = MemoryDirectory::new();
        remote.add_root("F1", "Root");
        remote.add_document("F1", "D1", "First", b"1".to_vec());
        remote.add_folder("F1", "F2", "Sub");
        remote.add_document("F1", "D2", "Second", b"2".to_vec());

        let listing = remote.list_children(&NodeId::new("F1")).await.unwrap();
        let ids: Vec<&str> = listing.children.iter().map(|c| c.id.as_str()).collect();

        assert_eq!(listing.title.as_deref(), Some("Root"));
        assert_eq!(ids, vec!["D1", "F2", "D2"]);
        assert!(listing.children[1].is_folder());
    }

    #[tokio::test]
    async fn test_missing_folder_is_not_found() {
        let remote = MemoryDirectory::new();
        let err = remote.list_children(&NodeId::new("nope")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_export_is_chunked() {
        let remote = MemoryDirectory::new();
        remote.add_root("F1", "Root");
        let content = vec![7u8; EXPORT_CHUNK_SIZE * 2 + 10];
        remote.add_document("F1", "D1", "Big", content.clone());

        let stream = remote.fetch_export(&NodeId::new("D1")).await.unwrap();
        assert_eq!(collect(stream).await.unwrap(), content);
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let remote = MemoryDirectory::new();
        remote.add_root("F1", "Root");
        remote.add_document("F1", "D1", "Doc", b"x".to_vec());
        remote.inject_failure(Operation::FetchMetadata, "D1", ErrorKind::RateLimited, 1);

        let id = NodeId::new("D1");
        let err = remote.fetch_metadata(&id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RateLimited);
        assert_eq!(remote.fetch_metadata(&id).await.unwrap().title, "Doc");
        assert_eq!(remote.call_count(Operation::FetchMetadata, "D1"), 2);
    }

    #[tokio::test]
    async fn test_export_midway_failure() {
        let remote = MemoryDirectory::new();
        remote.add_root("F1", "Root");
        remote.add_document("F1", "D1", "Doc", vec![1u8; EXPORT_CHUNK_SIZE * 3]);
        remote.fail_export_midway("D1", 1);

        let id = NodeId::new("D1");
        let first = remote.fetch_export(&id).await.unwrap();
        assert_eq!(collect(first).await.unwrap_err().kind(), ErrorKind::Transient);

        let second = remote.fetch_export(&id).await.unwrap();
        assert_eq!(collect(second).await.unwrap().len(), EXPORT_CHUNK_SIZE * 3);
    }

    #[tokio::test]
    async fn test_listed_title_can_differ_from_metadata() {
        let remote = MemoryDirectory::new();
        remote.add_root("F1", "Root");
        remote.add_document_listed_as("F1", "D1", "", "Real Title", b"x".to_vec());

        let listing = remote.list_children(&NodeId::new("F1")).await.unwrap();
        assert_eq!(listing.children[0].title, "");
        let meta = remote.fetch_metadata(&NodeId::new("D1")).await.unwrap();
        assert_eq!(meta.title, "Real Title");
    }
}
