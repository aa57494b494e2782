//! Remote tree traversal.
//!
//! The walk is an explicit depth-first worklist: children are visited in the
//! order `list_children` returned them, so a fixed remote tree always yields
//! the same node order. Each folder id is expanded at most once per walk.

use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use docmirror_common::{Error, ErrorKind, NodeId, RemoteNode, Result};
use docmirror_remote::RemoteDirectory;

/// Position of a node in a `RemoteTree`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIndex(usize);

impl NodeIndex {
    #[cfg(test)]
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    /// Position in the tree's node list.
    pub fn index(self) -> usize {
        self.0
    }
}

/// Lifecycle of a folder during the walk.
///
/// `Pending -> Listing -> Expanded | Errored`. A folder id met a second time
/// stays a `Reference` leaf and is never listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderState {
    Pending,
    Listing,
    Expanded,
    Errored,
    Reference,
}

/// A discovered node with its position in the hierarchy.
#[derive(Debug, Clone)]
pub struct TreeNode {
    /// Remote node snapshot.
    pub node: RemoteNode,
    /// Parent folder, `None` for the root.
    pub parent: Option<NodeIndex>,
    /// Distance from the root.
    pub depth: usize,
    /// Children in listing order.
    pub children: Vec<NodeIndex>,
    /// Folder lifecycle, `None` for documents.
    pub folder_state: Option<FolderState>,
}

impl TreeNode {
    /// Check if this is a reference-only leaf for an already expanded folder.
    pub fn is_reference(&self) -> bool {
        self.folder_state == Some(FolderState::Reference)
    }
}

/// Hierarchy produced by one walk. Nodes are stored in discovery order, so a
/// parent always precedes its children.
#[derive(Debug, Clone, Default)]
pub struct RemoteTree {
    nodes: Vec<TreeNode>,
    documents: Vec<NodeIndex>,
}

impl RemoteTree {
    /// Index of the root folder.
    pub fn root(&self) -> NodeIndex {
        NodeIndex(0)
    }

    /// Get a node.
    pub fn get(&self, index: NodeIndex) -> &TreeNode {
        &self.nodes[index.0]
    }

    /// Number of nodes, references included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if nothing was discovered.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterate over all nodes in discovery order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeIndex, &TreeNode)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeIndex(i), n))
    }

    /// Documents in discovery order.
    pub fn documents(&self) -> &[NodeIndex] {
        &self.documents
    }

    /// Number of folders that were listed successfully.
    pub fn folders_expanded(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.folder_state == Some(FolderState::Expanded))
            .count()
    }

    /// Ancestors of a node, root first.
    pub fn parent_path(&self, index: NodeIndex) -> Vec<&RemoteNode> {
        let mut path = Vec::new();
        let mut current = self.get(index).parent;
        while let Some(parent) = current {
            let node = self.get(parent);
            path.push(&node.node);
            current = node.parent;
        }
        path.reverse();
        path
    }

    fn push(&mut self, node: TreeNode) -> NodeIndex {
        let index = NodeIndex(self.nodes.len());
        if node.folder_state.is_none() {
            self.documents.push(index);
        }
        self.nodes.push(node);
        index
    }

    fn get_mut(&mut self, index: NodeIndex) -> &mut TreeNode {
        &mut self.nodes[index.0]
    }
}

/// A folder whose subtree could not be listed.
#[derive(Debug, Clone)]
pub struct FolderFailure {
    pub index: NodeIndex,
    pub kind: ErrorKind,
    pub message: String,
}

/// A document whose title could not be resolved. It keeps the id-derived
/// fallback name.
#[derive(Debug, Clone)]
pub struct TitleFailure {
    pub index: NodeIndex,
    pub kind: ErrorKind,
    pub message: String,
}

/// Result of a completed walk.
#[derive(Debug, Clone)]
pub struct Traversal {
    pub tree: RemoteTree,
    /// Non-root folders that failed to list, in discovery order.
    pub failures: Vec<FolderFailure>,
    /// Reference leaves created for folders reached more than once.
    pub cycles: Vec<NodeIndex>,
    /// Documents listed without a title whose metadata lookup failed.
    pub untitled: Vec<TitleFailure>,
}

/// Walks a remote folder hierarchy.
pub struct TraversalEngine<D: RemoteDirectory + ?Sized> {
    client: Arc<D>,
    max_depth: usize,
    cancel: CancellationToken,
}

impl<D: RemoteDirectory + ?Sized> TraversalEngine<D> {
    /// Create a new traversal engine.
    pub fn new(client: Arc<D>, max_depth: usize, cancel: CancellationToken) -> Self {
        Self {
            client,
            max_depth,
            cancel,
        }
    }

    /// Walk the hierarchy below `root_id`.
    ///
    /// # Errors
    /// - Any failure listing the root folder
    /// - `Cancelled` if the cancellation token fires
    pub async fn walk(&self, root_id: &NodeId) -> Result<Traversal> {
        info!("Starting traversal of folder: {}", root_id);

        let mut tree = RemoteTree::default();
        let mut failures = Vec::new();
        let mut cycles = Vec::new();
        let mut untitled = Vec::new();
        let mut expanded: HashSet<NodeId> = HashSet::new();

        let root = tree.push(TreeNode {
            node: RemoteNode::folder(root_id.as_str(), ""),
            parent: None,
            depth: 0,
            children: Vec::new(),
            folder_state: Some(FolderState::Pending),
        });
        let mut stack = vec![root];

        while let Some(index) = stack.pop() {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let folder_id = tree.get(index).node.id.clone();
            let depth = tree.get(index).depth;

            if depth > self.max_depth {
                warn!(
                    "Folder {} is below the maximum traversal depth ({})",
                    folder_id, self.max_depth
                );
                tree.get_mut(index).folder_state = Some(FolderState::Errored);
                failures.push(FolderFailure {
                    index,
                    kind: ErrorKind::Unknown,
                    message: format!("Maximum traversal depth ({}) exceeded", self.max_depth),
                });
                continue;
            }

            // Only folders within the depth limit count as expanded, so a
            // shallower path to a folder first met too deep still lists it.
            if !expanded.insert(folder_id.clone()) {
                warn!("Folder {} reached again, not expanding it twice", folder_id);
                tree.get_mut(index).folder_state = Some(FolderState::Reference);
                cycles.push(index);
                continue;
            }

            tree.get_mut(index).folder_state = Some(FolderState::Listing);
            let listing = tokio::select! {
                _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                listing = self.client.list_children(&folder_id) => listing,
            };

            let listing = match listing {
                Ok(listing) => listing,
                Err(err) if index == root => {
                    warn!("Failed to list root folder {}: {}", folder_id, err);
                    return Err(err);
                }
                Err(err) => {
                    warn!("Failed to list folder {}: {}", folder_id, err);
                    tree.get_mut(index).folder_state = Some(FolderState::Errored);
                    failures.push(FolderFailure {
                        index,
                        kind: err.kind(),
                        message: err.to_string(),
                    });
                    continue;
                }
            };

            {
                let folder = tree.get_mut(index);
                folder.folder_state = Some(FolderState::Expanded);
                if folder.node.title.trim().is_empty() {
                    if let Some(title) = listing.title {
                        folder.node.title = title;
                    }
                }
            }

            let mut subfolders = Vec::new();
            for mut child in listing.children {
                let mut title_error = None;
                if child.is_document() && child.title.trim().is_empty() {
                    match self.client.fetch_metadata(&child.id).await {
                        Ok(metadata) => child.title = metadata.title,
                        Err(err) => {
                            warn!("Could not get metadata for document {}: {}", child.id, err);
                            title_error = Some(err);
                        }
                    }
                }

                let is_folder = child.is_folder();
                let child_index = tree.push(TreeNode {
                    node: child,
                    parent: Some(index),
                    depth: depth + 1,
                    children: Vec::new(),
                    folder_state: is_folder.then_some(FolderState::Pending),
                });
                if let Some(err) = title_error {
                    untitled.push(TitleFailure {
                        index: child_index,
                        kind: err.kind(),
                        message: err.to_string(),
                    });
                }
                tree.get_mut(index).children.push(child_index);
                if is_folder {
                    subfolders.push(child_index);
                }
            }

            debug!(
                "Expanded folder {} at depth {}: {} children",
                folder_id,
                depth,
                tree.get(index).children.len()
            );

            // Reverse so the first listed subfolder is expanded first.
            stack.extend(subfolders.into_iter().rev());
        }

        info!(
            "Completed traversal of {}: {} folders, {} documents, {} failed folders",
            root_id,
            tree.folders_expanded(),
            tree.documents().len(),
            failures.len()
        );

        Ok(Traversal {
            tree,
            failures,
            cycles,
            untitled,
        })
    }
}
