//! Local path assignment.
//!
//! Turns every node of a `RemoteTree` into a path below the target root.
//! Pure data transformation: nothing here touches the filesystem.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::traversal::{NodeIndex, RemoteTree, TreeNode};

/// Maximum length of one sanitized path component, in bytes.
pub const MAX_COMPONENT_LEN: usize = 200;

/// Characters rejected by at least one supported filesystem.
const RESERVED_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Device names Windows refuses as file stems.
const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Make a title safe to use as a single path component.
///
/// Reserved characters become `-`, control characters (NUL included) are
/// dropped, runs of `-` collapse, and leading/trailing dashes, spaces and
/// trailing dots are trimmed. The result may be empty.
pub fn sanitize_component(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    for c in title.chars() {
        if c.is_control() {
            continue;
        }
        let c = if RESERVED_CHARS.contains(&c) { '-' } else { c };
        if c == '-' && out.ends_with('-') {
            continue;
        }
        out.push(c);
    }

    let mut name = trim_component(&out).to_string();

    if name.len() > MAX_COMPONENT_LEN {
        let mut end = MAX_COMPONENT_LEN;
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        name.truncate(end);
        name = trim_component(&name).to_string();
    }

    let stem_len = name.find('.').unwrap_or(name.len());
    if RESERVED_NAMES
        .iter()
        .any(|r| r.eq_ignore_ascii_case(&name[..stem_len]))
    {
        name.insert(stem_len, '_');
    }

    name
}

fn trim_component(name: &str) -> &str {
    name.trim_matches(|c: char| c == '-' || c.is_whitespace())
        .trim_end_matches(|c: char| c == '.' || c.is_whitespace())
}

/// Local path assigned to one tree node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedPath {
    pub index: NodeIndex,
    pub local_path: PathBuf,
}

/// Paths for every node of a tree, addressable by `NodeIndex`.
#[derive(Debug, Clone, Default)]
pub struct PathMap {
    paths: Vec<MaterializedPath>,
}

impl PathMap {
    /// Path assigned to a node.
    pub fn path(&self, index: NodeIndex) -> &Path {
        &self.paths[index.index()].local_path
    }

    /// Number of nodes with an assigned path.
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Whether no node has a path.
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Assigned paths in tree order.
    pub fn iter(&self) -> impl Iterator<Item = &MaterializedPath> {
        self.paths.iter()
    }
}

/// Assigns local paths to remote nodes.
#[derive(Debug, Clone)]
pub struct Materializer {
    target_root: PathBuf,
    extension: String,
}

impl Materializer {
    /// Create a materializer rooted at `target_root`. Documents get
    /// `.{extension}` appended.
    pub fn new(target_root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            target_root: target_root.into(),
            extension: extension.into(),
        }
    }

    /// Assign a path to every node of `tree`.
    ///
    /// Siblings are named in discovery order; a later sibling whose name
    /// collides (case-insensitively) with an earlier one gets ` (n)` appended
    /// to its stem, using the smallest `n` still free.
    pub fn materialize(&self, tree: &RemoteTree) -> PathMap {
        let mut paths: Vec<MaterializedPath> = Vec::with_capacity(tree.len());
        // Names taken inside each folder, lowercased, indexed like the tree.
        let mut taken: Vec<HashSet<String>> = vec![HashSet::new(); tree.len()];

        for (index, node) in tree.iter() {
            let local_path = match node.parent {
                None => self.target_root.join(self.base_name(node)),
                Some(parent) => {
                    let name = self.unique_name(node, &mut taken[parent.index()]);
                    paths[parent.index()].local_path.join(name)
                }
            };
            paths.push(MaterializedPath { index, local_path });
        }

        PathMap { paths }
    }

    fn base_name(&self, node: &TreeNode) -> String {
        let name = sanitize_component(&node.node.title);
        if name.is_empty() {
            format!("untitled-{}", sanitize_component(node.node.id.as_str()))
        } else {
            name
        }
    }

    fn unique_name(&self, node: &TreeNode, taken: &mut HashSet<String>) -> String {
        let base = self.base_name(node);
        let extension = if node.node.is_document() {
            format!(".{}", self.extension)
        } else {
            String::new()
        };

        let mut candidate = format!("{}{}", base, extension);
        let mut n = 1;
        while !taken.insert(candidate.to_lowercase()) {
            candidate = format!("{} ({}){}", base, n, extension);
            n += 1;
        }
        candidate
    }
}
