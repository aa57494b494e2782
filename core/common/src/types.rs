//! Common types used throughout DocMirror.

use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Opaque identifier of a remote folder or document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Wrap an identifier returned by the remote API.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Parse an identifier supplied by a user.
    ///
    /// # Errors
    /// - Returns error if the id is empty or contains characters other than
    ///   ASCII letters and digits
    pub fn parse(id: &str) -> crate::Result<Self> {
        if id.is_empty() {
            return Err(crate::Error::InvalidInput(
                "Node id cannot be empty".to_string(),
            ));
        }
        if !id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(crate::Error::InvalidInput(format!(
                "Invalid node id format: {}",
                id
            )));
        }
        Ok(Self(id.to_string()))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of remote node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Folder,
    Document,
}

/// A folder or document in the remote store.
///
/// The title is a snapshot taken when the node was listed; later upstream
/// renames are not tracked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteNode {
    /// Remote identity.
    pub id: NodeId,
    /// Folder or document.
    pub kind: NodeKind,
    /// Title at discovery time. May be empty if the listing omitted it.
    pub title: String,
}

impl RemoteNode {
    /// Create a folder node.
    pub fn folder(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: NodeId::new(id),
            kind: NodeKind::Folder,
            title: title.into(),
        }
    }

    /// Create a document node.
    pub fn document(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: NodeId::new(id),
            kind: NodeKind::Document,
            title: title.into(),
        }
    }

    /// Check if this is a folder.
    pub fn is_folder(&self) -> bool {
        self.kind == NodeKind::Folder
    }

    /// Check if this is a document.
    pub fn is_document(&self) -> bool {
        self.kind == NodeKind::Document
    }
}

/// Access credential attached to every remote call.
///
/// The value is wiped from memory on drop and never printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AccessToken(String);

impl AccessToken {
    /// Create a token from its string form.
    ///
    /// # Errors
    /// - Returns error if the token is empty or only whitespace
    pub fn new(token: impl Into<String>) -> crate::Result<Self> {
        let token = token.into();
        let trimmed = token.trim();
        if trimmed.is_empty() {
            return Err(crate::Error::InvalidInput(
                "Access token cannot be empty".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Expose the raw token for building request headers.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccessToken([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_node_id_parse() {
        assert_eq!(NodeId::parse("ABC123").unwrap().as_str(), "ABC123");
        assert!(NodeId::parse("").is_err());
        assert!(NodeId::parse("ABC-123!").is_err());
        assert!(NodeId::parse("a/b").is_err());
    }

    #[test]
    fn test_remote_node_kinds() {
        let folder = RemoteNode::folder("F1", "Reports");
        let doc = RemoteNode::document("D1", "Q1");

        assert!(folder.is_folder());
        assert!(!folder.is_document());
        assert!(doc.is_document());
        assert_eq!(doc.id, NodeId::new("D1"));
    }

    #[test]
    fn test_access_token_is_redacted() {
        let token = AccessToken::new("  secret-value \n").unwrap();
        assert_eq!(token.expose(), "secret-value");
        assert_eq!(format!("{:?}", token), "AccessToken([REDACTED])");
        assert!(AccessToken::new("   ").is_err());
    }

    proptest! {
        #[test]
        fn test_alphanumeric_ids_always_parse(id in "[A-Za-z0-9]{1,40}") {
            let parsed = NodeId::parse(&id).unwrap();
            prop_assert_eq!(parsed.as_str(), id.as_str());
        }
    }
}
