//! Folder URL parsing.

use url::Url;

use docmirror_common::{Error, NodeId, Result};

/// Hosts that serve Quip folders.
const QUIP_HOSTS: &[&str] = &["quip.com", "quip-amazon.com"];

/// Extract a folder id from a Quip folder URL or a bare id.
///
/// Accepted forms:
/// - `ABC123`
/// - `https://quip.com/folder/ABC123`
/// - `https://quip.com/folder/ABC123/folder-name`
/// - `https://quip.com/ABC123`
///
/// # Errors
/// - Returns `InvalidInput` for foreign hosts, URLs without an id, and ids
///   that are not ASCII alphanumeric
pub fn extract_folder_id(input: &str) -> Result<NodeId> {
    let input = input.trim();
    if !input.contains("://") {
        return NodeId::parse(input);
    }

    let url = Url::parse(input)
        .map_err(|e| Error::InvalidInput(format!("Invalid folder URL {}: {}", input, e)))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::InvalidInput(format!(
            "Unsupported URL scheme: {}",
            url.scheme()
        )));
    }

    let host = url.host_str().unwrap_or_default();
    let known_host = QUIP_HOSTS
        .iter()
        .any(|known| host == *known || host.ends_with(&format!(".{}", known)));
    if !known_host {
        return Err(Error::InvalidInput(format!("Invalid Quip URL: {}", input)));
    }

    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|part| !part.is_empty()).collect())
        .unwrap_or_default();

    let folder_id = match segments.as_slice() {
        ["folder", id, ..] => *id,
        [id, ..] if *id != "folder" => *id,
        _ => {
            return Err(Error::InvalidInput(format!(
                "Cannot extract folder id from URL: {}",
                input
            )))
        }
    };

    NodeId::parse(folder_id)
}
