//! Quip REST API client.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{header, Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use docmirror_common::{AccessToken, Error, NodeId, RemoteNode, Result};

use crate::provider::{DocumentMetadata, ExportStream, FolderListing, RemoteDirectory};

/// Quip platform API base URL.
pub const DEFAULT_API_BASE: &str = "https://platform.quip.com/1";

const USER_AGENT: &str = concat!("DocMirror/", env!("CARGO_PKG_VERSION"));

/// Longest slice of an error response body kept in messages.
const MAX_BODY_SNIPPET: usize = 200;

/// Quip client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuipConfig {
    /// API base URL, without trailing slash.
    pub api_base: String,
    /// Timeout for connecting and for each read. Export bodies may take
    /// longer than this in total as long as data keeps arriving.
    pub request_timeout: Duration,
}

impl Default for QuipConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Response from `GET /folders/{id}`.
#[derive(Debug, Deserialize)]
struct FolderResponse {
    #[serde(default)]
    folder: FolderInfo,
    #[serde(default)]
    children: Vec<ChildEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct FolderInfo {
    #[serde(default)]
    title: Option<String>,
}

/// A child entry is either `{"folder_id": ...}` or `{"thread_id": ...}`.
#[derive(Debug, Deserialize)]
struct ChildEntry {
    #[serde(default)]
    folder_id: Option<String>,
    #[serde(default)]
    thread_id: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

/// Response from `GET /threads/{id}`.
#[derive(Debug, Deserialize)]
struct ThreadResponse {
    #[serde(default)]
    thread: ThreadInfo,
}

#[derive(Debug, Default, Deserialize)]
struct ThreadInfo {
    #[serde(default)]
    title: Option<String>,
}

impl FolderResponse {
    fn into_listing(self) -> FolderListing {
        let mut children = Vec::with_capacity(self.children.len());

        for child in self.children {
            let title = child.title.unwrap_or_default();
            match (child.folder_id, child.thread_id) {
                (Some(id), _) => children.push(RemoteNode::folder(id, title)),
                (None, Some(id)) => children.push(RemoteNode::document(id, title)),
                (None, None) => debug!("Skipping folder child without folder_id or thread_id"),
            }
        }

        FolderListing {
            title: self.folder.title,
            children,
        }
    }
}

/// Quip API client.
pub struct QuipClient {
    http: Client,
    api_base: String,
    token: AccessToken,
}

impl QuipClient {
    /// Create a new Quip client.
    ///
    /// # Errors
    /// - The HTTP client cannot be built
    pub fn new(token: AccessToken, config: QuipConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(config.request_timeout)
            .read_timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::InvalidInput(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Get authorization header.
    fn auth_header(&self) -> String {
        format!("Bearer {}", self.token.expose())
    }

    /// Issue an authenticated GET and classify non-success statuses.
    async fn get(&self, path: &str, what: &str) -> Result<Response> {
        let url = format!("{}{}", self.api_base, path);
        debug!("GET {}", url);

        let response = self
            .http
            .get(&url)
            .header(header::AUTHORIZATION, self.auth_header())
            .send()
            .await
            .map_err(|e| transport_error(e, what))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, what, &body))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, what: &str) -> Result<T> {
        let response = self.get(path, what).await?;
        let body = response.bytes().await.map_err(|e| transport_error(e, what))?;
        serde_json::from_slice(&body).map_err(|e| {
            Error::Serialization(format!("Invalid JSON response for {}: {}", what, e))
        })
    }
}

#[async_trait]
impl RemoteDirectory for QuipClient {
    fn name(&self) -> &str {
        "quip"
    }

    async fn list_children(&self, folder_id: &NodeId) -> Result<FolderListing> {
        let what = format!("folder {}", folder_id);
        let response: FolderResponse = self
            .get_json(&format!("/folders/{}", folder_id), &what)
            .await?;
        let listing = response.into_listing();
        debug!(
            "Listed {}: {} children",
            what,
            listing.children.len()
        );
        Ok(listing)
    }

    async fn fetch_metadata(&self, document_id: &NodeId) -> Result<DocumentMetadata> {
        let what = format!("document {}", document_id);
        let response: ThreadResponse = self
            .get_json(&format!("/threads/{}", document_id), &what)
            .await?;
        Ok(DocumentMetadata {
            title: response.thread.title.unwrap_or_default(),
        })
    }

    async fn fetch_export(&self, document_id: &NodeId) -> Result<ExportStream> {
        let what = format!("document {}", document_id);
        let response = self
            .get(&format!("/threads/{}/export/docx", document_id), &what)
            .await?;

        let stream = response
            .bytes_stream()
            .map(move |chunk| chunk.map_err(|e| transport_error(e, &what)));

        Ok(Box::pin(stream))
    }
}

/// Classify a transport-level failure.
fn transport_error(err: reqwest::Error, what: &str) -> Error {
    if err.is_timeout() {
        Error::Timeout(format!("Timeout while fetching {}", what))
    } else if err.is_builder() {
        Error::InvalidInput(format!("Invalid request for {}: {}", what, err))
    } else if err.is_decode() {
        Error::Serialization(format!("Invalid response for {}: {}", what, err))
    } else {
        Error::Network(format!("Network error while fetching {}: {}", what, err))
    }
}

/// Classify a non-success HTTP status.
fn status_error(status: StatusCode, what: &str, body: &str) -> Error {
    let snippet: String = body.chars().take(MAX_BODY_SNIPPET).collect();

    match status {
        StatusCode::UNAUTHORIZED => Error::Authentication(
            "Authentication failed. Please check your access token.".to_string(),
        ),
        StatusCode::FORBIDDEN => {
            Error::NotFound(format!("Access denied to {}. Check permissions.", what))
        }
        StatusCode::NOT_FOUND => Error::NotFound(format!("{} not found", what)),
        StatusCode::TOO_MANY_REQUESTS => {
            Error::RateLimited(format!("Rate limited while fetching {}", what))
        }
        StatusCode::REQUEST_TIMEOUT => {
            Error::Network(format!("Request timeout while fetching {}", what))
        }
        s if s.is_server_error() => Error::Network(format!(
            "Server error while fetching {}: {} - {}",
            what, s, snippet
        )),
        s => Error::Remote(format!(
            "Failed to fetch {}. Status: {} - {}",
            what, s, snippet
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docmirror_common::ErrorKind;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one chunked response that trickles `chunks` four-byte chunks,
    /// `interval` apart.
    async fn trickle_server(chunks: usize, interval: Duration) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    return;
                }
                request.extend_from_slice(&buf[..n]);
            }
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n")
                .await
                .unwrap();
            for _ in 0..chunks {
                tokio::time::sleep(interval).await;
                socket.write_all(b"4\r\nabcd\r\n").await.unwrap();
            }
            socket.write_all(b"0\r\n\r\n").await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_parse_folder_listing() {
        let json = r#"{
            "folder": {"id": "F1", "title": "Team Docs"},
            "children": [
                {"thread_id": "D1"},
                {"folder_id": "F2"},
                {"restricted_folder_id": "F3"},
                {"thread_id": "D2", "title": "Roadmap"}
            ]
        }"#;

        let response: FolderResponse = serde_json::from_str(json).unwrap();
        let listing = response.into_listing();

        assert_eq!(listing.title.as_deref(), Some("Team Docs"));
        assert_eq!(listing.children.len(), 3);
        assert_eq!(listing.children[0], RemoteNode::document("D1", ""));
        assert_eq!(listing.children[1], RemoteNode::folder("F2", ""));
        assert_eq!(listing.children[2], RemoteNode::document("D2", "Roadmap"));
    }

    #[test]
    fn test_parse_empty_folder() {
        let response: FolderResponse = serde_json::from_str("{}").unwrap();
        let listing = response.into_listing();
        assert!(listing.title.is_none());
        assert!(listing.children.is_empty());
    }

    #[test]
    fn test_parse_thread_metadata() {
        let json = r#"{"thread": {"id": "D1", "title": "Report/Q1"}, "html": "<p/>"}"#;
        let response: ThreadResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.thread.title.as_deref(), Some("Report/Q1"));
    }

    #[test]
    fn test_status_classification() {
        let kind = |status: u16| {
            status_error(StatusCode::from_u16(status).unwrap(), "folder F1", "").kind()
        };

        assert_eq!(kind(401), ErrorKind::AuthFailure);
        assert_eq!(kind(403), ErrorKind::NotFound);
        assert_eq!(kind(404), ErrorKind::NotFound);
        assert_eq!(kind(429), ErrorKind::RateLimited);
        assert_eq!(kind(408), ErrorKind::Transient);
        assert_eq!(kind(503), ErrorKind::Transient);
        assert_eq!(kind(400), ErrorKind::Unknown);
    }

    #[test]
    fn test_error_body_is_truncated() {
        let body = "x".repeat(10_000);
        let err = status_error(StatusCode::BAD_REQUEST, "folder F1", &body);
        assert!(err.to_string().len() < 400);
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let token = AccessToken::new("token").unwrap();
        let config = QuipConfig {
            api_base: "https://platform.quip.com/1/".to_string(),
            ..QuipConfig::default()
        };
        let client = QuipClient::new(token, config).unwrap();
        assert_eq!(client.api_base, DEFAULT_API_BASE);
        assert_eq!(client.name(), "quip");
    }

    #[tokio::test]
    async fn test_slow_export_outlives_request_timeout() {
        let api_base = trickle_server(10, Duration::from_millis(100)).await;
        let config = QuipConfig {
            api_base,
            request_timeout: Duration::from_millis(300),
        };
        let client = QuipClient::new(AccessToken::new("token").unwrap(), config).unwrap();

        let mut stream = client.fetch_export(&NodeId::new("D1")).await.unwrap();
        let mut data = Vec::new();
        while let Some(chunk) = stream.next().await {
            data.extend_from_slice(&chunk.unwrap());
        }

        assert_eq!(data, b"abcd".repeat(10));
    }
}
