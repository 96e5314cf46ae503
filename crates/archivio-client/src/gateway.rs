//! File-storage gateway client.
//!
//! The gateway fronts every storage provider behind one HTTP API. The
//! archiver uses two endpoints: `GET /metadata` to list a folder and
//! `POST /ops/copy` to copy a provider's root into the archive provider.

use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use archivio_common::config::GatewayConfig;
use archivio_common::filetree::FileEntry;
use archivio_common::types::{NodeId, Provider};
use archivio_common::{Error, Result};

/// Gateway metadata response
#[derive(Debug, Deserialize)]
struct MetadataResponse {
    data: Vec<FileEntry>,
}

/// Error body the gateway attaches to failed copies
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<String>,
}

/// One side of a copy request
#[derive(Debug, Clone, Serialize)]
pub struct CopySide {
    pub cookie: String,
    pub nid: String,
    pub provider: String,
    pub path: String,
}

/// Copy request payload
#[derive(Debug, Clone, Serialize)]
pub struct CopyRequest {
    pub source: CopySide,
    pub destination: CopySide,
    pub rename: String,
}

impl CopyRequest {
    /// Copy a provider's root folder into the archive provider on the
    /// registration, renamed to the archive folder name.
    #[must_use]
    pub fn root_copy(
        cookie: &str,
        source_nid: &str,
        source_provider: &Provider,
        destination_nid: &str,
        destination_provider: &Provider,
        rename: impl Into<String>,
    ) -> Self {
        Self {
            source: CopySide {
                cookie: cookie.to_string(),
                nid: source_nid.to_string(),
                provider: source_provider.to_string(),
                path: "/".to_string(),
            },
            destination: CopySide {
                cookie: cookie.to_string(),
                nid: destination_nid.to_string(),
                provider: destination_provider.to_string(),
                path: "/".to_string(),
            },
            rename: rename.into(),
        }
    }
}

/// Outcome of a copy request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyOutcome {
    /// Copy finished synchronously
    Done,
    /// Gateway accepted the copy and will confirm through the callback
    Accepted,
    /// Gateway refused or failed the copy
    Rejected { status: u16, errors: Vec<String> },
}

/// HTTP client for the file-storage gateway
pub struct GatewayClient {
    base_url: String,
    client: reqwest::Client,
    max_concurrent: usize,
}

impl GatewayClient {
    /// Create a new gateway client
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| Error::Configuration(e.to_string()))?;

        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            client,
            max_concurrent: config.max_concurrent_requests.max(1),
        })
    }

    /// List the children of one folder on a provider.
    pub async fn get_metadata(
        &self,
        provider: &Provider,
        nid: &NodeId,
        cookie: &str,
        path: &str,
    ) -> Result<Vec<FileEntry>> {
        let url = format!("{}/metadata", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("provider", provider.as_str()),
                ("path", path),
                ("nid", nid.as_str()),
                ("cookie", cookie),
                ("view_only", "true"),
            ])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout
                } else {
                    Error::ConnectionFailed(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::GatewayResponse {
                status,
                message: body,
            });
        }

        let metadata: MetadataResponse = response
            .json()
            .await
            .map_err(|e| Error::Decode(e.to_string()))?;
        Ok(metadata.data)
    }

    /// Assemble the full file tree of a provider, starting from its root.
    ///
    /// Metadata is only ever requested for folders; file entries are taken
    /// from their parent folder's listing. Folders at the same depth are
    /// fetched concurrently, bounded by the configured request limit.
    pub async fn get_file_tree(
        &self,
        provider: &Provider,
        nid: &NodeId,
        cookie: &str,
    ) -> Result<FileEntry> {
        let mut root = FileEntry::root();
        let mut frontier = vec![root.path.clone()];

        while !frontier.is_empty() {
            let fetches: Vec<_> = frontier
                .drain(..)
                .map(|path| async move {
                    let children = self.get_metadata(provider, nid, cookie, &path).await?;
                    Ok::<_, Error>((path, children))
                })
                .collect();

            let mut results: Vec<(String, Vec<FileEntry>)> = stream::iter(fetches)
                .buffer_unordered(self.max_concurrent)
                .try_collect()
                .await?;
            results.sort_by(|a, b| a.0.cmp(&b.0));

            for (path, children) in results {
                for child in &children {
                    if child.is_folder() {
                        frontier.push(child.path.clone());
                    }
                }
                if let Some(folder) = find_folder_mut(&mut root, &path) {
                    folder.children = children;
                }
            }
        }

        debug!(
            "Assembled file tree for provider {} on node {}",
            provider, nid
        );
        Ok(root)
    }

    /// Request a copy through the gateway.
    ///
    /// Gateway-side refusals come back as [`CopyOutcome::Rejected`] rather
    /// than an error; only transport problems fail the call.
    pub async fn copy(&self, request: &CopyRequest) -> Result<CopyOutcome> {
        let url = format!("{}/ops/copy", self.base_url);
        debug!(
            "Requesting copy of {} from node {} into {}",
            request.source.provider, request.source.nid, request.destination.provider
        );

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout
                } else {
                    Error::ConnectionFailed(e.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::ACCEPTED {
            return Ok(CopyOutcome::Accepted);
        }
        if status.is_success() {
            return Ok(CopyOutcome::Done);
        }

        let body = response.text().await.unwrap_or_default();
        Ok(CopyOutcome::Rejected {
            status: status.as_u16(),
            errors: parse_error_body(&body),
        })
    }

    pub async fn health_check(&self) -> bool {
        let url = format!("{}/status", self.base_url);

        self.client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

/// Find the folder with an exact path anywhere in the tree.
fn find_folder_mut<'a>(node: &'a mut FileEntry, path: &str) -> Option<&'a mut FileEntry> {
    if node.path == path && node.is_folder() {
        return Some(node);
    }
    node.children
        .iter_mut()
        .find_map(|child| find_folder_mut(child, path))
}

fn parse_error_body(body: &str) -> Vec<String> {
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        if !parsed.errors.is_empty() {
            return parsed.errors;
        }
    }
    if body.is_empty() {
        Vec::new()
    } else {
        vec![body.to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use archivio_common::stat::aggregate_file_tree;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(uri: &str) -> GatewayClient {
        GatewayClient::new(&GatewayConfig {
            url: uri.to_string(),
            timeout_ms: 5_000,
            max_concurrent_requests: 4,
        })
        .unwrap()
    }

    fn node() -> NodeId {
        NodeId::new("node1234").unwrap()
    }

    fn dropbox() -> Provider {
        Provider::new("dropbox").unwrap()
    }

    #[tokio::test]
    async fn test_get_metadata_parses_children() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/metadata"))
            .and(query_param("provider", "dropbox"))
            .and(query_param("path", "/"))
            .and(query_param("nid", "node1234"))
            .and(query_param("view_only", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    {"path": "/1234567", "name": "Afile.file", "kind": "file", "size": "128"},
                    {"path": "/qwerty", "name": "A Folder", "kind": "folder"}
                ]
            })))
            .mount(&mock_server)
            .await;

        let client = test_client(&mock_server.uri());
        let children = client
            .get_metadata(&dropbox(), &node(), "cookie", "/")
            .await
            .unwrap();

        assert_eq!(children.len(), 2);
        assert_eq!(children[0].size, Some(128));
        assert!(children[1].is_folder());
    }

    #[tokio::test]
    async fn test_get_metadata_error_status() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/metadata"))
            .respond_with(ResponseTemplate::new(502).set_body_string("upstream broken"))
            .mount(&mock_server)
            .await;

        let client = test_client(&mock_server.uri());
        let err = client
            .get_metadata(&dropbox(), &node(), "cookie", "/")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::GatewayResponse { status: 502, .. }));
    }

    #[tokio::test]
    async fn test_get_file_tree_fetches_folders_only() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/metadata"))
            .and(query_param("path", "/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    {"path": "/1234567", "name": "Afile.file", "kind": "file", "size": "128"},
                    {"path": "/qwerty", "name": "A Folder", "kind": "folder"}
                ]
            })))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/metadata"))
            .and(query_param("path", "/qwerty"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    {"path": "/qwerty/asdfgh", "name": "coolphoto.png", "kind": "file", "size": "256"}
                ]
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = test_client(&mock_server.uri());
        let tree = client
            .get_file_tree(&dropbox(), &node(), "cookie")
            .await
            .unwrap();

        assert_eq!(tree.children.len(), 2);
        let folder = tree.children.iter().find(|c| c.is_folder()).unwrap();
        assert_eq!(folder.children.len(), 1);
        assert_eq!(folder.children[0].size, Some(256));

        // Only the two folders were listed, never the files
        let result = aggregate_file_tree(&dropbox(), &tree);
        assert_eq!(result.disk_usage, 384);
        assert_eq!(result.num_files, 2);
    }

    #[tokio::test]
    async fn test_copy_done_on_200() {
        let mock_server = MockServer::start().await;
        // Matches the full root-copy payload, so a drifting field fails here
        Mock::given(method("POST"))
            .and(path("/ops/copy"))
            .and(body_partial_json(json!({
                "source": {
                    "cookie": "cookie",
                    "nid": "node1234",
                    "provider": "dropbox",
                    "path": "/",
                },
                "destination": {
                    "cookie": "cookie",
                    "nid": "regabc12",
                    "provider": "archivestore",
                    "path": "/",
                },
                "rename": "Archive of Dropbox",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "done"})))
            .mount(&mock_server)
            .await;

        let client = test_client(&mock_server.uri());
        let request = CopyRequest::root_copy(
            "cookie",
            "node1234",
            &dropbox(),
            "regabc12",
            &Provider::new("archivestore").unwrap(),
            "Archive of Dropbox",
        );
        let outcome = client.copy(&request).await.unwrap();
        assert_eq!(outcome, CopyOutcome::Done);
    }

    #[tokio::test]
    async fn test_copy_accepted_on_202() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ops/copy"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&mock_server)
            .await;

        let client = test_client(&mock_server.uri());
        let request = CopyRequest::root_copy(
            "cookie",
            "node1234",
            &dropbox(),
            "regabc12",
            &Provider::new("archivestore").unwrap(),
            "Archive of Dropbox",
        );
        let outcome = client.copy(&request).await.unwrap();
        assert_eq!(outcome, CopyOutcome::Accepted);
    }

    #[tokio::test]
    async fn test_copy_rejected_collects_errors() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ops/copy"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({"errors": ["bad path"]})),
            )
            .mount(&mock_server)
            .await;

        let client = test_client(&mock_server.uri());
        let request = CopyRequest::root_copy(
            "cookie",
            "node1234",
            &dropbox(),
            "regabc12",
            &Provider::new("archivestore").unwrap(),
            "Archive of Dropbox",
        );
        let outcome = client.copy(&request).await.unwrap();
        assert_eq!(
            outcome,
            CopyOutcome::Rejected {
                status: 400,
                errors: vec!["bad path".to_string()]
            }
        );
    }

    #[tokio::test]
    async fn test_copy_rejected_non_json_body() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ops/copy"))
            .respond_with(ResponseTemplate::new(500).set_body_string("gateway exploded"))
            .mount(&mock_server)
            .await;

        let client = test_client(&mock_server.uri());
        let request = CopyRequest::root_copy(
            "cookie",
            "node1234",
            &dropbox(),
            "regabc12",
            &Provider::new("archivestore").unwrap(),
            "Archive of Dropbox",
        );
        let outcome = client.copy(&request).await.unwrap();
        assert_eq!(
            outcome,
            CopyOutcome::Rejected {
                status: 500,
                errors: vec!["gateway exploded".to_string()]
            }
        );
    }

    #[tokio::test]
    async fn test_health_check() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;

        let client = test_client(&mock_server.uri());
        assert!(client.health_check().await);
    }
}
