//! HTTP client with stall detection and progress tracking

use futures::StreamExt;
use std::path::Path;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::FileSource;
use crate::error::{SyncError, SyncResult};

/// Stall detection: fail if no data arrives for this duration.
const STALL_TIMEOUT: Duration = Duration::from_secs(120);

/// Connection timeout: time to establish TCP connection
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Read timeout: maximum time to wait for data between chunks
const READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Overall timeout for small documents (manifests, descriptors)
const DOCUMENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Build-server client backed by reqwest
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new() -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("branchsync/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(READ_TIMEOUT)
            .build()
            .map_err(|e| SyncError::network("<client>", format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    async fn get(&self, url: &str, timeout: Option<Duration>) -> SyncResult<reqwest::Response> {
        let mut request = self.client.get(url);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SyncError::network(url, format!("connection failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::network(
                url,
                format!("HTTP {} - {}", status.as_u16(), truncate_error(&body)),
            ));
        }

        Ok(response)
    }
}

impl FileSource for HttpClient {
    async fn fetch(&self, url: &str) -> SyncResult<Vec<u8>> {
        debug!("GET {}", truncate_url(url));
        let response = self.get(url, Some(DOCUMENT_TIMEOUT)).await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| SyncError::network(url, format!("failed to read body: {}", e)))?;
        Ok(body.to_vec())
    }

    async fn download_to(
        &self,
        url: &str,
        dest: &Path,
        progress: &mut (dyn FnMut(u64) + Send),
    ) -> SyncResult<u64> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SyncError::io(parent, e))?;
        }

        debug!("Downloading {} -> {}", truncate_url(url), dest.display());
        let response = self.get(url, None).await?;

        let mut file = File::create(dest).await.map_err(|e| SyncError::io(dest, e))?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        loop {
            let next = match tokio::time::timeout(STALL_TIMEOUT, stream.next()).await {
                Ok(next) => next,
                Err(_) => {
                    warn!("Download stalled - no data for {}s: {}", STALL_TIMEOUT.as_secs(), truncate_url(url));
                    return Err(SyncError::network(
                        url,
                        format!("stalled: no data for {}s", STALL_TIMEOUT.as_secs()),
                    ));
                }
            };

            let Some(chunk) = next else { break };
            let chunk = chunk.map_err(|e| SyncError::network(url, format!("failed to read chunk: {}", e)))?;
            file.write_all(&chunk).await.map_err(|e| SyncError::io(dest, e))?;
            written += chunk.len() as u64;
            progress(written);
        }

        file.flush().await.map_err(|e| SyncError::io(dest, e))?;
        Ok(written)
    }
}

/// Truncate URL for log and error messages
pub fn truncate_url(url: &str) -> String {
    if url.chars().count() > 80 {
        let head: String = url.chars().take(77).collect();
        format!("{}...", head)
    } else {
        url.to_string()
    }
}

/// Truncate error body for display
fn truncate_error(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() > 100 {
        let head: String = trimmed.chars().take(97).collect();
        format!("{}...", head)
    } else if trimmed.is_empty() {
        "No details".to_string()
    } else {
        trimmed.to_string()
    }
}
