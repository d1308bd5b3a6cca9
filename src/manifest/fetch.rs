//! Remote branch manifest fetching.
//!
//! Builds are served under `https://builds.<host>/<branch>/`; the manifest
//! lives at `manifest.json` in that directory and every file at its
//! manifest path. No retry happens here; the caller decides.

use tracing::{debug, info};

use super::Manifest;
use crate::downloaders::FileSource;
use crate::error::{SyncError, SyncResult};
use crate::paths;

/// Name of the manifest document inside a branch directory
pub const MANIFEST_FILE: &str = "manifest.json";

/// Where a build server publishes its branches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchEndpoint {
    base_url: String,
}

impl BranchEndpoint {
    /// `https://builds.<host>`
    pub fn for_host(host: &str) -> Self {
        Self {
            base_url: format!("https://builds.{}", host.trim_matches('/')),
        }
    }

    /// Explicit base URL, for mirrors
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn branch_url(&self, branch: &str) -> String {
        paths::join_url(&self.base_url, branch)
    }

    pub fn manifest_url(&self, branch: &str) -> String {
        paths::join_url(&self.branch_url(branch), MANIFEST_FILE)
    }

    pub fn file_url(&self, branch: &str, relative_path: &str) -> String {
        paths::join_url(&self.branch_url(branch), relative_path)
    }
}

/// Fetch and parse the manifest of a branch.
///
/// Transport failures and non-2xx responses become `ManifestUnavailable`;
/// a body that does not describe a manifest becomes `ManifestMalformed`.
pub async fn fetch_manifest<S: FileSource>(
    source: &S,
    endpoint: &BranchEndpoint,
    branch: &str,
) -> SyncResult<Manifest> {
    let url = endpoint.manifest_url(branch);
    debug!("Fetching manifest: {}", url);

    let body = source.fetch(&url).await.map_err(|e| match e {
        SyncError::Network { url, reason } => SyncError::ManifestUnavailable { url, reason },
        other => other,
    })?;

    let manifest = Manifest::from_json(branch, &body)?;
    info!(
        "Manifest for branch '{}': {} files, {} bytes",
        manifest.branch(),
        manifest.len(),
        manifest.total_bytes()
    );
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloaders::MemorySource;

    #[test]
    fn test_endpoint_urls() {
        let endpoint = BranchEndpoint::for_host("example.com");
        assert_eq!(endpoint.base_url(), "https://builds.example.com");
        assert_eq!(
            endpoint.manifest_url("release"),
            "https://builds.example.com/release/manifest.json"
        );
        assert_eq!(
            endpoint.file_url("release", "Binaries\\Win64\\Game.exe"),
            "https://builds.example.com/release/Binaries/Win64/Game.exe"
        );

        let mirror = BranchEndpoint::with_base_url("http://mirror.local/builds/");
        assert_eq!(mirror.manifest_url("beta"), "http://mirror.local/builds/beta/manifest.json");
    }

    #[tokio::test]
    async fn test_fetch_manifest_ok() {
        let endpoint = BranchEndpoint::with_base_url("http://mirror");
        let source = MemorySource::new().with_file(
            "http://mirror/release/manifest.json",
            br#"[{"path":"a.txt","checksum":"a9993e364706816aba3e25717850c26c9cd0d89d","size":3}]"#
                .to_vec(),
        );

        let manifest = fetch_manifest(&source, &endpoint, "release").await.unwrap();
        assert_eq!(manifest.len(), 1);
        assert_eq!(source.request_count("http://mirror/release/manifest.json"), 1);
    }

    #[tokio::test]
    async fn test_fetch_manifest_unavailable() {
        let endpoint = BranchEndpoint::with_base_url("http://mirror");
        let source = MemorySource::new();

        let err = fetch_manifest(&source, &endpoint, "release").await.unwrap_err();
        assert!(matches!(err, SyncError::ManifestUnavailable { .. }));
        // No retry at this layer
        assert_eq!(source.request_count("http://mirror/release/manifest.json"), 1);
    }

    #[tokio::test]
    async fn test_fetch_manifest_malformed() {
        let endpoint = BranchEndpoint::with_base_url("http://mirror");
        let source = MemorySource::new()
            .with_file("http://mirror/release/manifest.json", b"{\"oops\":1}".to_vec());

        let err = fetch_manifest(&source, &endpoint, "release").await.unwrap_err();
        assert!(matches!(err, SyncError::ManifestMalformed(_)));
    }
}
