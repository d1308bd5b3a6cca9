//! Branch manifest model
//!
//! A manifest describes one branch of the game build: the ordered list of
//! files that make up an installation, each with its expected SHA-1, plus
//! the launch arguments the branch expects. Manifests are fetched fresh for
//! every verification or update and never persisted.

pub mod fetch;
pub mod listing;

pub use fetch::{fetch_manifest, BranchEndpoint};
pub use listing::{parse_listing, BulkDescriptor, ListedFile};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

use crate::error::{SyncError, SyncResult};
use crate::hash;
use crate::paths;

/// One file of a branch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Path relative to the install root (may use `\` separators)
    #[serde(alias = "relativePath")]
    pub path: String,
    /// Expected SHA-1, hex, any case
    #[serde(alias = "hash")]
    pub checksum: String,
    /// Expected size in bytes (0 when the server does not publish it)
    #[serde(default, alias = "sizeBytes")]
    pub size: u64,
}

impl FileEntry {
    pub fn new(path: impl Into<String>, checksum: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            checksum: checksum.into(),
            size,
        }
    }
}

/// Command-line argument the game should be launched with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchArgument {
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub description: String,
}

/// A branch manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    branch: String,
    files: Vec<FileEntry>,
    arguments: Vec<LaunchArgument>,
}

impl Manifest {
    /// Build a manifest, enforcing that every path is a safe relative path,
    /// every checksum is a SHA-1 hex digest, and no path appears twice.
    pub fn new(
        branch: impl Into<String>,
        files: Vec<FileEntry>,
        arguments: Vec<LaunchArgument>,
    ) -> SyncResult<Self> {
        let mut seen = HashSet::with_capacity(files.len());

        for (index, entry) in files.iter().enumerate() {
            paths::validate_relative(&entry.path).map_err(|reason| {
                SyncError::ManifestMalformed(format!("entry {}: {}", index, reason))
            })?;

            if !hash::is_valid_checksum(&entry.checksum) {
                return Err(SyncError::ManifestMalformed(format!(
                    "entry {} ({}): checksum '{}' is not a SHA-1 hex digest",
                    index, entry.path, entry.checksum
                )));
            }

            if !seen.insert(paths::normalize_for_lookup(&entry.path)) {
                return Err(SyncError::ManifestMalformed(format!(
                    "duplicate path: {}",
                    entry.path
                )));
            }
        }

        Ok(Self {
            branch: branch.into(),
            files,
            arguments,
        })
    }

    /// Parse the JSON served for a branch.
    ///
    /// Accepts either a bare array of file entries or an object with a
    /// `files` array and optional `branch` and `arguments`. `branch` is used
    /// when the document does not name its own branch.
    pub fn from_json(branch: &str, body: &[u8]) -> SyncResult<Self> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| SyncError::ManifestMalformed(format!("invalid JSON: {}", e)))?;

        match value {
            Value::Array(items) => Self::new(branch, parse_entries(items)?, Vec::new()),
            Value::Object(mut doc) => {
                let files = match doc.remove("files") {
                    Some(Value::Array(items)) => parse_entries(items)?,
                    Some(_) => {
                        return Err(SyncError::ManifestMalformed(
                            "`files` is not an array".to_string(),
                        ))
                    }
                    None => {
                        return Err(SyncError::ManifestMalformed(
                            "missing field `files`".to_string(),
                        ))
                    }
                };

                let arguments = match doc.remove("arguments") {
                    Some(Value::Null) | None => Vec::new(),
                    Some(v) => serde_json::from_value(v).map_err(|e| {
                        SyncError::ManifestMalformed(format!("invalid arguments: {}", e))
                    })?,
                };

                let branch = match doc.remove("branch") {
                    Some(Value::String(b)) if !b.is_empty() => b,
                    _ => branch.to_string(),
                };

                Self::new(branch, files, arguments)
            }
            _ => Err(SyncError::ManifestMalformed(
                "expected an array or object".to_string(),
            )),
        }
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// Files in manifest order
    pub fn files(&self) -> &[FileEntry] {
        &self.files
    }

    pub fn arguments(&self) -> &[LaunchArgument] {
        &self.arguments
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Look up an entry by path (separator and case insensitive)
    pub fn entry(&self, path: &str) -> Option<&FileEntry> {
        let wanted = paths::normalize_for_lookup(path);
        self.files
            .iter()
            .find(|e| paths::normalize_for_lookup(&e.path) == wanted)
    }

    /// Sum of published file sizes
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|e| e.size).sum()
    }
}

fn parse_entries(items: Vec<Value>) -> SyncResult<Vec<FileEntry>> {
    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            serde_json::from_value::<FileEntry>(item)
                .map_err(|e| SyncError::ManifestMalformed(format!("entry {}: {}", index, e)))
        })
        .collect()
}
