//! Bulk download descriptor and file listing.
//!
//! A fresh install is driven by a descriptor JSON
//! (`{"manifest": <url>, "filedirectory": <url>}`) that points at a plain
//! text listing. The listing's first line is a header; every other line is
//! `name:<ignored>:totalBytes`. A line whose first field is `f` ends the list.

use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};
use crate::paths;

/// First field of the end-of-list sentinel line
const END_SENTINEL: &str = "f";

/// Where the bulk listing and its files live
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkDescriptor {
    #[serde(rename = "manifest")]
    pub manifest_url: String,
    #[serde(rename = "filedirectory")]
    pub file_base_url: String,
}

impl BulkDescriptor {
    pub fn from_json(body: &[u8]) -> SyncResult<Self> {
        serde_json::from_slice(body)
            .map_err(|e| SyncError::ManifestMalformed(format!("invalid descriptor: {}", e)))
    }

    pub fn file_url(&self, name: &str) -> String {
        paths::join_url(&self.file_base_url, name)
    }
}

/// One file named by the bulk listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedFile {
    pub name: String,
    pub total_bytes: u64,
}

/// Parse a bulk listing.
///
/// Blank lines are skipped. The sentinel stops parsing and is not an error.
pub fn parse_listing(text: &str) -> SyncResult<Vec<ListedFile>> {
    let mut files = Vec::new();

    for (line_no, raw) in text.split('\n').enumerate().skip(1) {
        let line = raw.trim_end_matches('\r').trim();
        if line.is_empty() {
            continue;
        }

        if line.split(':').next() == Some(END_SENTINEL) {
            break;
        }

        // Split from the right so a name containing ':' survives
        let mut fields = line.rsplitn(3, ':');
        let (size_field, name) = match (fields.next(), fields.next(), fields.next()) {
            (Some(size), Some(_ignored), Some(name)) => (size, name),
            _ => {
                return Err(SyncError::ManifestMalformed(format!(
                    "listing line {}: expected name:*:bytes, got '{}'",
                    line_no + 1,
                    line
                )))
            }
        };

        let total_bytes = size_field.trim().parse::<u64>().map_err(|e| {
            SyncError::ManifestMalformed(format!(
                "listing line {}: invalid size '{}': {}",
                line_no + 1,
                size_field,
                e
            ))
        })?;

        paths::validate_relative(name).map_err(|reason| {
            SyncError::ManifestMalformed(format!("listing line {}: {}", line_no + 1, reason))
        })?;

        files.push(ListedFile {
            name: name.to_string(),
            total_bytes,
        });
    }

    Ok(files)
}
