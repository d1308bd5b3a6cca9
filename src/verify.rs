//! Branch verification against the local installation.
//!
//! Every manifest entry is checked independently: absent files are
//! `Missing`, present files are hashed and compared case-insensitively.
//! Entries are hashed in parallel on a bounded rayon pool; the report keeps
//! manifest order.
//!
//! # Verification Flow
//!
//! 1. Resolve `install_root/path` for each entry
//! 2. Absent (including a lone `.bak` left by an interrupted swap) -> Missing
//! 3. Present -> SHA-1 -> Ok or ChecksumMismatch
//! 4. Unreadable files are reported as ChecksumMismatch with the error

use rayon::prelude::*;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, warn};

use crate::hash;
use crate::manifest::{FileEntry, Manifest};
use crate::paths;
use crate::status::Status;

/// Outcome for one manifest entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    Ok,
    Missing,
    ChecksumMismatch,
}

/// Result of checking a single entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCheck {
    /// Path as written in the manifest
    pub path: String,
    pub outcome: FileOutcome,
    /// Digest of the local file, when it could be computed
    pub actual_checksum: Option<String>,
    /// Read error, when hashing failed
    pub error: Option<String>,
}

impl FileCheck {
    pub fn is_ok(&self) -> bool {
        self.outcome == FileOutcome::Ok
    }
}

/// One verification pass, in manifest order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationReport {
    pub results: Vec<FileCheck>,
}

impl VerificationReport {
    /// No missing and no mismatched files
    pub fn is_up_to_date(&self) -> bool {
        self.results.iter().all(FileCheck::is_ok)
    }

    /// Paths that are missing or differ, in manifest order
    pub fn outdated_paths(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| !r.is_ok())
            .map(|r| r.path.as_str())
            .collect()
    }

    pub fn outcomes(&self) -> Vec<FileOutcome> {
        self.results.iter().map(|r| r.outcome).collect()
    }

    pub fn count(&self, outcome: FileOutcome) -> usize {
        self.results.iter().filter(|r| r.outcome == outcome).count()
    }

    /// Status to report for this pass
    pub fn status(&self) -> Status {
        if self.is_up_to_date() {
            Status::UpToDate
        } else {
            Status::BranchOutdated
        }
    }
}

/// Verification options
#[derive(Debug, Clone, Default)]
pub struct VerifyOptions {
    /// Worker threads for hashing (None = rayon's global pool)
    pub threads: Option<usize>,
}

/// Verify a manifest against an install root using the global rayon pool.
pub fn verify_branch(manifest: &Manifest, install_root: &Path) -> VerificationReport {
    verify_branch_with(manifest, install_root, &VerifyOptions::default(), None)
}

/// Verify a manifest with explicit options.
///
/// `progress` is called with (checked, total) as entries finish, in
/// completion order.
pub fn verify_branch_with(
    manifest: &Manifest,
    install_root: &Path,
    options: &VerifyOptions,
    progress: Option<&(dyn Fn(usize, usize) + Sync)>,
) -> VerificationReport {
    let total = manifest.len();
    let checked = AtomicUsize::new(0);

    let run = || -> Vec<FileCheck> {
        manifest
            .files()
            .par_iter()
            .map(|entry| {
                let result = verify_entry(entry, install_root);
                let done = checked.fetch_add(1, Ordering::Relaxed) + 1;
                if let Some(cb) = progress {
                    cb(done, total);
                }
                result
            })
            .collect()
    };

    let results = match options.threads {
        Some(threads) => match rayon::ThreadPoolBuilder::new().num_threads(threads.max(1)).build() {
            Ok(pool) => pool.install(run),
            Err(e) => {
                warn!("Could not build verification pool ({}), using global pool", e);
                run()
            }
        },
        None => run(),
    };

    let report = VerificationReport { results };
    info!(
        "Verified {} files: {} ok, {} missing, {} mismatched",
        total,
        report.count(FileOutcome::Ok),
        report.count(FileOutcome::Missing),
        report.count(FileOutcome::ChecksumMismatch)
    );
    report
}

/// Check a single entry against the install root.
pub fn verify_entry(entry: &FileEntry, install_root: &Path) -> FileCheck {
    let live = paths::resolve(install_root, &entry.path);

    if std::fs::symlink_metadata(&live).is_err() {
        if paths::backup_path(&live).exists() {
            warn!(
                "{} is missing but a backup exists (interrupted update?)",
                entry.path
            );
        }
        return FileCheck {
            path: entry.path.clone(),
            outcome: FileOutcome::Missing,
            actual_checksum: None,
            error: None,
        };
    }

    match hash::compute_file_checksum(&live) {
        Ok(actual) => {
            let outcome = if hash::checksums_match(&actual, &entry.checksum) {
                FileOutcome::Ok
            } else {
                debug!("Checksum mismatch: {} (expected {}, got {})", entry.path, entry.checksum, actual);
                FileOutcome::ChecksumMismatch
            };
            FileCheck {
                path: entry.path.clone(),
                outcome,
                actual_checksum: Some(actual),
                error: None,
            }
        }
        Err(e) => {
            warn!("Could not hash {}: {}", entry.path, e);
            FileCheck {
                path: entry.path.clone(),
                outcome: FileOutcome::ChecksumMismatch,
                actual_checksum: None,
                error: Some(e.to_string()),
            }
        }
    }
}
