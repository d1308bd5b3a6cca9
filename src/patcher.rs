//! Patch application for an existing installation.
//!
//! Each manifest file runs through its own lifecycle before the next one
//! starts:
//!
//! ```text
//! Start -> Verified (skip)
//!       -> NeedsUpdate -> Downloading -> Downloaded -> ChecksumChecked
//!          -> BackedUp -> Swapped -> Done
//! ```
//!
//! A failure at any stage (`DownloadFailed`, `AccessBlocked`,
//! `ChecksumFailed`) ends that file's lifecycle, is recorded, and the run
//! moves on. The live file is never written directly: content lands in
//! `X.download`, the old file moves to `X.bak`, then `X.download` is renamed
//! into place. At most one run per install root is supported; nothing here
//! takes a lock to enforce that.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::access::{self, Accessibility};
use crate::downloaders::{with_retry, FileSource, PATCH_DOWNLOAD_ATTEMPTS, RETRY_DELAY};
use crate::error::{SyncError, SyncResult};
use crate::hash;
use crate::manifest::{BranchEndpoint, FileEntry, Manifest};
use crate::paths;
use crate::status::{NullSink, Status, StatusSink};

/// Where a file is in its update lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchStage {
    Start,
    /// Local file already matched; nothing downloaded
    Verified,
    NeedsUpdate,
    Downloading,
    Downloaded,
    ChecksumChecked,
    BackedUp,
    Swapped,
    /// Updated file is live
    Done,
}

/// Terminal failure for one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    DownloadFailed,
    ChecksumFailed,
    AccessBlocked,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::DownloadFailed => "download failed",
            FailureKind::ChecksumFailed => "checksum failed",
            FailureKind::AccessBlocked => "access blocked",
        };
        f.write_str(s)
    }
}

/// Why a file could not be updated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
    pub kind: FailureKind,
    /// Last stage reached before failing
    pub stage: PatchStage,
    pub reason: String,
}

/// Final state of one file after a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePatchResult {
    pub path: String,
    /// `Verified` or `Done` on success, the stage reached otherwise
    pub stage: PatchStage,
    pub failure: Option<FileFailure>,
}

impl FilePatchResult {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

/// Result of a whole patch run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchOutcome {
    pub succeeded: bool,
    /// Paths that could not be updated, in manifest order
    pub failed_paths: Vec<String>,
    /// Reason of the last failure
    pub reason: Option<String>,
    /// Per-file results, in manifest order
    pub files: Vec<FilePatchResult>,
}

impl PatchOutcome {
    /// Every failure reason, in manifest order
    pub fn reasons(&self) -> Vec<String> {
        self.files
            .iter()
            .filter_map(|f| f.failure.as_ref().map(|fail| format!("{}: {}", f.path, fail.reason)))
            .collect()
    }

    /// Files that were downloaded and swapped in
    pub fn updated(&self) -> usize {
        self.files.iter().filter(|f| f.stage == PatchStage::Done).count()
    }

    /// Files that already matched
    pub fn verified(&self) -> usize {
        self.files.iter().filter(|f| f.stage == PatchStage::Verified).count()
    }

    pub fn status(&self) -> Status {
        match (&self.reason, self.succeeded) {
            (_, true) => Status::Completed,
            (Some(reason), false) => Status::Error(reason.clone()),
            (None, false) => Status::Error("patch failed".to_string()),
        }
    }
}

/// Tracks one file through the lifecycle and logs each transition
struct Lifecycle<'a> {
    path: &'a str,
    stage: PatchStage,
}

impl<'a> Lifecycle<'a> {
    fn new(path: &'a str) -> Self {
        Self {
            path,
            stage: PatchStage::Start,
        }
    }

    fn advance(&mut self, next: PatchStage) {
        debug!(path = self.path, from = ?self.stage, to = ?next, "patch stage");
        self.stage = next;
    }

    fn finish(mut self, last: PatchStage) -> FilePatchResult {
        self.advance(last);
        FilePatchResult {
            path: self.path.to_string(),
            stage: self.stage,
            failure: None,
        }
    }

    fn fail(self, kind: FailureKind, reason: impl Into<String>) -> FilePatchResult {
        let reason = reason.into();
        warn!("{} ({}): {}", self.path, kind, reason);
        FilePatchResult {
            path: self.path.to_string(),
            stage: self.stage,
            failure: Some(FileFailure {
                kind,
                stage: self.stage,
                reason,
            }),
        }
    }
}

/// Applies a branch manifest to an install root
pub struct Patcher<'a, S: FileSource> {
    source: &'a S,
    endpoint: BranchEndpoint,
    sink: &'a dyn StatusSink,
    download_attempts: u32,
    retry_delay: Duration,
    probe: fn(&Path) -> Accessibility,
}

impl<'a, S: FileSource> Patcher<'a, S> {
    pub fn new(source: &'a S, endpoint: BranchEndpoint) -> Self {
        Self {
            source,
            endpoint,
            sink: &NullSink,
            download_attempts: PATCH_DOWNLOAD_ATTEMPTS,
            retry_delay: RETRY_DELAY,
            probe: access::probe,
        }
    }

    /// Report progress and the final status to `sink`
    pub fn with_status(mut self, sink: &'a dyn StatusSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Replace the accessibility check run before each rename
    pub fn with_probe(mut self, probe: fn(&Path) -> Accessibility) -> Self {
        self.probe = probe;
        self
    }

    /// Update every file of `manifest` under `install_root`, one at a time.
    ///
    /// Per-file failures are collected; the run always visits every entry.
    pub async fn apply(&self, manifest: &Manifest, install_root: &Path) -> PatchOutcome {
        info!(
            "Patching branch '{}' ({} files) in {}",
            manifest.branch(),
            manifest.len(),
            install_root.display()
        );

        let mut outcome = PatchOutcome::default();

        for entry in manifest.files() {
            let result = self.patch_file(manifest, entry, install_root).await;
            if let Some(failure) = &result.failure {
                outcome.failed_paths.push(result.path.clone());
                outcome.reason = Some(format!("{}: {}", result.path, failure.reason));
            }
            outcome.files.push(result);
        }

        outcome.succeeded = outcome.failed_paths.is_empty();
        info!(
            "Patch finished: {} updated, {} already current, {} failed",
            outcome.updated(),
            outcome.verified(),
            outcome.failed_paths.len()
        );

        self.sink.emit(outcome.status());
        outcome
    }

    /// Run one file through its lifecycle.
    pub async fn patch_file(
        &self,
        manifest: &Manifest,
        entry: &FileEntry,
        install_root: &Path,
    ) -> FilePatchResult {
        let live = paths::resolve(install_root, &entry.path);
        let mut life = Lifecycle::new(&entry.path);

        // Start: skip files that already match
        if live.is_file() {
            let (path, expected) = (live.clone(), entry.checksum.clone());
            match blocking(&live, move || hash::verify_file_checksum(&path, &expected)).await {
                Ok(true) => return life.finish(PatchStage::Verified),
                Ok(false) => {}
                Err(e) => debug!("Treating unreadable {} as outdated: {}", entry.path, e),
            }
        }
        life.advance(PatchStage::NeedsUpdate);

        // Downloading: never touch the live file
        let staged = paths::download_path(&live);
        let url = self.endpoint.file_url(manifest.branch(), &entry.path);
        life.advance(PatchStage::Downloading);
        self.sink.emit(Status::Downloading(entry.path.clone()));

        if let Err(e) = self.download(&url, &staged).await {
            return life.fail(FailureKind::DownloadFailed, e.to_string());
        }
        life.advance(PatchStage::Downloaded);

        let access = (self.probe)(&staged);
        if !access.is_safe() {
            return life.fail(FailureKind::AccessBlocked, blocked(&staged, access));
        }

        // ChecksumChecked: a bad download stays on disk for diagnosis
        let path = staged.clone();
        match blocking(&staged, move || hash::compute_file_checksum(&path)).await {
            Ok(actual) if hash::checksums_match(&actual, &entry.checksum) => {}
            Ok(actual) => {
                let err = SyncError::ChecksumMismatch {
                    path: entry.path.clone(),
                    expected: entry.checksum.to_lowercase(),
                    actual,
                };
                return life.fail(FailureKind::ChecksumFailed, err.to_string());
            }
            Err(e) => return life.fail(FailureKind::ChecksumFailed, e.to_string()),
        }
        life.advance(PatchStage::ChecksumChecked);

        // BackedUp: skipped for fresh files
        if std::fs::symlink_metadata(&live).is_ok() {
            let backup = paths::backup_path(&live);
            if let Err(reason) = replace_with_rename(&live, &backup) {
                return life.fail(FailureKind::AccessBlocked, reason);
            }
            debug!("Backed up {} -> {}", live.display(), backup.display());
        } else {
            debug!("No existing {}, skipping backup", entry.path);
        }
        life.advance(PatchStage::BackedUp);

        // The old file now sits at .bak; a failure here leaves it there
        let access = (self.probe)(&live);
        if !access.is_safe() {
            return life.fail(FailureKind::AccessBlocked, blocked(&live, access));
        }

        if let Err(reason) = replace_with_rename(&staged, &live) {
            return life.fail(FailureKind::AccessBlocked, reason);
        }
        life.advance(PatchStage::Swapped);

        life.finish(PatchStage::Done)
    }

    async fn download(&self, url: &str, staged: &Path) -> Result<u64, SyncError> {
        let source = self.source;
        let operation = format!("Download {}", crate::downloaders::truncate_url(url));
        with_retry(&operation, self.download_attempts, self.retry_delay, || async move {
            source.download_to(url, staged, &mut |_: u64| {}).await
        })
        .await
    }
}

/// Hash on the blocking pool so large assets do not stall the runtime
async fn blocking<T, F>(path: &Path, f: F) -> SyncResult<T>
where
    F: FnOnce() -> SyncResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SyncError::io(path, std::io::Error::other(e)))?
}

fn blocked(path: &Path, access: Accessibility) -> String {
    SyncError::AccessBlocked {
        path: path.to_path_buf(),
        access,
    }
    .to_string()
}

/// Rename `from` to `to`, replacing any existing `to`.
///
/// A failed rename leaves both paths as they were.
fn replace_with_rename(from: &Path, to: &Path) -> Result<(), String> {
    std::fs::rename(from, to).map_err(|e| {
        format!(
            "cannot rename {} -> {}: {}",
            from.display(),
            to.display(),
            e
        )
    })
}

/// Staging paths for a manifest file, for diagnostics
pub fn staging_paths(install_root: &Path, relative: &str) -> (PathBuf, PathBuf) {
    let live = paths::resolve(install_root, relative);
    (paths::download_path(&live), paths::backup_path(&live))
}
