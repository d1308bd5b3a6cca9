//! Leftover staging files under an install root.
//!
//! Updates leave `X.download` behind when a download failed its checksum
//! and `X.bak` after every replacement. Backups are never pruned
//! automatically. An `X.bak` without `X` means an update was interrupted
//! between the two renames; the verifier reports `X` as missing so the next
//! patch run repairs it.

use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::paths::{self, BACKUP_SUFFIX, DOWNLOAD_SUFFIX};

/// Staging files found under an install root
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StagingArtifacts {
    /// `X.download` files
    pub downloads: Vec<PathBuf>,
    /// `X.bak` files
    pub backups: Vec<PathBuf>,
    /// `X.bak` files whose `X` does not exist
    pub orphaned_backups: Vec<PathBuf>,
}

impl StagingArtifacts {
    pub fn is_empty(&self) -> bool {
        self.downloads.is_empty() && self.backups.is_empty()
    }
}

/// Walk `install_root` and collect staging files, sorted by path.
pub fn scan_staging(install_root: &Path) -> StagingArtifacts {
    let mut artifacts = StagingArtifacts::default();

    if !install_root.exists() {
        return artifacts;
    }

    for entry in WalkDir::new(install_root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let name = entry.file_name().to_string_lossy();
        let path = entry.path().to_path_buf();

        if name.ends_with(DOWNLOAD_SUFFIX) {
            artifacts.downloads.push(path);
        } else if name.ends_with(BACKUP_SUFFIX) {
            let live_missing = paths::live_path_for(&path)
                .map(|live| !live.exists())
                .unwrap_or(false);
            if live_missing {
                artifacts.orphaned_backups.push(path.clone());
            }
            artifacts.backups.push(path);
        }
    }

    artifacts.downloads.sort();
    artifacts.backups.sort();
    artifacts.orphaned_backups.sort();
    artifacts
}

/// Delete leftover `.download` files. Backups are left alone.
///
/// Returns the number of files removed.
pub fn remove_stale_downloads(artifacts: &StagingArtifacts) -> usize {
    let mut removed = 0;
    for path in &artifacts.downloads {
        match std::fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) => warn!("Could not remove {}: {}", path.display(), e),
        }
    }
    info!("Removed {} stale downloads", removed);
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_finds_staging_files() {
        let root = tempfile::tempdir().unwrap();
        let content = root.path().join("Content");
        std::fs::create_dir_all(&content).unwrap();
        std::fs::write(content.join("a.pak"), b"new").unwrap();
        std::fs::write(content.join("a.pak.bak"), b"old").unwrap();
        std::fs::write(content.join("b.pak.bak"), b"old").unwrap();
        std::fs::write(root.path().join("c.ini.download"), b"bad").unwrap();
        std::fs::write(root.path().join("plain.txt"), b"x").unwrap();

        let found = scan_staging(root.path());
        assert_eq!(found.downloads, vec![root.path().join("c.ini.download")]);
        assert_eq!(found.backups, vec![content.join("a.pak.bak"), content.join("b.pak.bak")]);
        assert_eq!(found.orphaned_backups, vec![content.join("b.pak.bak")]);
        assert!(!found.is_empty());
    }

    #[test]
    fn test_remove_stale_downloads_keeps_backups() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("a.download"), b"x").unwrap();
        std::fs::write(root.path().join("a.bak"), b"y").unwrap();

        let found = scan_staging(root.path());
        assert_eq!(remove_stale_downloads(&found), 1);
        assert!(!root.path().join("a.download").exists());
        assert!(root.path().join("a.bak").exists());
    }

    #[test]
    fn test_scan_missing_root() {
        let root = tempfile::tempdir().unwrap();
        assert!(scan_staging(&root.path().join("nope")).is_empty());
    }
}
