//! Manifest path handling
//!
//! Branch manifests are produced on Windows and may use backslashes.
//! This module handles:
//! - Converting `\` to `/` for local filesystem operations and URLs
//! - Rejecting paths that would escape the install root
//! - Naming the `.download` and `.bak` staging files next to a live file

use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

/// Suffix of an in-progress replacement for a live file
pub const DOWNLOAD_SUFFIX: &str = ".download";

/// Suffix of the pre-update backup of a live file
pub const BACKUP_SUFFIX: &str = ".bak";

/// Convert Windows path separators to forward slashes
/// `Binaries\Win64\Game.exe` -> `Binaries/Win64/Game.exe`
pub fn to_forward_slashes(path: &str) -> String {
    path.replace('\\', "/")
}

/// Normalize a path for lookups and comparisons (lowercase, forward slashes, trimmed)
pub fn normalize_for_lookup(path: &str) -> String {
    path.to_lowercase()
        .replace('\\', "/")
        .trim_matches('/')
        .to_string()
}

/// Check that a manifest path is a plain relative path under the install root.
///
/// Returns the native relative path, or a description of why it was rejected.
pub fn validate_relative(relative: &str) -> Result<PathBuf, String> {
    let converted = to_forward_slashes(relative.trim());
    if converted.is_empty() {
        return Err("empty path".to_string());
    }
    if converted.starts_with('/') || has_drive_prefix(&converted) {
        return Err(format!("absolute paths are not allowed: {}", relative));
    }

    // The last segment names the file itself
    if matches!(converted.rsplit('/').next(), Some("") | Some(".") | None) {
        return Err(format!("not a file path: {}", relative));
    }

    let native = PathBuf::from(&converted);
    for comp in native.components() {
        match comp {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => {
                return Err(format!("parent traversal not allowed: {}", relative));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(format!("absolute paths are not allowed: {}", relative));
            }
        }
    }
    Ok(native)
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Join the install root with a manifest-relative path
pub fn resolve(install_root: &Path, relative: &str) -> PathBuf {
    install_root.join(to_forward_slashes(relative))
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// `X` -> `X.download`
pub fn download_path(live: &Path) -> PathBuf {
    with_suffix(live, DOWNLOAD_SUFFIX)
}

/// `X` -> `X.bak`
pub fn backup_path(live: &Path) -> PathBuf {
    with_suffix(live, BACKUP_SUFFIX)
}

/// `X.bak` -> `X`, `X.download` -> `X`; None for anything else
pub fn live_path_for(staged: &Path) -> Option<PathBuf> {
    let name = staged.file_name()?.to_str()?;
    let stem = name
        .strip_suffix(BACKUP_SUFFIX)
        .or_else(|| name.strip_suffix(DOWNLOAD_SUFFIX))?;
    if stem.is_empty() {
        return None;
    }
    Some(staged.with_file_name(stem))
}

/// Join a base URL and a manifest-relative path with exactly one `/`
pub fn join_url(base: &str, relative: &str) -> String {
    let relative = to_forward_slashes(relative);
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        relative.trim_start_matches('/')
    )
}

/// Create parent directories for a path if they don't exist
pub fn ensure_parent_dirs(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_forward_slashes() {
        assert_eq!(to_forward_slashes("Binaries\\Win64\\Game.exe"), "Binaries/Win64/Game.exe");
        assert_eq!(to_forward_slashes("already/forward"), "already/forward");
        assert_eq!(to_forward_slashes("mixed\\path/style"), "mixed/path/style");
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize_for_lookup("Content\\Paks\\Game.PAK"), "content/paks/game.pak");
        assert_eq!(normalize_for_lookup("/Config/Default.ini/"), "config/default.ini");
    }

    #[test]
    fn test_validate_relative() {
        assert_eq!(
            validate_relative("Content\\Paks\\a.pak").unwrap(),
            PathBuf::from("Content/Paks/a.pak")
        );
        assert!(validate_relative("").is_err());
        assert!(validate_relative("../outside.txt").is_err());
        assert!(validate_relative("Content\\..\\..\\x").is_err());
        assert!(validate_relative("/etc/passwd").is_err());
        assert!(validate_relative("C:\\Windows\\x.dll").is_err());
        assert!(validate_relative(".").is_err());
        assert!(validate_relative("Content/").is_err());
        assert!(validate_relative("Content\\").is_err());
        assert!(validate_relative("Content/.").is_err());
        assert_eq!(validate_relative("./a.pak").unwrap(), PathBuf::from("./a.pak"));
    }

    #[test]
    fn test_staging_names() {
        let live = Path::new("/games/root/Content/a.pak");
        assert_eq!(download_path(live), PathBuf::from("/games/root/Content/a.pak.download"));
        assert_eq!(backup_path(live), PathBuf::from("/games/root/Content/a.pak.bak"));
        assert_eq!(live_path_for(&backup_path(live)).unwrap(), live);
        assert_eq!(live_path_for(&download_path(live)).unwrap(), live);
        assert_eq!(live_path_for(live), None);
        assert_eq!(live_path_for(Path::new("/x/.bak")), None);
    }

    #[test]
    fn test_join_url() {
        assert_eq!(
            join_url("https://builds.example.com/release/", "Binaries\\Win64\\Game.exe"),
            "https://builds.example.com/release/Binaries/Win64/Game.exe"
        );
        assert_eq!(join_url("https://cdn/files", "/a.txt"), "https://cdn/files/a.txt");
    }

    #[test]
    fn test_resolve() {
        let root = Path::new("/games/root");
        assert_eq!(resolve(root, "Content\\a.pak"), PathBuf::from("/games/root/Content/a.pak"));
    }
}
