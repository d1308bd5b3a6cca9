//! File accessibility probing before replacement.
//!
//! A path is classified into exactly one of four states. Callers treat
//! `NotPresent` and `WritableOrCreatable` as safe to proceed; the other two
//! are terminal for the current file and must be surfaced.

use fs4::FileExt;
use std::fmt;
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::Path;
use tracing::debug;

/// Result of probing a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accessibility {
    /// Nothing exists at the path
    NotPresent,
    /// The path can be opened for writing and locked
    WritableOrCreatable,
    /// Another process holds a lock or the file is busy
    LockedOrBusy,
    /// Permission denied, or the path is not a regular file
    AccessDenied,
}

impl Accessibility {
    /// Whether an update may proceed
    pub fn is_safe(self) -> bool {
        matches!(self, Accessibility::NotPresent | Accessibility::WritableOrCreatable)
    }
}

impl fmt::Display for Accessibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Accessibility::NotPresent => "not present",
            Accessibility::WritableOrCreatable => "writable",
            Accessibility::LockedOrBusy => "locked or busy",
            Accessibility::AccessDenied => "access denied",
        };
        f.write_str(s)
    }
}

/// Classify a path. Never blocks waiting for a lock.
pub fn probe(path: &Path) -> Accessibility {
    let meta = match std::fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == ErrorKind::NotFound => return Accessibility::NotPresent,
        Err(e) => return classify_io_error(&e),
    };

    if meta.is_dir() {
        return Accessibility::AccessDenied;
    }

    let file = match OpenOptions::new().write(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Accessibility::NotPresent,
        Err(e) => return classify_io_error(&e),
    };

    match file.try_lock_exclusive() {
        Ok(()) => {
            let _ = FileExt::unlock(&file);
            Accessibility::WritableOrCreatable
        }
        Err(e) if is_lock_contended(&e) => {
            debug!("Lock contended on {}", path.display());
            Accessibility::LockedOrBusy
        }
        Err(e) => classify_io_error(&e),
    }
}

fn is_lock_contended(e: &std::io::Error) -> bool {
    e.kind() == ErrorKind::WouldBlock || is_busy_os_error(e.raw_os_error())
}

fn classify_io_error(e: &std::io::Error) -> Accessibility {
    if e.kind() == ErrorKind::PermissionDenied {
        return Accessibility::AccessDenied;
    }
    if e.kind() == ErrorKind::WouldBlock || is_busy_os_error(e.raw_os_error()) {
        return Accessibility::LockedOrBusy;
    }
    Accessibility::AccessDenied
}

#[cfg(windows)]
fn is_busy_os_error(code: Option<i32>) -> bool {
    // ERROR_SHARING_VIOLATION, ERROR_LOCK_VIOLATION
    matches!(code, Some(32) | Some(33))
}

#[cfg(not(windows))]
fn is_busy_os_error(code: Option<i32>) -> bool {
    // EBUSY, ETXTBSY (running executable opened for write)
    matches!(code, Some(16) | Some(26))
}
