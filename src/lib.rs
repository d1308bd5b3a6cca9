//! branchsync - game branch verification and patching
//!
//! Checks a local game installation against a remote branch manifest and
//! brings it up to date: missing or changed files are downloaded, verified,
//! and swapped in with a backup of the previous version. Fresh installs go
//! through a bulk downloader running as its own task.

pub mod access;
pub mod bulk;
pub mod config;
pub mod downloaders;
pub mod error;
pub mod hash;
pub mod launch;
pub mod manifest;
pub mod patcher;
pub mod paths;
pub mod staging;
pub mod status;
pub mod verify;

pub use error::{SyncError, SyncResult};
