//! Transport for manifests and build files
//!
//! Everything that talks to a build server goes through [`FileSource`], so
//! the verifier, patcher, and bulk worker can run against the real HTTP
//! client or an in-memory source in tests.

mod http;
#[cfg(test)]
mod memory;

pub use http::{truncate_url, HttpClient};
#[cfg(test)]
pub(crate) use memory::MemorySource;

use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::SyncResult;

/// Attempts made for one patch download before giving up
pub const PATCH_DOWNLOAD_ATTEMPTS: u32 = 2;

/// Delay between patch download attempts
pub const RETRY_DELAY: Duration = Duration::from_secs(2);

/// A server that hands out manifests and build files.
pub trait FileSource: Send + Sync {
    /// Fetch a whole document into memory.
    ///
    /// Non-2xx responses and transport failures are `SyncError::Network`.
    fn fetch(&self, url: &str) -> impl Future<Output = SyncResult<Vec<u8>>> + Send;

    /// Stream a file to `dest`, creating parent directories and truncating
    /// any existing file. `progress` receives the cumulative byte count.
    ///
    /// Returns the number of bytes written.
    fn download_to(
        &self,
        url: &str,
        dest: &Path,
        progress: &mut (dyn FnMut(u64) + Send),
    ) -> impl Future<Output = SyncResult<u64>> + Send;
}

/// Wrapper that retries transient failures a bounded number of times.
///
/// Non-transient errors are returned immediately.
pub async fn with_retry<F, Fut, T>(
    operation_name: &str,
    max_attempts: u32,
    delay: Duration,
    mut f: F,
) -> SyncResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SyncResult<T>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match f().await {
            Ok(result) => {
                if attempt > 1 {
                    info!("{} succeeded on attempt {}/{}", operation_name, attempt, max_attempts);
                }
                return Ok(result);
            }
            Err(e) if e.is_transient() && attempt < max_attempts => {
                warn!(
                    "{} failed (attempt {}/{}): {}",
                    operation_name, attempt, max_attempts, e
                );
                if !delay.is_zero() {
                    sleep(delay).await;
                }
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Check if a file exists and has exactly the expected size
pub fn verify_download(path: &Path, expected_size: u64) -> bool {
    match std::fs::metadata(path) {
        Ok(meta) => meta.is_file() && meta.len() == expected_size,
        Err(_) => false,
    }
}
