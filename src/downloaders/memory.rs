//! In-memory file source for tests

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use super::FileSource;
use crate::error::{SyncError, SyncResult};
use crate::paths;

/// Serves bytes by URL, records every request, and can inject failures.
#[derive(Default)]
pub(crate) struct MemorySource {
    files: Mutex<HashMap<String, Vec<u8>>>,
    /// Remaining transport failures per URL
    failures: Mutex<HashMap<String, u32>>,
    /// Remaining truncated deliveries per URL
    truncations: Mutex<HashMap<String, u32>>,
    requests: Mutex<Vec<String>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, url: &str, body: Vec<u8>) -> Self {
        self.files.lock().unwrap().insert(url.to_string(), body);
        self
    }

    /// Fail the next `times` requests for `url` with a transport error
    pub fn fail_times(self, url: &str, times: u32) -> Self {
        self.failures.lock().unwrap().insert(url.to_string(), times);
        self
    }

    /// Deliver only half of the body for the next `times` downloads of `url`
    pub fn truncate_times(self, url: &str, times: u32) -> Self {
        self.truncations.lock().unwrap().insert(url.to_string(), times);
        self
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.requests.lock().unwrap().iter().filter(|u| *u == url).count()
    }

    pub fn total_requests(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn take(map: &Mutex<HashMap<String, u32>>, url: &str) -> bool {
        let mut map = map.lock().unwrap();
        match map.get_mut(url) {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        }
    }

    fn respond(&self, url: &str) -> SyncResult<Vec<u8>> {
        self.requests.lock().unwrap().push(url.to_string());
        if Self::take(&self.failures, url) {
            return Err(SyncError::network(url, "connection reset"));
        }
        self.files
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| SyncError::network(url, "HTTP 404 - Not Found"))
    }
}

impl FileSource for MemorySource {
    async fn fetch(&self, url: &str) -> SyncResult<Vec<u8>> {
        self.respond(url)
    }

    async fn download_to(
        &self,
        url: &str,
        dest: &Path,
        progress: &mut (dyn FnMut(u64) + Send),
    ) -> SyncResult<u64> {
        let mut body = self.respond(url)?;
        if Self::take(&self.truncations, url) {
            body.truncate(body.len() / 2);
        }

        paths::ensure_parent_dirs(dest).map_err(|e| SyncError::io(dest, e))?;
        std::fs::write(dest, &body).map_err(|e| SyncError::io(dest, e))?;

        let mut done = 0u64;
        for chunk in body.chunks(7) {
            done += chunk.len() as u64;
            progress(done);
        }
        Ok(body.len() as u64)
    }
}
