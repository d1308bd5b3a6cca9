//! Bulk download of a fresh installation.
//!
//! The worker runs as its own tokio task and talks to the caller only
//! through [`BulkEvent`] messages. The caller can terminate it at any time;
//! a file being written at that moment is abandoned as-is; the next run
//! re-checks file sizes before trusting anything on disk.
//!
//! Files are fetched one after another. A file already present with the
//! listed size is trusted without hashing. Every file gets a budget of
//! [`MAX_ATTEMPTS_PER_FILE`] requests: the first transport error is retried
//! immediately and silently, size mismatches and further errors delete the
//! partial file and retry. Running out of budget aborts the whole run.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::downloaders::{verify_download, FileSource};
use crate::error::{SyncError, SyncResult};
use crate::manifest::{parse_listing, BulkDescriptor, ListedFile};
use crate::paths;

/// Retries after the first attempt when the size does not match
pub const MAX_SIZE_RETRIES: u32 = 3;

/// Requests made for one file before giving up.
///
/// The one-shot transport retry draws from this same budget, so a file that
/// hits a transport error gets one fewer size check. No file is ever
/// requested more than this many times.
pub const MAX_ATTEMPTS_PER_FILE: u32 = 1 + MAX_SIZE_RETRIES;

/// Message from the bulk worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkEvent {
    /// Listing parsed; `files` entries will be processed
    Started { files: usize },
    /// Progress of the current file
    Progress {
        file: String,
        bytes_done: u64,
        percent: u8,
    },
    /// A fatal error; a `Finished { success: false }` follows
    Error {
        file: Option<String>,
        message: String,
    },
    Finished { success: bool },
}

/// Everything one bulk run needs, passed explicitly
#[derive(Debug, Clone)]
pub struct DownloadSession {
    pub install_root: PathBuf,
    pub descriptor: BulkDescriptor,
}

/// Caller's end of a running bulk download
pub struct BulkDownloadHandle {
    events: UnboundedReceiver<BulkEvent>,
    task: JoinHandle<()>,
}

impl BulkDownloadHandle {
    /// Next event, or None once the worker is gone
    pub async fn next_event(&mut self) -> Option<BulkEvent> {
        self.events.recv().await
    }

    /// Stop the worker. Files being written are left as they are.
    pub fn terminate(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Drain events until the worker exits and report whether it succeeded.
    ///
    /// A worker that dies without a `Finished` event counts as a failure.
    pub async fn wait(mut self) -> bool {
        let mut success = false;
        while let Some(event) = self.next_event().await {
            if let BulkEvent::Finished { success: s } = event {
                success = s;
            }
        }
        if let Err(e) = self.task.await {
            if !e.is_cancelled() {
                warn!("Bulk download worker crashed: {}", e);
            }
            return false;
        }
        success
    }
}

/// Start a bulk download of `descriptor_url` into `install_root`.
pub fn spawn_bulk_download<S>(
    source: Arc<S>,
    install_root: PathBuf,
    descriptor_url: String,
) -> BulkDownloadHandle
where
    S: FileSource + 'static,
{
    let (tx, events) = mpsc::unbounded_channel();
    let task = tokio::spawn(async move {
        let success = match run_bulk(source.as_ref(), install_root, &descriptor_url, &tx).await {
            Ok(()) => true,
            Err((file, e)) => {
                warn!("Bulk download failed: {}", e);
                let _ = tx.send(BulkEvent::Error {
                    file,
                    message: e.to_string(),
                });
                false
            }
        };
        let _ = tx.send(BulkEvent::Finished { success });
    });

    BulkDownloadHandle { events, task }
}

type BulkFailure = (Option<String>, SyncError);

async fn run_bulk<S: FileSource>(
    source: &S,
    install_root: PathBuf,
    descriptor_url: &str,
    tx: &UnboundedSender<BulkEvent>,
) -> Result<(), BulkFailure> {
    let session = open_session(source, install_root, descriptor_url)
        .await
        .map_err(|e| (None, e))?;

    let listing = source
        .fetch(&session.descriptor.manifest_url)
        .await
        .map_err(|e| (None, unavailable(e)))?;
    let text = String::from_utf8(listing).map_err(|e| {
        (
            None,
            SyncError::ManifestMalformed(format!("listing is not UTF-8: {}", e)),
        )
    })?;
    let files = parse_listing(&text).map_err(|e| (None, e))?;

    info!(
        "Bulk download of {} files into {}",
        files.len(),
        session.install_root.display()
    );
    let _ = tx.send(BulkEvent::Started { files: files.len() });

    for file in &files {
        download_listed(source, &session, file, tx)
            .await
            .map_err(|e| (Some(file.name.clone()), e))?;
    }

    info!("Bulk download complete");
    Ok(())
}

async fn open_session<S: FileSource>(
    source: &S,
    install_root: PathBuf,
    descriptor_url: &str,
) -> SyncResult<DownloadSession> {
    let body = source.fetch(descriptor_url).await.map_err(unavailable)?;
    let descriptor = BulkDescriptor::from_json(&body)?;
    debug!(
        "Bulk descriptor: listing {} files from {}",
        descriptor.manifest_url, descriptor.file_base_url
    );
    Ok(DownloadSession {
        install_root,
        descriptor,
    })
}

fn unavailable(e: SyncError) -> SyncError {
    match e {
        SyncError::Network { url, reason } => SyncError::ManifestUnavailable { url, reason },
        other => other,
    }
}

/// Fetch one listed file, honoring the request budget.
async fn download_listed<S: FileSource>(
    source: &S,
    session: &DownloadSession,
    file: &ListedFile,
    tx: &UnboundedSender<BulkEvent>,
) -> SyncResult<()> {
    let dest = paths::resolve(&session.install_root, &file.name);

    // Size-only check: cheap on cold start, weaker than a checksum
    if verify_download(&dest, file.total_bytes) {
        debug!("{} already present with expected size", file.name);
        let mut reporter = ProgressReporter::new(&file.name, file.total_bytes, tx);
        reporter.finish();
        return Ok(());
    }

    let url = session.descriptor.file_url(&file.name);
    let mut transport_retry_used = false;
    let mut last_reason = String::new();

    for attempt in 1..=MAX_ATTEMPTS_PER_FILE {
        let mut reporter = ProgressReporter::new(&file.name, file.total_bytes, tx);
        reporter.start();

        let result = source
            .download_to(&url, &dest, &mut |done: u64| reporter.update(done))
            .await;

        match result {
            Ok(_) if verify_download(&dest, file.total_bytes) => {
                reporter.finish();
                if attempt > 1 {
                    info!("{} succeeded on attempt {}/{}", file.name, attempt, MAX_ATTEMPTS_PER_FILE);
                }
                return Ok(());
            }
            Ok(written) => {
                last_reason = format!(
                    "size mismatch: expected {} bytes, got {}",
                    file.total_bytes, written
                );
                warn!(
                    "{} (attempt {}/{}): {}",
                    file.name, attempt, MAX_ATTEMPTS_PER_FILE, last_reason
                );
                remove_partial(&dest);
            }
            Err(e) if e.is_transient() && !transport_retry_used => {
                transport_retry_used = true;
                debug!("Transport error for {}, retrying once: {}", file.name, e);
                last_reason = e.to_string();
            }
            Err(e) if e.is_transient() => {
                warn!(
                    "{} (attempt {}/{}): {}",
                    file.name, attempt, MAX_ATTEMPTS_PER_FILE, e
                );
                last_reason = e.to_string();
                remove_partial(&dest);
            }
            Err(e) => return Err(e),
        }
    }

    Err(SyncError::RetryExhausted {
        file: file.name.clone(),
        attempts: MAX_ATTEMPTS_PER_FILE,
        reason: last_reason,
    })
}

fn remove_partial(dest: &Path) {
    if let Err(e) = std::fs::remove_file(dest) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Could not remove partial {}: {}", dest.display(), e);
        }
    }
}

/// Throttles progress to whole-percent steps
struct ProgressReporter<'a> {
    file: &'a str,
    total: u64,
    last_percent: Option<u8>,
    tx: &'a UnboundedSender<BulkEvent>,
}

impl<'a> ProgressReporter<'a> {
    fn new(file: &'a str, total: u64, tx: &'a UnboundedSender<BulkEvent>) -> Self {
        Self {
            file,
            total,
            last_percent: None,
            tx,
        }
    }

    fn send(&mut self, bytes_done: u64, percent: u8) {
        self.last_percent = Some(percent);
        let _ = self.tx.send(BulkEvent::Progress {
            file: self.file.to_string(),
            bytes_done,
            percent,
        });
    }

    fn start(&mut self) {
        self.send(0, 0);
    }

    fn update(&mut self, bytes_done: u64) {
        let percent = percent_of(bytes_done, self.total);
        if self.last_percent.map_or(true, |last| percent > last) {
            self.send(bytes_done, percent);
        }
    }

    fn finish(&mut self) {
        if self.last_percent != Some(100) {
            self.send(self.total, 100);
        }
    }
}

fn percent_of(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done as u128 * 100) / total as u128).min(100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloaders::MemorySource;

    const DESCRIPTOR: &str = "http://cdn/descriptor.json";
    const LISTING: &str = "http://cdn/listing.txt";

    fn file_url(name: &str) -> String {
        format!("http://cdn/files/{}", name)
    }

    fn source_with(listing: &str) -> MemorySource {
        MemorySource::new()
            .with_file(
                DESCRIPTOR,
                br#"{"manifest":"http://cdn/listing.txt","filedirectory":"http://cdn/files"}"#.to_vec(),
            )
            .with_file(LISTING, listing.as_bytes().to_vec())
    }

    async fn run(source: MemorySource, root: &Path) -> (Vec<BulkEvent>, Arc<MemorySource>) {
        let source = Arc::new(source);
        let mut handle = spawn_bulk_download(source.clone(), root.to_path_buf(), DESCRIPTOR.to_string());
        let mut events = Vec::new();
        while let Some(event) = handle.next_event().await {
            events.push(event);
        }
        (events, source)
    }

    fn progress_for(events: &[BulkEvent], name: &str) -> Vec<u8> {
        events
            .iter()
            .filter_map(|e| match e {
                BulkEvent::Progress { file, percent, .. } if file == name => Some(*percent),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_fresh_install() {
        let root = tempfile::tempdir().unwrap();
        let source = source_with("header\nGame.exe:x:10\nContent/a.pak:x:4\n")
            .with_file(&file_url("Game.exe"), vec![1u8; 10])
            .with_file(&file_url("Content/a.pak"), vec![2u8; 4]);

        let (events, _) = run(source, root.path()).await;

        assert_eq!(events.first(), Some(&BulkEvent::Started { files: 2 }));
        assert_eq!(events.last(), Some(&BulkEvent::Finished { success: true }));
        for name in ["Game.exe", "Content/a.pak"] {
            let progress = progress_for(&events, name);
            assert_eq!(progress.first(), Some(&0));
            assert_eq!(progress.last(), Some(&100));
        }
        assert_eq!(std::fs::read(root.path().join("Game.exe")).unwrap(), vec![1u8; 10]);
        assert_eq!(std::fs::read(root.path().join("Content/a.pak")).unwrap(), vec![2u8; 4]);
    }

    #[tokio::test]
    async fn test_file_with_expected_size_is_not_downloaded() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("Game.exe"), vec![9u8; 10]).unwrap();
        let source = source_with("header\nGame.exe:x:10\n");

        let (events, source) = run(source, root.path()).await;

        assert_eq!(source.request_count(&file_url("Game.exe")), 0);
        assert_eq!(progress_for(&events, "Game.exe"), vec![100]);
        assert_eq!(events.last(), Some(&BulkEvent::Finished { success: true }));
        // Size-only check: existing content is kept even though it differs
        assert_eq!(std::fs::read(root.path().join("Game.exe")).unwrap(), vec![9u8; 10]);
    }

    #[tokio::test]
    async fn test_transient_failures_are_bounded_and_abort_run() {
        let root = tempfile::tempdir().unwrap();
        let source = source_with("header\nbad.bin:x:5\nnext.bin:x:5\n")
            .with_file(&file_url("bad.bin"), vec![0u8; 5])
            .with_file(&file_url("next.bin"), vec![0u8; 5])
            .fail_times(&file_url("bad.bin"), 100);

        let (events, source) = run(source, root.path()).await;

        assert_eq!(source.request_count(&file_url("bad.bin")), MAX_ATTEMPTS_PER_FILE as usize);
        assert_eq!(source.request_count(&file_url("next.bin")), 0);
        assert!(events.iter().any(|e| matches!(
            e,
            BulkEvent::Error { file: Some(f), .. } if f == "bad.bin"
        )));
        assert_eq!(events.last(), Some(&BulkEvent::Finished { success: false }));
    }

    #[tokio::test]
    async fn test_size_mismatch_is_retried() {
        let root = tempfile::tempdir().unwrap();
        let source = source_with("header\na.bin:x:8\n")
            .with_file(&file_url("a.bin"), vec![3u8; 8])
            .truncate_times(&file_url("a.bin"), 2);

        let (events, source) = run(source, root.path()).await;

        assert_eq!(source.request_count(&file_url("a.bin")), 3);
        assert_eq!(events.last(), Some(&BulkEvent::Finished { success: true }));
        assert_eq!(std::fs::metadata(root.path().join("a.bin")).unwrap().len(), 8);
    }

    #[tokio::test]
    async fn test_transport_retry_shares_the_request_budget() {
        let root = tempfile::tempdir().unwrap();

        // One transport error and two short bodies still fit in the budget
        let source = source_with("header\na.bin:x:8\n")
            .with_file(&file_url("a.bin"), vec![3u8; 8])
            .fail_times(&file_url("a.bin"), 1)
            .truncate_times(&file_url("a.bin"), 2);
        let (events, source) = run(source, root.path()).await;
        assert_eq!(source.request_count(&file_url("a.bin")), MAX_ATTEMPTS_PER_FILE as usize);
        assert_eq!(events.last(), Some(&BulkEvent::Finished { success: true }));

        // A third short body does not get a fifth request
        std::fs::remove_file(root.path().join("a.bin")).unwrap();
        let source = source_with("header\na.bin:x:8\n")
            .with_file(&file_url("a.bin"), vec![3u8; 8])
            .fail_times(&file_url("a.bin"), 1)
            .truncate_times(&file_url("a.bin"), 3);
        let (events, source) = run(source, root.path()).await;
        assert_eq!(source.request_count(&file_url("a.bin")), MAX_ATTEMPTS_PER_FILE as usize);
        assert_eq!(events.last(), Some(&BulkEvent::Finished { success: false }));
    }

    #[tokio::test]
    async fn test_persistent_size_mismatch_exhausts_retries() {
        let root = tempfile::tempdir().unwrap();
        let source = source_with("header\na.bin:x:8\n").with_file(&file_url("a.bin"), vec![3u8; 6]);

        let (events, source) = run(source, root.path()).await;

        assert_eq!(source.request_count(&file_url("a.bin")), MAX_ATTEMPTS_PER_FILE as usize);
        assert!(!root.path().join("a.bin").exists());
        match &events[events.len() - 2] {
            BulkEvent::Error { message, .. } => assert!(message.contains("size mismatch"), "{}", message),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_sentinel_ends_listing() {
        let root = tempfile::tempdir().unwrap();
        let source = source_with("header\na.bin:x:1\nf:x:0\nb.bin:x:1\n").with_file(&file_url("a.bin"), vec![1]);

        let (events, source) = run(source, root.path()).await;

        assert_eq!(events.first(), Some(&BulkEvent::Started { files: 1 }));
        assert_eq!(source.request_count(&file_url("b.bin")), 0);
        assert_eq!(events.last(), Some(&BulkEvent::Finished { success: true }));
    }

    #[tokio::test]
    async fn test_descriptor_failure_is_fatal() {
        let root = tempfile::tempdir().unwrap();
        let (events, _) = run(MemorySource::new(), root.path()).await;

        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], BulkEvent::Error { file: None, .. }));
        assert_eq!(events[1], BulkEvent::Finished { success: false });
    }

    #[tokio::test]
    async fn test_progress_is_throttled_to_percent_steps() {
        let root = tempfile::tempdir().unwrap();
        let source = source_with("header\nbig.bin:x:1000\n").with_file(&file_url("big.bin"), vec![7u8; 1000]);

        let (events, _) = run(source, root.path()).await;

        let progress = progress_for(&events, "big.bin");
        assert!(progress.len() <= 101, "{} events", progress.len());
        assert!(progress.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(progress.first(), Some(&0));
        assert_eq!(progress.last(), Some(&100));
    }

    #[test]
    fn test_percent_of() {
        assert_eq!(percent_of(0, 200), 0);
        assert_eq!(percent_of(1, 200), 0);
        assert_eq!(percent_of(2, 200), 1);
        assert_eq!(percent_of(200, 200), 100);
        assert_eq!(percent_of(300, 200), 100);
        assert_eq!(percent_of(0, 0), 100);
    }

    /// Never delivers a file
    struct HangingSource {
        inner: MemorySource,
    }

    impl FileSource for HangingSource {
        async fn fetch(&self, url: &str) -> SyncResult<Vec<u8>> {
            self.inner.fetch(url).await
        }

        async fn download_to(
            &self,
            _url: &str,
            _dest: &Path,
            _progress: &mut (dyn FnMut(u64) + Send),
        ) -> SyncResult<u64> {
            std::future::pending::<()>().await;
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_terminate_stops_worker() {
        let root = tempfile::tempdir().unwrap();
        let source = Arc::new(HangingSource {
            inner: source_with("header\na.bin:x:1\n"),
        });
        let mut handle = spawn_bulk_download(source, root.path().to_path_buf(), DESCRIPTOR.to_string());

        assert_eq!(handle.next_event().await, Some(BulkEvent::Started { files: 1 }));
        handle.terminate();

        // Whatever was already queued drains, then the channel closes
        while let Some(event) = handle.next_event().await {
            assert!(!matches!(event, BulkEvent::Finished { .. }));
        }
        assert!(!handle.wait().await);
    }
}
