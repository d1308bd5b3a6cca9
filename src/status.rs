//! Status reporting to the UI-facing channel.
//!
//! The engine emits short human-readable status strings (`completed`,
//! `branchOutdated`, `Error: <detail>`) and never interprets UI state.

use std::fmt;
use std::sync::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tracing::info;

/// A status update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    /// Verification started
    Checking,
    /// Every manifest file matched
    UpToDate,
    /// At least one file is missing or differs
    BranchOutdated,
    /// A file is being fetched
    Downloading(String),
    /// A patch or bulk run finished without failures
    Completed,
    /// A run failed; the detail is shown to the user
    Error(String),
    /// A launched game process exited
    GameExited(Option<i32>),
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Checking => f.write_str("checking"),
            Status::UpToDate => f.write_str("branchUpToDate"),
            Status::BranchOutdated => f.write_str("branchOutdated"),
            Status::Downloading(file) => write!(f, "downloading: {}", file),
            Status::Completed => f.write_str("completed"),
            Status::Error(detail) => write!(f, "Error: {}", detail),
            Status::GameExited(Some(code)) => write!(f, "gameExited: {}", code),
            Status::GameExited(None) => f.write_str("gameExited: signal"),
        }
    }
}

/// Receiver of status updates
pub trait StatusSink: Send + Sync {
    fn emit(&self, status: Status);
}

/// Discards everything
pub struct NullSink;

impl StatusSink for NullSink {
    fn emit(&self, _status: Status) {}
}

/// Writes statuses to the log
pub struct LogSink;

impl StatusSink for LogSink {
    fn emit(&self, status: Status) {
        info!(status = %status, "status");
    }
}

/// Forwards statuses over a channel to another task
pub struct ChannelSink {
    tx: UnboundedSender<Status>,
}

impl ChannelSink {
    pub fn new(tx: UnboundedSender<Status>) -> Self {
        Self { tx }
    }
}

impl StatusSink for ChannelSink {
    fn emit(&self, status: Status) {
        // Receiver gone means nobody is listening any more
        let _ = self.tx.send(status);
    }
}

/// Keeps every status in memory, in order
#[derive(Default)]
pub struct CollectingSink {
    seen: Mutex<Vec<Status>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn statuses(&self) -> Vec<Status> {
        match self.seen.lock() {
            Ok(seen) => seen.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn last(&self) -> Option<Status> {
        self.statuses().pop()
    }
}

impl StatusSink for CollectingSink {
    fn emit(&self, status: Status) {
        match self.seen.lock() {
            Ok(mut seen) => seen.push(status),
            Err(poisoned) => poisoned.into_inner().push(status),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings() {
        assert_eq!(Status::Completed.to_string(), "completed");
        assert_eq!(Status::BranchOutdated.to_string(), "branchOutdated");
        assert_eq!(Status::Error("disk full".into()).to_string(), "Error: disk full");
        assert_eq!(Status::GameExited(Some(0)).to_string(), "gameExited: 0");
    }

    #[test]
    fn test_collecting_sink_keeps_order() {
        let sink = CollectingSink::new();
        sink.emit(Status::Checking);
        sink.emit(Status::UpToDate);
        assert_eq!(sink.statuses(), vec![Status::Checking, Status::UpToDate]);
        assert_eq!(sink.last(), Some(Status::UpToDate));
    }

    #[tokio::test]
    async fn test_channel_sink() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let sink = ChannelSink::new(tx);
        sink.emit(Status::Completed);
        assert_eq!(rx.recv().await, Some(Status::Completed));

        drop(rx);
        // Sending after the receiver is gone is not an error
        sink.emit(Status::Completed);
    }
}
