//! Game launching and process supervision.
//!
//! A [`LaunchPlan`] turns the configured executable and the manifest's launch
//! arguments into a command line. [`RunningGameRegistry`] starts plans, keeps
//! one entry per running session, and reports each exit through a
//! [`StatusSink`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::manifest::LaunchArgument;
use crate::status::{Status, StatusSink};

/// Program and arguments for one game start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    program: PathBuf,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl LaunchPlan {
    /// Plan for `program`, run from its own directory
    pub fn new(program: impl Into<PathBuf>) -> Self {
        let program = program.into();
        let working_dir = program.parent().filter(|p| !p.as_os_str().is_empty()).map(Path::to_path_buf);
        Self {
            program,
            args: Vec::new(),
            working_dir,
        }
    }

    /// Append manifest arguments: the key, then the value when it is set
    pub fn with_manifest_arguments(mut self, arguments: &[LaunchArgument]) -> Self {
        for arg in arguments {
            if arg.key.is_empty() {
                continue;
            }
            self.args.push(arg.key.clone());
            if !arg.value.is_empty() {
                self.args.push(arg.value.clone());
            }
        }
        self
    }

    /// Append user arguments after the manifest ones
    pub fn with_extra_args<I, A>(mut self, extra: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.args.extend(extra.into_iter().map(Into::into));
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

/// Identifier of a running game session
pub type SessionId = u64;

/// A started game
pub struct GameSession {
    pub id: SessionId,
    /// OS process id, when the platform reports one
    pub pid: Option<u32>,
    exit: JoinHandle<Option<i32>>,
}

impl GameSession {
    /// Wait for the process to exit and return its exit code
    /// (None when killed by a signal or when supervision failed).
    pub async fn wait(self) -> Option<i32> {
        self.exit.await.unwrap_or(None)
    }
}

/// Tracks running game processes
pub struct RunningGameRegistry {
    sink: Arc<dyn StatusSink>,
    next_id: AtomicU64,
    sessions: Arc<Mutex<HashMap<SessionId, oneshot::Sender<()>>>>,
}

impl RunningGameRegistry {
    pub fn new(sink: Arc<dyn StatusSink>) -> Self {
        Self {
            sink,
            next_id: AtomicU64::new(1),
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Start the game described by `plan`.
    ///
    /// Must be called from within a tokio runtime. The exit is reported as
    /// `Status::GameExited` and the session is removed from the registry.
    pub fn launch(&self, plan: &LaunchPlan) -> SyncResult<GameSession> {
        let mut child = plan
            .command()
            .spawn()
            .map_err(|e| SyncError::io(plan.program(), e))?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let pid = child.id();
        let (kill_tx, kill_rx) = oneshot::channel();
        lock(&self.sessions).insert(id, kill_tx);

        info!("Launched {} (session {}, pid {:?})", plan.program().display(), id, pid);

        let sessions = Arc::clone(&self.sessions);
        let sink = Arc::clone(&self.sink);
        let exit = tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = kill_rx => {
                    debug!("Terminating session {}", id);
                    if let Err(e) = child.start_kill() {
                        warn!("Failed to kill session {}: {}", id, e);
                    }
                    child.wait().await
                }
            };

            lock(&sessions).remove(&id);

            let code = match status {
                Ok(status) => status.code(),
                Err(e) => {
                    warn!("Lost track of session {}: {}", id, e);
                    None
                }
            };
            info!("Session {} exited with {:?}", id, code);
            sink.emit(Status::GameExited(code));
            code
        });

        Ok(GameSession { id, pid, exit })
    }

    /// Ask a running session to stop. Returns false for unknown sessions.
    pub fn terminate(&self, id: SessionId) -> bool {
        match lock(&self.sessions).remove(&id) {
            Some(kill) => kill.send(()).is_ok(),
            None => false,
        }
    }

    pub fn is_running(&self, id: SessionId) -> bool {
        lock(&self.sessions).contains_key(&id)
    }

    /// Ids of running sessions, ascending
    pub fn running(&self) -> Vec<SessionId> {
        let mut ids: Vec<_> = lock(&self.sessions).keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
