//! Registry and lifecycle of transcoder subprocesses.
//!
//! Each process is registered under a [`SessionKey`]; at most one process
//! exists per key. A session moves through
//! `ProcessStarting -> Streaming -> Stopping` while registered and is
//! removed exactly once, by the task that owns its child, after the process
//! has exited. Keys that are not registered are `Idle`/`Terminated`.

mod drain;

pub use drain::{spawn_drain, write_and_close, LineObserver, MarkerHook, OutputTail};

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use classcast_common::SessionKey;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, StreamError};

/// How long to let the drain flush after the process has exited.
const DRAIN_FLUSH: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    ProcessStarting,
    Streaming,
    Stopping,
}

/// Snapshot of one registered session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub key: SessionKey,
    pub state: SessionState,
    pub pid: Option<u32>,
    pub work_dir: PathBuf,
    pub started_at: DateTime<Utc>,
}

/// What to do with the child's stdin.
#[derive(Debug, Clone, Default)]
pub enum StdinFeed {
    /// Stdin is `/dev/null`.
    #[default]
    Closed,
    /// Write the payload right after spawning, then close.
    Immediately(Vec<u8>),
    /// Write the payload once an output line contains the marker, then close.
    OnMarker { marker: String, payload: Vec<u8> },
}

/// Everything needed to launch one process.
pub struct LaunchSpec {
    pub key: SessionKey,
    /// `argv[0]` is the program.
    pub argv: Vec<String>,
    pub work_dir: PathBuf,
    pub stdin: StdinFeed,
    pub observer: Option<Box<dyn LineObserver>>,
}

impl LaunchSpec {
    pub fn new(key: SessionKey, argv: Vec<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            key,
            argv,
            work_dir: work_dir.into(),
            stdin: StdinFeed::Closed,
            observer: None,
        }
    }

    pub fn stdin(mut self, feed: StdinFeed) -> Self {
        self.stdin = feed;
        self
    }

    /// Watch the merged output. Ignored when stdin is fed on a marker,
    /// which installs its own hook.
    pub fn observer(mut self, observer: impl LineObserver) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }
}

/// How a stop request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Nothing was registered under the key.
    NotRunning,
    /// The process exited on its own before the request was handled.
    AlreadyExited,
    /// The process honoured the termination request within the grace period.
    Graceful,
    /// The grace period ran out and the process was killed.
    Killed,
}

/// Final report for a process, delivered once it has exited and been
/// removed from the registry.
#[derive(Debug, Clone)]
pub struct ExitReport {
    pub key: SessionKey,
    pub status: Option<ExitStatus>,
    /// Whether the exit was caused by a stop request.
    pub stopped: bool,
    /// Last lines of output.
    pub tail: Vec<String>,
}

impl ExitReport {
    pub fn success(&self) -> bool {
        self.status.map(|s| s.success()).unwrap_or(false)
    }

    /// Human-readable failure description.
    pub fn describe(&self) -> String {
        let status = match self.status {
            Some(s) => s.to_string(),
            None => "unknown status".to_string(),
        };
        match self.tail.last() {
            Some(line) => format!("{status}: {line}"),
            None => status,
        }
    }
}

/// Handle returned by a successful [`ProcessSupervisor::start`].
#[derive(Debug)]
pub struct Launched {
    pub key: SessionKey,
    pub pid: Option<u32>,
    exit: oneshot::Receiver<ExitReport>,
}

impl Launched {
    /// Wait for the process to exit and leave the registry.
    pub async fn wait(self) -> Result<ExitReport> {
        self.exit.await.map_err(|_| {
            StreamError::launch(self.key.to_string(), "supervisor task ended without a report")
        })
    }
}

enum Control {
    Stop {
        grace: Duration,
        done: oneshot::Sender<Result<StopOutcome>>,
    },
}

struct Slot {
    generation: u64,
    state: SessionState,
    pid: Option<u32>,
    work_dir: PathBuf,
    started_at: DateTime<Utc>,
    control: mpsc::Sender<Control>,
}

/// Thread-safe owner of every transcoder subprocess.
#[derive(Clone)]
pub struct ProcessSupervisor {
    sessions: Arc<DashMap<SessionKey, Slot>>,
    next_generation: Arc<AtomicU64>,
    default_grace: Duration,
}

impl ProcessSupervisor {
    pub fn new(default_grace: Duration) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            next_generation: Arc::new(AtomicU64::new(1)),
            default_grace,
        }
    }

    /// Spawn a process under `spec.key`.
    ///
    /// # Errors
    ///
    /// - [`StreamError::AlreadyRunning`] if the key is registered. Nothing
    ///   is spawned and nothing else changes.
    /// - [`StreamError::Launch`] if the working directory cannot be created
    ///   or the process cannot be spawned. The key is left unregistered.
    pub async fn start(&self, spec: LaunchSpec) -> Result<Launched> {
        let LaunchSpec {
            key,
            argv,
            work_dir,
            stdin,
            observer,
        } = spec;

        let program = argv
            .first()
            .cloned()
            .ok_or_else(|| StreamError::InvalidInput("empty argv".into()))?;

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (control_tx, control_rx) = mpsc::channel(4);

        match self.sessions.entry(key.clone()) {
            Entry::Occupied(_) => {
                tracing::warn!(key = %key, "start rejected, session already running");
                return Err(StreamError::AlreadyRunning(key));
            }
            Entry::Vacant(slot) => {
                slot.insert(Slot {
                    generation,
                    state: SessionState::ProcessStarting,
                    pid: None,
                    work_dir: work_dir.clone(),
                    started_at: Utc::now(),
                    control: control_tx,
                });
            }
        }

        let mut child = match spawn_child(&program, &argv[1..], &work_dir, &stdin).await {
            Ok(child) => child,
            Err(e) => {
                self.sessions.remove_if(&key, |_, s| s.generation == generation);
                tracing::error!(key = %key, program = %program, "failed to launch: {e}");
                return Err(StreamError::launch(&program, e.to_string()));
            }
        };

        let pid = child.id();
        if let Some(mut slot) = self.sessions.get_mut(&key) {
            if slot.generation == generation {
                slot.pid = pid;
                if slot.state == SessionState::ProcessStarting {
                    slot.state = SessionState::Streaming;
                }
            }
        }

        let observer = match stdin {
            StdinFeed::Closed => observer,
            StdinFeed::Immediately(payload) => {
                if let Some(pipe) = child.stdin.take() {
                    tokio::spawn(write_and_close(pipe, payload));
                }
                observer
            }
            StdinFeed::OnMarker { marker, payload } => child
                .stdin
                .take()
                .map(|pipe| Box::new(MarkerHook::feed_stdin(marker, pipe, payload)) as Box<dyn LineObserver>),
        };

        let tail = OutputTail::default();
        let drain = spawn_drain(
            key.to_string(),
            child.stdout.take(),
            child.stderr.take(),
            observer,
            tail.clone(),
        );

        tracing::info!(key = %key, pid = ?pid, work_dir = ?work_dir, "session started");

        let (exit_tx, exit_rx) = oneshot::channel();
        tokio::spawn(supervise(
            child,
            key.clone(),
            generation,
            self.sessions.clone(),
            control_rx,
            drain,
            tail,
            exit_tx,
        ));

        Ok(Launched {
            key,
            pid,
            exit: exit_rx,
        })
    }

    /// Stop the session under `key` with the default grace period.
    pub async fn stop(&self, key: &SessionKey, cancel: &CancellationToken) -> Result<StopOutcome> {
        self.stop_with_grace(key, self.default_grace, cancel).await
    }

    /// Stop the session under `key`: request termination, wait up to
    /// `grace`, then kill.
    ///
    /// A no-op for unregistered keys. When this returns `Ok`, the key is no
    /// longer registered.
    ///
    /// # Errors
    ///
    /// - [`StreamError::Interrupted`] if `cancel` fires while waiting. The
    ///   token stays cancelled and the owning task still finishes the
    ///   termination, kill included.
    /// - [`StreamError::ForceKill`] if the process could not be killed.
    pub async fn stop_with_grace(
        &self,
        key: &SessionKey,
        grace: Duration,
        cancel: &CancellationToken,
    ) -> Result<StopOutcome> {
        let control = match self.sessions.get_mut(key) {
            Some(mut slot) => {
                slot.state = SessionState::Stopping;
                slot.control.clone()
            }
            None => {
                tracing::debug!(key = %key, "stop requested for unregistered session");
                return Ok(StopOutcome::NotRunning);
            }
        };

        tracing::info!(key = %key, grace_ms = grace.as_millis() as u64, "stopping session");

        let (done_tx, done_rx) = oneshot::channel();
        if control
            .send(Control::Stop {
                grace,
                done: done_tx,
            })
            .await
            .is_err()
        {
            return Ok(StopOutcome::AlreadyExited);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::warn!(key = %key, "interrupted while waiting for session to stop");
                Err(StreamError::Interrupted(format!("stopping session '{key}'")))
            }
            outcome = done_rx => outcome.unwrap_or(Ok(StopOutcome::AlreadyExited)),
        }
    }

    /// Stop every registered session concurrently.
    pub async fn stop_all(&self, cancel: &CancellationToken) {
        let keys: Vec<SessionKey> = self.sessions.iter().map(|e| e.key().clone()).collect();
        let stops = keys.iter().map(|key| async move {
            if let Err(e) = self.stop(key, cancel).await {
                tracing::error!(key = %key, "failed to stop session: {e}");
            }
        });
        futures::future::join_all(stops).await;
    }

    pub fn contains(&self, key: &SessionKey) -> bool {
        self.sessions.contains_key(key)
    }

    pub fn state(&self, key: &SessionKey) -> Option<SessionState> {
        self.sessions.get(key).map(|s| s.state)
    }

    pub fn list(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self
            .sessions
            .iter()
            .map(|entry| SessionInfo {
                key: entry.key().clone(),
                state: entry.state,
                pid: entry.pid,
                work_dir: entry.work_dir.clone(),
                started_at: entry.started_at,
            })
            .collect();
        sessions.sort_by(|a, b| a.key.cmp(&b.key));
        sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

async fn spawn_child(
    program: &str,
    args: &[String],
    work_dir: &std::path::Path,
    stdin: &StdinFeed,
) -> std::io::Result<Child> {
    tokio::fs::create_dir_all(work_dir).await?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(work_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    match stdin {
        StdinFeed::Closed => cmd.stdin(Stdio::null()),
        _ => cmd.stdin(Stdio::piped()),
    };
    cmd.spawn()
}

#[allow(clippy::too_many_arguments)]
async fn supervise(
    mut child: Child,
    key: SessionKey,
    generation: u64,
    sessions: Arc<DashMap<SessionKey, Slot>>,
    mut control: mpsc::Receiver<Control>,
    drain: tokio::task::JoinHandle<()>,
    tail: OutputTail,
    exit_tx: oneshot::Sender<ExitReport>,
) {
    let mut stop_reply = None;

    let status = tokio::select! {
        status = child.wait() => status.ok(),
        Some(Control::Stop { grace, done }) = control.recv() => {
            let (status, outcome) = terminate(&mut child, &key, grace).await;
            stop_reply = Some((done, outcome));
            status
        }
    };

    if tokio::time::timeout(DRAIN_FLUSH, drain).await.is_err() {
        tracing::debug!(key = %key, "output still open after exit, leaving drain running");
    }

    let removed = sessions.remove_if(&key, |_, s| s.generation == generation).is_some();
    tracing::info!(
        key = %key,
        status = ?status,
        removed,
        "session terminated"
    );

    let stopped = stop_reply.is_some();
    if let Some((done, outcome)) = stop_reply {
        let _ = done.send(outcome);
    }

    let _ = exit_tx.send(ExitReport {
        key,
        status,
        stopped,
        tail: tail.lines(),
    });
}

/// Ask the child to exit, wait up to `grace`, then kill it.
async fn terminate(
    child: &mut Child,
    key: &SessionKey,
    grace: Duration,
) -> (Option<ExitStatus>, Result<StopOutcome>) {
    request_exit(child, key);

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => (Some(status), Ok(StopOutcome::Graceful)),
        Ok(Err(e)) => {
            tracing::warn!(key = %key, "wait failed during stop: {e}");
            force_kill(child, key).await
        }
        Err(_) => {
            tracing::warn!(
                key = %key,
                grace_ms = grace.as_millis() as u64,
                "session did not exit within grace period, killing"
            );
            force_kill(child, key).await
        }
    }
}

async fn force_kill(child: &mut Child, key: &SessionKey) -> (Option<ExitStatus>, Result<StopOutcome>) {
    match child.kill().await {
        Ok(()) => (child.try_wait().ok().flatten(), Ok(StopOutcome::Killed)),
        Err(e) => (
            None,
            Err(StreamError::ForceKill {
                key: key.clone(),
                message: e.to_string(),
            }),
        ),
    }
}

#[cfg(unix)]
fn request_exit(child: &mut Child, key: &SessionKey) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    match child.id() {
        Some(pid) => {
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                tracing::debug!(key = %key, "SIGTERM failed: {e}");
            }
        }
        None => tracing::debug!(key = %key, "process already reaped"),
    }
}

#[cfg(not(unix))]
fn request_exit(child: &mut Child, key: &SessionKey) {
    if let Err(e) = child.start_kill() {
        tracing::debug!(key = %key, "termination request failed: {e}");
    }
}
