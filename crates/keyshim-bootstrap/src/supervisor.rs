// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Server process supervision.
//!
//! The secrets server runs as a detached child that outlives the invocation
//! that started it. Warm invocations reuse it; a child that has exited is
//! noticed lazily (non-blocking `try_wait`) the next time `start` is called
//! and replaced. The supervisor never reads the child's output: stdout and
//! stderr are inherited so the platform's log capture picks them up.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use chrono::{DateTime, Utc};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Spawn attempts when the executable is still held open for writing.
const TEXT_BUSY_ATTEMPTS: u32 = 3;

/// Lifecycle state of the server process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Spawned, not yet answering its health endpoint.
    Starting,
    /// Answered its health endpoint at least once.
    Ready,
    /// Exited with a success status.
    Exited,
    /// Exited with a failure status or was killed by a signal.
    Crashed,
}

impl ProcessState {
    /// Whether the process is still expected to be running.
    pub fn is_live(&self) -> bool {
        matches!(self, ProcessState::Starting | ProcessState::Ready)
    }
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessState::Starting => write!(f, "starting"),
            ProcessState::Ready => write!(f, "ready"),
            ProcessState::Exited => write!(f, "exited"),
            ProcessState::Crashed => write!(f, "crashed"),
        }
    }
}

/// Snapshot of the supervised process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildProcessHandle {
    /// Process ID (also the process group ID)
    pub pid: u32,
    /// Executable followed by its arguments
    pub command_line: Vec<String>,
    /// When the process was spawned
    pub started_at: DateTime<Utc>,
    /// Last observed state
    pub state: ProcessState,
}

struct ManagedChild {
    handle: ChildProcessHandle,
    child: Child,
}

/// Owns the server child process for the lifetime of the environment.
#[derive(Default)]
pub struct ProcessSupervisor {
    current: Option<ManagedChild>,
    spawn_count: u32,
}

impl ProcessSupervisor {
    /// Create a supervisor with no child.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of processes spawned so far.
    pub fn spawn_count(&self) -> u32 {
        self.spawn_count
    }

    /// Current handle, without checking liveness.
    pub fn handle(&self) -> Option<&ChildProcessHandle> {
        self.current.as_ref().map(|managed| &managed.handle)
    }

    /// Check whether the child has exited and update its state.
    pub fn refresh(&mut self) -> Option<&ChildProcessHandle> {
        let managed = self.current.as_mut()?;
        if managed.handle.state.is_live() {
            match managed.child.try_wait() {
                Ok(Some(status)) => {
                    managed.handle.state = if status.success() {
                        ProcessState::Exited
                    } else {
                        ProcessState::Crashed
                    };
                    warn!(
                        pid = managed.handle.pid,
                        status = %status,
                        state = %managed.handle.state,
                        "Server process is no longer running"
                    );
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(pid = managed.handle.pid, error = %e, "Could not check server process status");
                }
            }
        }
        Some(&managed.handle)
    }

    /// Start the server unless a live one already exists.
    ///
    /// Returns the existing handle when the current child is still running;
    /// otherwise spawns `executable` with `args` in its own process group.
    pub fn start(&mut self, executable: &Path, args: &[String]) -> Result<ChildProcessHandle> {
        if let Some(handle) = self.refresh()
            && handle.state.is_live()
        {
            debug!(pid = handle.pid, state = %handle.state, "Server process already running");
            return Ok(handle.clone());
        }

        let mut command_line = vec![executable.display().to_string()];
        command_line.extend(args.iter().cloned());

        let child = spawn_detached(executable, args)?;
        let pid = child.id().ok_or_else(|| Error::Spawn {
            executable: executable.display().to_string(),
            reason: "process exited before its pid could be read".to_string(),
        })?;

        let handle = ChildProcessHandle {
            pid,
            command_line,
            started_at: Utc::now(),
            state: ProcessState::Starting,
        };
        self.spawn_count += 1;
        info!(
            pid,
            command = %handle.command_line.join(" "),
            spawn_count = self.spawn_count,
            "Server process started"
        );

        self.current = Some(ManagedChild {
            handle: handle.clone(),
            child,
        });
        Ok(handle)
    }

    /// Record that the server answered its health endpoint.
    pub fn mark_ready(&mut self) {
        if let Some(managed) = self.current.as_mut()
            && managed.handle.state == ProcessState::Starting
        {
            managed.handle.state = ProcessState::Ready;
            info!(pid = managed.handle.pid, "Server process ready");
        }
    }

    /// Stop the server: SIGTERM to its process group, SIGKILL after `grace`.
    ///
    /// Only called when the runtime itself is going away.
    pub async fn shutdown(&mut self, grace: Duration) {
        let Some(mut managed) = self.current.take() else {
            return;
        };
        if !managed.handle.state.is_live() {
            return;
        }

        let pgid = Pid::from_raw(managed.handle.pid as i32);
        if let Err(e) = signal::killpg(pgid, Signal::SIGTERM) {
            warn!(pid = managed.handle.pid, error = %e, "Failed to signal server process group");
        }

        match tokio::time::timeout(grace, managed.child.wait()).await {
            Ok(Ok(status)) => {
                info!(pid = managed.handle.pid, status = %status, "Server process stopped");
            }
            Ok(Err(e)) => {
                warn!(pid = managed.handle.pid, error = %e, "Failed to wait for server process");
            }
            Err(_) => {
                warn!(
                    pid = managed.handle.pid,
                    grace_ms = grace.as_millis() as u64,
                    "Server process ignored SIGTERM, killing"
                );
                let _ = signal::killpg(pgid, Signal::SIGKILL);
                let _ = managed.child.wait().await;
            }
        }
    }
}

fn spawn_detached(executable: &Path, args: &[String]) -> Result<Child> {
    let mut attempt = 1;
    loop {
        let mut cmd = Command::new(executable);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .process_group(0)
            .kill_on_drop(false);

        match cmd.spawn() {
            Ok(child) => return Ok(child),
            // A freshly written executable can briefly be held open by a
            // concurrently forked process.
            Err(e) if e.raw_os_error() == Some(Errno::ETXTBSY as i32) && attempt < TEXT_BUSY_ATTEMPTS => {
                debug!(attempt, executable = %executable.display(), "Executable busy, retrying spawn");
                attempt += 1;
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(e) => {
                let reason = match e.kind() {
                    std::io::ErrorKind::NotFound => "executable not found".to_string(),
                    std::io::ErrorKind::PermissionDenied => "executable is not runnable".to_string(),
                    _ => e.to_string(),
                };
                return Err(Error::Spawn {
                    executable: executable.display().to_string(),
                    reason,
                });
            }
        }
    }
}
