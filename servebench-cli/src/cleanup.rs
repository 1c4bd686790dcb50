//! Cleanup Guard
//!
//! Owns the [`ProcessHandle`] for the rest of the run and terminates the
//! serving process exactly once: explicitly through
//! [`CleanupGuard::cleanup`], or from `Drop` if the run unwinds before
//! reaching it. Termination is SIGTERM to the process group, a bounded
//! wait, then SIGKILL.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::supervisor::{ProcessHandle, ProcessState};

/// Default grace period between SIGTERM and SIGKILL
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// How long to wait for the process to be reaped after SIGKILL
const KILL_WAIT: Duration = Duration::from_secs(5);

/// Cleanup could not confirm termination; logged, never fatal
#[derive(Debug, Error)]
pub enum CleanupError {
    /// The process was still running after SIGKILL and the wait
    #[error("server process {pid} did not confirm exit after SIGKILL")]
    NotConfirmed {
        /// Process id
        pid: u32,
    },
}

/// What a cleanup invocation did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CleanupAction {
    /// No process was ever started
    NothingToDo,
    /// The process had already exited; no signal was sent
    AlreadyExited,
    /// The process exited after SIGTERM
    Terminated,
    /// The process had to be killed after the grace period
    Killed,
}

/// Exit-path-independent terminator of the serving process
#[derive(Debug)]
pub struct CleanupGuard {
    handle: Option<ProcessHandle>,
    grace: Duration,
    attempted: bool,
}

impl CleanupGuard {
    /// Guard a running process
    pub fn new(handle: ProcessHandle, grace: Duration) -> Self {
        Self {
            handle: Some(handle),
            grace,
            attempted: false,
        }
    }

    /// Guard with nothing to clean up (spawn never succeeded)
    pub fn empty() -> Self {
        Self {
            handle: None,
            grace: DEFAULT_SHUTDOWN_TIMEOUT,
            attempted: false,
        }
    }

    /// The guarded process, if any
    pub fn handle(&self) -> Option<&ProcessHandle> {
        self.handle.as_ref()
    }

    /// Poll the guarded process; `false` if there is none or it exited
    pub fn server_running(&mut self) -> bool {
        self.handle.as_mut().is_some_and(|h| h.is_running())
    }

    /// Terminate the guarded process if it is still running.
    ///
    /// Idempotent: only the first invocation may send signals. Later calls
    /// re-observe the process and report [`CleanupAction::AlreadyExited`].
    pub fn cleanup(&mut self) -> Result<CleanupAction, CleanupError> {
        let Some(handle) = self.handle.as_mut() else {
            return Ok(CleanupAction::NothingToDo);
        };
        let pid = handle.pid();

        if self.attempted {
            return match handle.poll() {
                ProcessState::Exited => Ok(CleanupAction::AlreadyExited),
                ProcessState::Running => Err(CleanupError::NotConfirmed { pid }),
            };
        }
        self.attempted = true;

        if handle.poll() == ProcessState::Exited {
            info!(pid, "server process already exited");
            return Ok(CleanupAction::AlreadyExited);
        }

        info!(pid, grace = ?self.grace, "stopping server process");
        if let Err(e) = handle.terminate() {
            warn!(pid, error = %e, "failed to send SIGTERM");
        }
        if handle.wait_for_exit(self.grace) {
            info!(pid, "server process stopped");
            return Ok(CleanupAction::Terminated);
        }

        warn!(pid, "server process ignored SIGTERM, sending SIGKILL");
        if let Err(e) = handle.kill() {
            warn!(pid, error = %e, "failed to send SIGKILL");
        }
        if handle.wait_for_exit(KILL_WAIT) {
            info!(pid, "server process killed");
            Ok(CleanupAction::Killed)
        } else {
            Err(CleanupError::NotConfirmed { pid })
        }
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if self.attempted {
            return;
        }
        if let Err(e) = self.cleanup() {
            error!(error = %e, "cleanup failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::ServerSupervisor;
    use servebench_core::{Configuration, ExecEnvironment, Program};
    use std::time::Instant;

    fn spawn(script: &str, dir: &tempfile::TempDir) -> ProcessHandle {
        let config = Configuration::builder("m", 0.9, "d.json").build().unwrap();
        ServerSupervisor::new(
            Program::new("sh", ["-c", script, "server"]),
            dir.path().join("server.log"),
            ExecEnvironment::new(),
        )
        .launch(&config)
        .unwrap()
    }

    #[test]
    fn test_empty_guard_is_noop() {
        let mut guard = CleanupGuard::empty();
        assert_eq!(guard.cleanup().unwrap(), CleanupAction::NothingToDo);
        assert_eq!(guard.cleanup().unwrap(), CleanupAction::NothingToDo);
        assert!(!guard.server_running());
    }

    #[test]
    fn test_terminates_running_process() {
        let dir = tempfile::tempdir().unwrap();
        let mut guard = CleanupGuard::new(spawn("sleep 30", &dir), Duration::from_secs(10));
        assert!(guard.server_running());

        assert_eq!(guard.cleanup().unwrap(), CleanupAction::Terminated);
        let handle = guard.handle().unwrap();
        assert_eq!(handle.state(), ProcessState::Exited);
        assert_eq!(handle.termination_signals(), 1);
    }

    #[test]
    fn test_repeated_cleanup_signals_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut guard = CleanupGuard::new(spawn("sleep 30", &dir), Duration::from_secs(10));

        assert_eq!(guard.cleanup().unwrap(), CleanupAction::Terminated);
        for _ in 0..5 {
            assert_eq!(guard.cleanup().unwrap(), CleanupAction::AlreadyExited);
        }
        assert_eq!(guard.handle().unwrap().termination_signals(), 1);
    }

    #[test]
    fn test_already_exited_is_not_signaled() {
        let dir = tempfile::tempdir().unwrap();
        let mut handle = spawn("exit 0", &dir);
        assert!(handle.wait_for_exit(Duration::from_secs(10)));

        let mut guard = CleanupGuard::new(handle, Duration::from_secs(10));
        assert_eq!(guard.cleanup().unwrap(), CleanupAction::AlreadyExited);
        assert_eq!(guard.handle().unwrap().termination_signals(), 0);
    }

    #[test]
    fn test_escalates_to_kill() {
        let dir = tempfile::tempdir().unwrap();
        let ready = dir.path().join("trap-installed");
        let script = format!(
            "trap '' TERM; touch {}; while true; do sleep 1; done",
            ready.display()
        );
        let handle = spawn(&script, &dir);

        let deadline = Instant::now() + Duration::from_secs(10);
        while !ready.exists() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }

        let mut guard = CleanupGuard::new(handle, Duration::from_millis(200));
        assert_eq!(guard.cleanup().unwrap(), CleanupAction::Killed);
        assert_eq!(guard.handle().unwrap().state(), ProcessState::Exited);
        assert_eq!(guard.handle().unwrap().termination_signals(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_drop_stops_process() {
        let dir = tempfile::tempdir().unwrap();
        let handle = spawn("sleep 30", &dir);
        let pid = handle.pid();
        drop(CleanupGuard::new(handle, Duration::from_secs(10)));

        // Reaped by the guard; signal 0 only probes for existence.
        let alive = unsafe { libc::kill(pid as libc::pid_t, 0) } == 0;
        assert!(!alive);
    }
}
