//! Server Supervisor
//!
//! Starts the serving engine as a detached child in its own process group,
//! with stdout and stderr both redirected to a per-run log file, and hands
//! back a [`ProcessHandle`]. Readiness is not awaited here; that is the
//! health gate's job.

use serde::{Deserialize, Serialize};
use servebench_core::{Configuration, ExecEnvironment, LaunchCommand, Program};
use std::fs::File;
use std::io;
#[cfg(unix)]
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

use crate::interrupt::CANCEL_POLL_SLICE;

/// Errors raised while launching the serving process
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The log file could not be created
    #[error("failed to open server log {}: {source}", path.display())]
    LogSink {
        /// Log file path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// The process could not be started
    #[error("failed to spawn {program}: {source}")]
    SpawnFailed {
        /// Executable that failed
        program: String,
        /// Underlying error
        #[source]
        source: io::Error,
    },
}

/// Liveness of a supervised process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProcessState {
    /// Not yet observed to exit
    Running,
    /// Reaped
    Exited,
}

/// Termination request sent to a child
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Signal {
    /// SIGTERM
    Terminate,
    /// SIGKILL
    Kill,
}

#[cfg(unix)]
impl Signal {
    fn raw(self) -> libc::c_int {
        match self {
            Signal::Terminate => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        }
    }
}

/// Send `sig` to a process, or to its whole group when `group` is set.
///
/// A target that no longer exists is not an error.
#[cfg(unix)]
pub(crate) fn send_signal(pid: u32, sig: libc::c_int, group: bool) -> io::Result<()> {
    let target = if group {
        -(pid as libc::pid_t)
    } else {
        pid as libc::pid_t
    };
    let ret = unsafe { libc::kill(target, sig) };
    if ret == -1 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(());
        }
        return Err(err);
    }
    Ok(())
}

/// Deliver `sig` to `child` (and its group when `group` is set).
#[cfg(unix)]
pub(crate) fn signal_child(child: &mut Child, sig: Signal, group: bool) -> io::Result<()> {
    send_signal(child.id(), sig.raw(), group)
}

/// No graceful termination on non-Unix; every request kills the child.
#[cfg(not(unix))]
pub(crate) fn signal_child(child: &mut Child, _sig: Signal, _group: bool) -> io::Result<()> {
    child.kill()
}

/// Poll `child` until it exits or `timeout` passes. Returns the exit status
/// if the child was reaped.
pub(crate) fn wait_with_timeout(
    child: &mut Child,
    timeout: Duration,
) -> io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(None);
        }
        std::thread::sleep(remaining.min(CANCEL_POLL_SLICE));
    }
}

/// Handle to the supervised serving process
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    pid: u32,
    log_path: PathBuf,
    state: ProcessState,
    exit_status: Option<ExitStatus>,
    term_signals: u32,
}

impl ProcessHandle {
    /// OS process id (also the process group id)
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// File receiving the combined output of the process
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Last observed liveness, without polling
    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Exit status, once the process has been reaped
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    /// Number of SIGTERMs sent to the process
    pub fn termination_signals(&self) -> u32 {
        self.term_signals
    }

    /// Observe the process and update the liveness state.
    ///
    /// A failed `try_wait` leaves the state untouched; the process is never
    /// assumed dead without being reaped.
    pub fn poll(&mut self) -> ProcessState {
        if self.state == ProcessState::Running {
            match self.child.try_wait() {
                Ok(Some(status)) => self.mark_exited(status),
                Ok(None) => {}
                Err(e) => debug!(pid = self.pid, error = %e, "try_wait failed"),
            }
        }
        self.state
    }

    /// Whether the process is still running (polls first)
    pub fn is_running(&mut self) -> bool {
        self.poll() == ProcessState::Running
    }

    /// Send SIGTERM to the process group
    pub(crate) fn terminate(&mut self) -> io::Result<()> {
        self.term_signals += 1;
        signal_child(&mut self.child, Signal::Terminate, true)
    }

    /// Send SIGKILL to the process group
    pub(crate) fn kill(&mut self) -> io::Result<()> {
        signal_child(&mut self.child, Signal::Kill, true)
    }

    /// Block up to `timeout` for the process to exit.
    pub(crate) fn wait_for_exit(&mut self, timeout: Duration) -> bool {
        if self.state == ProcessState::Exited {
            return true;
        }
        match wait_with_timeout(&mut self.child, timeout) {
            Ok(Some(status)) => {
                self.mark_exited(status);
                true
            }
            Ok(None) => false,
            Err(e) => {
                debug!(pid = self.pid, error = %e, "wait failed");
                false
            }
        }
    }

    fn mark_exited(&mut self, status: ExitStatus) {
        debug!(pid = self.pid, %status, "server process exited");
        self.state = ProcessState::Exited;
        self.exit_status = Some(status);
    }
}

/// Launches the serving process
#[derive(Debug, Clone)]
pub struct ServerSupervisor {
    program: Program,
    log_path: PathBuf,
    env: ExecEnvironment,
}

impl ServerSupervisor {
    /// Create a supervisor for `program`, logging to `log_path`
    pub fn new(program: Program, log_path: impl Into<PathBuf>, env: ExecEnvironment) -> Self {
        Self {
            program,
            log_path: log_path.into(),
            env,
        }
    }

    /// Log file of the serving process
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Command line that [`ServerSupervisor::launch`] would run
    pub fn command(&self, config: &Configuration) -> LaunchCommand {
        LaunchCommand::server(config, &self.program, self.env.clone())
    }

    /// Spawn the serving process without waiting for it to become ready.
    pub fn launch(&self, config: &Configuration) -> Result<ProcessHandle, SupervisorError> {
        let command = self.command(config);
        let (stdout, stderr) = self.open_log()?;

        info!(command = %command, log = %self.log_path.display(), "starting server");

        let mut cmd = Command::new(command.program());
        cmd.args(command.args())
            .envs(command.env().iter())
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr);
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(|source| SupervisorError::SpawnFailed {
            program: command.program().to_string(),
            source,
        })?;
        let pid = child.id();
        info!(pid, "server process started");

        Ok(ProcessHandle {
            child,
            pid,
            log_path: self.log_path.clone(),
            state: ProcessState::Running,
            exit_status: None,
            term_signals: 0,
        })
    }

    /// Truncate the log file and return two handles to it.
    fn open_log(&self) -> Result<(File, File), SupervisorError> {
        let sink_err = |source| SupervisorError::LogSink {
            path: self.log_path.clone(),
            source,
        };
        if let Some(parent) = self.log_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(sink_err)?;
            }
        }
        let stdout = File::create(&self.log_path).map_err(sink_err)?;
        let stderr = stdout.try_clone().map_err(sink_err)?;
        Ok((stdout, stderr))
    }
}
