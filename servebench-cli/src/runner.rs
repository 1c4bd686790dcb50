//! Benchmark Runner
//!
//! Runs the benchmark client in the foreground once the server is ready.
//! The client's exit status is the run's verdict: a non-zero exit becomes
//! [`RunnerError::Failed`].

use servebench_core::{Configuration, ExecEnvironment, LaunchCommand, Program};
use std::io;
#[cfg(unix)]
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

use crate::interrupt::{CANCEL_POLL_SLICE, CancelToken};
use crate::supervisor::{Signal, signal_child, wait_with_timeout};

/// Grace period for the client after it is asked to stop
const CLIENT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors raised while running the benchmark client
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The client could not be started
    #[error("failed to spawn benchmark client {program}: {source}")]
    SpawnFailed {
        /// Executable that failed
        program: String,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// The client exited unsuccessfully
    #[error("benchmark client failed: {status}")]
    Failed {
        /// Exit status of the client
        status: ExitStatus,
    },

    /// The run was cancelled while the client was running
    #[error("benchmark client interrupted")]
    Interrupted,

    /// Waiting on or signalling the client failed
    #[error("lost track of benchmark client: {0}")]
    Wait(#[from] io::Error),
}

/// A completed client run
#[derive(Debug, Clone, Copy)]
pub struct ClientRun {
    /// Exit status of the client
    pub status: ExitStatus,
    /// Wall-clock duration of the run
    pub elapsed: Duration,
}

/// Invokes the benchmark client
#[derive(Debug, Clone)]
pub struct BenchmarkRunner {
    program: Program,
    results_path: PathBuf,
    env: ExecEnvironment,
}

impl BenchmarkRunner {
    /// Create a runner for `program`, writing results to `results_path`
    pub fn new(program: Program, results_path: impl Into<PathBuf>, env: ExecEnvironment) -> Self {
        Self {
            program,
            results_path: results_path.into(),
            env,
        }
    }

    /// Where the client writes its per-request results
    pub fn results_path(&self) -> &Path {
        &self.results_path
    }

    /// Command line that [`BenchmarkRunner::run`] would execute
    pub fn command(&self, config: &Configuration) -> LaunchCommand {
        LaunchCommand::client(config, &self.program, &self.results_path, self.env.clone())
    }

    /// Run the client to completion, or stop it if `cancel` fires.
    pub fn run(&self, config: &Configuration, cancel: &CancelToken) -> Result<ClientRun, RunnerError> {
        let command = self.command(config);

        if let Some(parent) = self.results_path.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    warn!(dir = %parent.display(), error = %e, "cannot create results directory");
                }
            }
        }

        info!(command = %command, "starting benchmark client");
        let start = Instant::now();
        let mut cmd = Command::new(command.program());
        cmd.args(command.args())
            .envs(command.env().iter())
            .stdin(Stdio::null());
        // Own group: a terminal Ctrl-C reaches only the harness, which then
        // stops the client itself.
        #[cfg(unix)]
        cmd.process_group(0);
        let mut child = cmd
            .spawn()
            .map_err(|source| RunnerError::SpawnFailed {
                program: command.program().to_string(),
                source,
            })?;

        loop {
            if let Some(status) = child.try_wait()? {
                let elapsed = start.elapsed();
                if status.success() {
                    info!(elapsed = ?elapsed, "benchmark client finished");
                    return Ok(ClientRun { status, elapsed });
                }
                if cancel.is_cancelled() {
                    warn!(%status, "benchmark client exited after interruption");
                    return Err(RunnerError::Interrupted);
                }
                return Err(RunnerError::Failed { status });
            }
            if cancel.is_cancelled() {
                warn!(pid = child.id(), "stopping benchmark client");
                signal_child(&mut child, Signal::Terminate, false)?;
                if wait_with_timeout(&mut child, CLIENT_STOP_TIMEOUT)?.is_none() {
                    child.kill()?;
                    child.wait()?;
                }
                return Err(RunnerError::Interrupted);
            }
            std::thread::sleep(CANCEL_POLL_SLICE);
        }
    }
}
