//! Run Orchestration
//!
//! ```text
//! Configuration
//!       │
//!       ▼
//! ┌──────────────────┐  spawn failed ──────────────────► LaunchError
//! │ ServerSupervisor │
//! └────────┬─────────┘
//!          │ ProcessHandle ──► CleanupGuard
//!          ▼
//! ┌──────────────────┐  timeout / server died / signal ─┐
//! │    HealthGate    │                                  │
//! └────────┬─────────┘                                  │
//!          ▼                                            │
//! ┌──────────────────┐  client failed / signal ─────────┤
//! │ BenchmarkRunner  │                                  │
//! └────────┬─────────┘                                  │
//!          ▼                                            ▼
//!      CleanupGuard ◄───────────────────────────── (every path)
//! ```

use servebench_core::{Configuration, RunOutcome};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::cleanup::CleanupGuard;
use crate::health::{HealthGate, HealthStatus, Probe, TcpProbe};
use crate::interrupt::CancelToken;
use crate::metadata::MetadataServer;
use crate::report::RunSummary;
use crate::runner::{BenchmarkRunner, RunnerError};
use crate::settings::HarnessSettings;
use crate::supervisor::ServerSupervisor;

/// Drives one run from spawn to cleanup
#[derive(Debug, Clone)]
pub struct Harness {
    supervisor: ServerSupervisor,
    runner: BenchmarkRunner,
    gate: HealthGate,
    shutdown_timeout: Duration,
    metadata: bool,
    cancel: CancelToken,
}

impl Harness {
    /// Build a harness from settings
    pub fn new(settings: &HarnessSettings, cancel: CancelToken) -> anyhow::Result<Self> {
        let env = settings.exec_environment();
        Ok(Self {
            supervisor: ServerSupervisor::new(
                settings.server.program(),
                settings.server.log_file.clone(),
                env.clone(),
            ),
            runner: BenchmarkRunner::new(settings.client.program(), settings.client.output.clone(), env),
            gate: HealthGate::default(),
            shutdown_timeout: settings.shutdown_timeout()?,
            metadata: settings.metadata.enabled,
            cancel,
        })
    }

    /// Replace the health gate
    pub fn with_health_gate(mut self, gate: HealthGate) -> Self {
        self.gate = gate;
        self
    }

    /// Server launcher
    pub fn supervisor(&self) -> &ServerSupervisor {
        &self.supervisor
    }

    /// Client launcher
    pub fn runner(&self) -> &BenchmarkRunner {
        &self.runner
    }

    /// Run against the loopback endpoint at the configured port
    pub fn run(&self, config: &Configuration) -> RunSummary {
        let mut probe = TcpProbe::loopback(config.port());
        self.run_with_probe(config, &mut probe)
    }

    /// Run with a custom readiness probe
    pub fn run_with_probe(&self, config: &Configuration, probe: &mut dyn Probe) -> RunSummary {
        let mut summary = RunSummary::begin(
            config,
            self.supervisor.command(config).to_string(),
            self.runner.command(config).to_string(),
            self.supervisor.log_path(),
        );

        if self.cancel.is_cancelled() {
            summary.interrupted_by_signal = self.cancel.signal();
            return summary.finish(RunOutcome::Interrupted);
        }

        let mut guard = match self.supervisor.launch(config) {
            Ok(handle) => {
                summary.server_pid = Some(handle.pid());
                CleanupGuard::new(handle, self.shutdown_timeout)
            }
            Err(e) => {
                error!(error = %e, "server launch failed");
                CleanupGuard::empty()
            }
        };

        let outcome = if guard.handle().is_some() {
            let _metadata = self.start_metadata(config);
            self.drive(config, probe, &mut guard, &mut summary)
        } else {
            RunOutcome::LaunchError
        };

        match guard.cleanup() {
            Ok(action) => summary.cleanup = Some(action),
            Err(e) => {
                error!(error = %e, "cleanup failed");
                summary.cleanup_error = Some(e.to_string());
            }
        }
        summary.server_state = guard.handle().map(|h| h.state());
        if outcome == RunOutcome::Interrupted {
            summary.interrupted_by_signal = self.cancel.signal();
        }

        info!(%outcome, "run finished");
        summary.finish(outcome)
    }

    fn drive(
        &self,
        config: &Configuration,
        probe: &mut dyn Probe,
        guard: &mut CleanupGuard,
        summary: &mut RunSummary,
    ) -> RunOutcome {
        let health = self.gate.wait(probe, &self.cancel, || guard.server_running());
        summary.health_attempts = Some(health.attempts);

        match health.status {
            HealthStatus::Ready => {}
            HealthStatus::TimedOut => {
                error!(
                    attempts = health.attempts,
                    log = %self.supervisor.log_path().display(),
                    "server did not become reachable"
                );
                return RunOutcome::HealthTimeout;
            }
            HealthStatus::ServerExited => {
                let status = guard.handle().and_then(|h| h.exit_status());
                error!(
                    status = ?status,
                    log = %self.supervisor.log_path().display(),
                    "server exited before becoming ready"
                );
                return RunOutcome::LaunchError;
            }
            HealthStatus::Interrupted => return RunOutcome::Interrupted,
        }

        match self.runner.run(config, &self.cancel) {
            Ok(run) => {
                summary.client_exit_code = run.status.code();
                RunOutcome::Success
            }
            Err(RunnerError::Interrupted) => RunOutcome::Interrupted,
            Err(RunnerError::Failed { status }) => {
                error!(%status, "benchmark failed");
                summary.client_exit_code = status.code();
                RunOutcome::BenchmarkError
            }
            Err(e) => {
                error!(error = %e, "benchmark failed");
                RunOutcome::BenchmarkError
            }
        }
    }

    fn start_metadata(&self, config: &Configuration) -> Option<MetadataServer> {
        if !self.metadata {
            return None;
        }
        let Some(port) = config.metadata_port() else {
            warn!("no port left for the metadata server");
            return None;
        };
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
        match MetadataServer::start(addr, config) {
            Ok(server) => Some(server),
            Err(e) => {
                warn!(%addr, error = %e, "metadata server not started");
                None
            }
        }
    }
}
