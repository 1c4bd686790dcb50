//! Run Report
//!
//! A [`RunSummary`] records what happened in one harness run. It is always
//! produced; it is written to disk as JSON only when `[report] path` is set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use servebench_core::{Configuration, RunOutcome};
use std::path::{Path, PathBuf};

use crate::cleanup::CleanupAction;
use crate::supervisor::ProcessState;

/// Version of the report layout
pub const REPORT_SCHEMA_VERSION: u32 = 1;

/// Record of a single run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Report layout version
    pub schema_version: u32,
    /// Harness version
    pub version: String,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run finished
    pub finished_at: Option<DateTime<Utc>>,
    /// Terminal status
    pub outcome: RunOutcome,
    /// Exit code of the harness
    pub exit_code: i32,
    /// Resolved configuration
    pub config: Configuration,
    /// Server command line
    pub server_command: String,
    /// Client command line
    pub client_command: String,
    /// Combined output of the server
    pub server_log: PathBuf,
    /// Server process id, if it was spawned
    pub server_pid: Option<u32>,
    /// Server liveness after cleanup
    pub server_state: Option<ProcessState>,
    /// Probes performed by the health gate
    pub health_attempts: Option<u32>,
    /// Exit code of the benchmark client
    pub client_exit_code: Option<i32>,
    /// What cleanup did
    pub cleanup: Option<CleanupAction>,
    /// Why cleanup could not confirm termination
    pub cleanup_error: Option<String>,
    /// Signal that interrupted the run
    pub interrupted_by_signal: Option<i32>,
}

impl RunSummary {
    pub(crate) fn begin(
        config: &Configuration,
        server_command: String,
        client_command: String,
        server_log: &Path,
    ) -> Self {
        Self {
            schema_version: REPORT_SCHEMA_VERSION,
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: Utc::now(),
            finished_at: None,
            outcome: RunOutcome::Success,
            exit_code: 0,
            config: config.clone(),
            server_command,
            client_command,
            server_log: server_log.to_path_buf(),
            server_pid: None,
            server_state: None,
            health_attempts: None,
            client_exit_code: None,
            cleanup: None,
            cleanup_error: None,
            interrupted_by_signal: None,
        }
    }

    pub(crate) fn finish(mut self, outcome: RunOutcome) -> Self {
        self.outcome = outcome;
        self.exit_code = outcome.exit_code();
        self.finished_at = Some(Utc::now());
        self
    }
}

/// Write `summary` as pretty JSON, creating parent directories.
pub fn write_run_report(path: &Path, summary: &RunSummary) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(summary)?;
    std::fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_report() {
        let dir = tempfile::tempdir().unwrap();
        let config = Configuration::builder("m", 0.9, "d.json").build().unwrap();
        let mut summary = RunSummary::begin(
            &config,
            "python -m engine".into(),
            "python client.py".into(),
            Path::new("logs/server.log"),
        );
        summary.health_attempts = Some(30);
        summary.cleanup = Some(CleanupAction::Terminated);
        let summary = summary.finish(RunOutcome::HealthTimeout);

        let path = dir.path().join("reports/run.json");
        write_run_report(&path, &summary).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["outcome"], "health-timeout");
        assert_eq!(json["exit_code"], 1);
        assert_eq!(json["health_attempts"], 30);
        assert_eq!(json["cleanup"], "terminated");
        assert_eq!(json["config"]["model"], "m");
        assert!(json["finished_at"].is_string());
    }
}
