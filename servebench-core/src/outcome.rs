//! Run Outcomes

use serde::{Deserialize, Serialize};
use std::fmt;

/// Terminal status of a harness run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunOutcome {
    /// Benchmark client finished successfully
    Success,
    /// Missing, unknown or invalid option; nothing was spawned
    ConfigError,
    /// The serving process could not be started or died before it was ready
    LaunchError,
    /// The endpoint never became reachable within the retry budget
    HealthTimeout,
    /// The benchmark client failed
    BenchmarkError,
    /// The harness received a termination signal
    Interrupted,
}

impl RunOutcome {
    /// Process exit code: 0 on success, 1 for every failure kind
    pub fn exit_code(self) -> i32 {
        match self {
            RunOutcome::Success => 0,
            _ => 1,
        }
    }

    /// Whether the run succeeded
    pub fn is_success(self) -> bool {
        matches!(self, RunOutcome::Success)
    }

    /// Stable lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            RunOutcome::Success => "success",
            RunOutcome::ConfigError => "config-error",
            RunOutcome::LaunchError => "launch-error",
            RunOutcome::HealthTimeout => "health-timeout",
            RunOutcome::BenchmarkError => "benchmark-error",
            RunOutcome::Interrupted => "interrupted",
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a single reachability probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProbeOutcome {
    /// A connection to the endpoint was established
    Ready,
    /// The connection attempt failed
    Unreachable,
}

/// One polling attempt of the health gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    /// 1-based attempt number
    pub attempt: u32,
    /// What the probe observed
    pub outcome: ProbeOutcome,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(RunOutcome::Success.exit_code(), 0);
        for outcome in [
            RunOutcome::ConfigError,
            RunOutcome::LaunchError,
            RunOutcome::HealthTimeout,
            RunOutcome::BenchmarkError,
            RunOutcome::Interrupted,
        ] {
            assert_eq!(outcome.exit_code(), 1, "{}", outcome);
            assert!(!outcome.is_success());
        }
    }

    #[test]
    fn test_serialized_names_match_display() {
        let json = serde_json::to_string(&RunOutcome::HealthTimeout).unwrap();
        assert_eq!(json, "\"health-timeout\"");
        assert_eq!(RunOutcome::HealthTimeout.to_string(), "health-timeout");
    }
}
