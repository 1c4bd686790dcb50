#![warn(missing_docs)]
//! # ServeBench
//!
//! Benchmark harness for disaggregated LLM serving engines.
//!
//! A run resolves its configuration from the command line, launches the
//! engine with a fixed block-cache and batching layout, waits (at most 30
//! one-second probes) until the engine's port accepts connections, runs the
//! benchmark client with the latency targets, and stops the engine on every
//! exit path: success, failure, timeout, or a termination signal.
//!
//! ## Quick Start
//!
//! ```text
//! servebench --model facebook/opt-13b --gpu-memory-util 0.9 \
//!     --dataset sharegpt.json --context-tp 2
//! ```
//!
//! Engine/client invocation, log locations and the runtime environment are
//! configured in `servebench.toml`.

// Re-export core types
pub use servebench_core::{
    ConfigError, Configuration, ConfigurationBuilder, ExecEnvironment, HealthCheckResult,
    LaunchCommand, ProbeOutcome, Program, RunOutcome, StageParallelism,
};

// Re-export orchestration
pub use servebench_cli::{
    BenchmarkRunner, CancelToken, CleanupAction, CleanupGuard, Harness, HarnessSettings,
    HealthGate, HealthStatus, ProcessHandle, ProcessState, Probe, RunSummary, ServerSupervisor,
    TcpProbe, resolve_args,
};

/// Run the ServeBench CLI.
///
/// ```ignore
/// fn main() {
///     std::process::exit(servebench::run().exit_code());
/// }
/// ```
pub use servebench_cli::run;
