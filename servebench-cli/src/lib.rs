#![warn(missing_docs)]
//! ServeBench CLI Library
//!
//! Orchestrates one benchmark run against a disaggregated serving engine:
//! resolve the configuration, launch the engine, wait until its endpoint
//! accepts connections, run the benchmark client, and always stop the
//! engine afterwards.
//!
//! # Example
//!
//! ```ignore
//! fn main() {
//!     std::process::exit(servebench_cli::run().exit_code());
//! }
//! ```

mod cleanup;
mod harness;
mod health;
mod interrupt;
mod metadata;
mod report;
mod resolve;
mod runner;
mod settings;
mod supervisor;

pub use cleanup::{CleanupAction, CleanupError, CleanupGuard, DEFAULT_SHUTDOWN_TIMEOUT};
pub use harness::Harness;
pub use health::{
    HEALTH_CHECK_INTERVAL, HEALTH_CHECK_MAX_ATTEMPTS, HealthGate, HealthReport, HealthStatus,
    PROBE_CONNECT_TIMEOUT, Probe, TcpProbe,
};
pub use interrupt::CancelToken;
pub use metadata::MetadataServer;
pub use report::{REPORT_SCHEMA_VERSION, RunSummary, write_run_report};
pub use resolve::{DUMMY_WEIGHTS_ENV, Invocation, ResolveError, resolve_args, resolve_args_with_env};
pub use runner::{BenchmarkRunner, ClientRun, RunnerError};
pub use settings::{
    ClientSettings, EnvironmentSettings, HarnessSettings, MetadataSettings, ReportSettings,
    SETTINGS_FILE_NAME, ServerSettings, parse_duration,
};
pub use supervisor::{ProcessHandle, ProcessState, ServerSupervisor, SupervisorError};

use clap::Parser;
use servebench_core::{
    DEFAULT_BASE_TPOT, DEFAULT_BASE_TTFT, DEFAULT_PARALLEL_SIZE, DEFAULT_PORT, RunOutcome,
};
use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

/// ServeBench CLI arguments
#[derive(Parser, Debug)]
#[command(name = "servebench")]
#[command(
    author,
    version,
    about = "ServeBench - launch a serving engine, benchmark it, tear it down"
)]
pub struct Cli {
    /// Model identifier, also used as the tokenizer
    #[arg(long)]
    pub model: String,

    /// Fraction of GPU memory the engine may use, in (0, 1]
    #[arg(long)]
    pub gpu_memory_util: f64,

    /// Benchmark dataset passed to the client
    #[arg(long)]
    pub dataset: PathBuf,

    /// Baseline time-to-first-token target, in seconds
    #[arg(long, default_value_t = DEFAULT_BASE_TTFT)]
    pub base_ttft: f64,

    /// Baseline time-per-output-token target, in seconds
    #[arg(long, default_value_t = DEFAULT_BASE_TPOT)]
    pub base_tpot: f64,

    /// Loopback port of the served endpoint
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Context-stage tensor parallel size
    #[arg(long, default_value_t = DEFAULT_PARALLEL_SIZE)]
    pub context_tp: u32,

    /// Context-stage pipeline parallel size
    #[arg(long, default_value_t = DEFAULT_PARALLEL_SIZE)]
    pub context_pp: u32,

    /// Decoding-stage tensor parallel size
    #[arg(long, default_value_t = DEFAULT_PARALLEL_SIZE)]
    pub decoding_tp: u32,

    /// Decoding-stage pipeline parallel size
    #[arg(long, default_value_t = DEFAULT_PARALLEL_SIZE)]
    pub decoding_pp: u32,

    /// Serve with dummy weights (also enabled by USE_DUMMY_WEIGHT=1)
    #[arg(long)]
    pub use_dummy_weights: bool,

    /// Harness settings file; defaults to a discovered servebench.toml
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Print the server and client commands without running anything
    #[arg(long)]
    pub dry_run: bool,

    /// Verbose harness logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// Run the harness with the process arguments.
pub fn run() -> RunOutcome {
    run_with_args(std::env::args_os())
}

/// Run the harness with explicit arguments (program name first).
pub fn run_with_args<I, T>(args: I) -> RunOutcome
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let invocation = match resolve_args(args) {
        Ok(invocation) => invocation,
        Err(ResolveError::Info(info)) => return info_printed(info.print()),
        Err(ResolveError::Config(e)) => {
            eprintln!("servebench: {}", e);
            eprintln!("Run 'servebench --help' for the list of options.");
            return RunOutcome::ConfigError;
        }
    };

    init_logging(invocation.verbose);

    let settings = match HarnessSettings::resolve(invocation.settings_path.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            error!(error = %e, "cannot load harness settings");
            return RunOutcome::ConfigError;
        }
    };

    let cancel = if invocation.dry_run {
        CancelToken::new()
    } else {
        match CancelToken::with_signal_handlers() {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "cannot install signal handlers; interruption will not clean up");
                CancelToken::new()
            }
        }
    };

    let harness = match Harness::new(&settings, cancel) {
        Ok(harness) => harness,
        Err(e) => {
            error!(error = %e, "invalid harness settings");
            return RunOutcome::ConfigError;
        }
    };

    if invocation.dry_run {
        println!("server: {}", harness.supervisor().command(&invocation.config));
        println!("client: {}", harness.runner().command(&invocation.config));
        return RunOutcome::Success;
    }

    let summary = harness.run(&invocation.config);

    if let Some(path) = &settings.report.path {
        if let Err(e) = write_run_report(path, &summary) {
            warn!(path = %path.display(), error = %e, "cannot write run report");
        }
    }

    summary.outcome
}

/// Outcome of printing help or version text; a failed write fails the run.
fn info_printed(result: io::Result<()>) -> RunOutcome {
    match result {
        Ok(()) => RunOutcome::Success,
        Err(e) => {
            eprintln!("servebench: cannot print usage: {}", e);
            RunOutcome::ConfigError
        }
    }
}

/// Install the stderr subscriber; `RUST_LOG` overrides the default level.
fn init_logging(verbose: bool) {
    let default = if verbose {
        "servebench=debug"
    } else {
        "servebench=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
