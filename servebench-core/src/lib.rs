#![warn(missing_docs)]
//! ServeBench Core
//!
//! Process-free building blocks of the servebench harness:
//! - [`Configuration`]: the validated, immutable per-run parameter record
//! - [`LaunchCommand`]: deterministic command lines for the serving process
//!   and the benchmark client, together with their [`ExecEnvironment`]
//! - [`RunOutcome`]: terminal status of a run and its exit code
//!
//! Nothing in this crate spawns processes or touches the network; the
//! orchestration lives in `servebench-cli`.

mod command;
mod config;
mod outcome;

pub use command::{
    BLOCK_SIZE, CONTEXT_STAGE_LIMITS, DECODING_STAGE_LIMITS, ExecEnvironment, LOOPBACK_HOST,
    LaunchCommand, MAX_BLOCKS_PER_REQUEST, Program, SWAP_SPACE_GIB, SchedPolicy, StageLimits,
};
pub use config::{
    ConfigError, Configuration, ConfigurationBuilder, DEFAULT_BASE_TPOT, DEFAULT_BASE_TTFT,
    DEFAULT_PARALLEL_SIZE, DEFAULT_PORT, StageParallelism,
};
pub use outcome::{HealthCheckResult, ProbeOutcome, RunOutcome};
