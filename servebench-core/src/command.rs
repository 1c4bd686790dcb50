//! Launch Commands
//!
//! Builds the argument vectors of the two external collaborators:
//!
//! ```text
//! Configuration ──┬──► LaunchCommand::server  (engine flags + fixed limits)
//!                 └──► LaunchCommand::client  (dataset + latency targets)
//! ```
//!
//! Both commands carry an explicit [`ExecEnvironment`]. Building a command
//! has no side effects, so the same configuration always yields the same
//! command line.

use crate::config::Configuration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// Host the served endpoint binds to and is probed on
pub const LOOPBACK_HOST: &str = "127.0.0.1";
/// Tokens per cache block
pub const BLOCK_SIZE: u32 = 16;
/// Upper bound of cache blocks a single request may hold
pub const MAX_BLOCKS_PER_REQUEST: u32 = 128;
/// Swap space for evicted cache blocks, in GiB
pub const SWAP_SPACE_GIB: u32 = 16;

/// Batching policy of a serving stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchedPolicy {
    /// First-come-first-served
    Fcfs,
}

impl SchedPolicy {
    /// Value understood by the engine's `--*-sched-policy` flags
    pub fn as_str(self) -> &'static str {
        match self {
            SchedPolicy::Fcfs => "fcfs",
        }
    }
}

/// Fixed batching limits of one stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageLimits {
    /// Scheduling policy
    pub policy: SchedPolicy,
    /// Maximum requests per batch
    pub max_batch_size: u32,
    /// Maximum tokens per batch
    pub max_tokens_per_batch: u32,
}

/// Limits of the context (prefill) stage
pub const CONTEXT_STAGE_LIMITS: StageLimits = StageLimits {
    policy: SchedPolicy::Fcfs,
    max_batch_size: 128,
    max_tokens_per_batch: 8192,
};

/// Limits of the decoding stage
pub const DECODING_STAGE_LIMITS: StageLimits = StageLimits {
    policy: SchedPolicy::Fcfs,
    max_batch_size: 1024,
    max_tokens_per_batch: 65536,
};

/// Explicit environment-variable overlay applied to a spawned process.
///
/// Variables listed here are set on top of the harness's own environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecEnvironment {
    vars: BTreeMap<String, String>,
}

impl ExecEnvironment {
    /// Empty overlay: the child inherits the harness environment as is
    pub fn new() -> Self {
        Self::default()
    }

    /// Overlay that activates a prepared runtime prefix (e.g. a conda env).
    ///
    /// `<prefix>/bin` is prepended to `inherited_path`, and `CONDA_PREFIX` /
    /// `CONDA_DEFAULT_ENV` are set the way an activation script would.
    pub fn activate(prefix: &Path, inherited_path: Option<&str>) -> Self {
        let bin = prefix.join("bin");
        let path = match inherited_path {
            Some(existing) if !existing.is_empty() => format!("{}:{}", bin.display(), existing),
            _ => bin.display().to_string(),
        };
        let name = prefix
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| prefix.display().to_string());

        Self::new()
            .with_var("PATH", path)
            .with_var("CONDA_PREFIX", prefix.display().to_string())
            .with_var("CONDA_DEFAULT_ENV", name)
    }

    /// Add or replace a variable
    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    /// Merge another overlay; its values win on conflicts
    pub fn merged(mut self, other: &ExecEnvironment) -> Self {
        for (key, value) in &other.vars {
            self.vars.insert(key.clone(), value.clone());
        }
        self
    }

    /// Look up a variable
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Iterate over variables in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of variables in the overlay
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Whether the overlay is empty
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// Executable plus the leading arguments placed before generated flags,
/// e.g. `python -m distserve.api_server.distserve_api_server`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    /// Executable name or path
    pub program: String,
    /// Arguments preceding the generated ones
    #[serde(default)]
    pub args: Vec<String>,
}

impl Program {
    /// Create a program invocation prefix
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

/// Fully resolved command: program, argument vector and environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchCommand {
    program: String,
    args: Vec<String>,
    env: ExecEnvironment,
}

impl LaunchCommand {
    /// Command line of the serving process.
    ///
    /// Tokenizer equals the model; the block cache and per-stage batching
    /// limits are fixed constants.
    pub fn server(config: &Configuration, program: &Program, env: ExecEnvironment) -> Self {
        let mut args = program.args.clone();
        let mut flag = |name: &str, value: String| {
            args.push(format!("--{}", name));
            args.push(value);
        };

        flag("host", LOOPBACK_HOST.to_string());
        flag("port", config.port().to_string());
        flag("model", config.model().to_string());
        flag("tokenizer", config.model().to_string());

        flag(
            "context-tensor-parallel-size",
            config.context().tensor_parallel.to_string(),
        );
        flag(
            "context-pipeline-parallel-size",
            config.context().pipeline_parallel.to_string(),
        );
        flag(
            "decoding-tensor-parallel-size",
            config.decoding().tensor_parallel.to_string(),
        );
        flag(
            "decoding-pipeline-parallel-size",
            config.decoding().pipeline_parallel.to_string(),
        );

        flag("block-size", BLOCK_SIZE.to_string());
        flag("max-num-blocks-per-req", MAX_BLOCKS_PER_REQUEST.to_string());
        flag("gpu-memory-utilization", config.gpu_memory_util().to_string());
        flag("swap-space", SWAP_SPACE_GIB.to_string());

        for (stage, limits) in [
            ("context", CONTEXT_STAGE_LIMITS),
            ("decoding", DECODING_STAGE_LIMITS),
        ] {
            flag(
                &format!("{}-sched-policy", stage),
                limits.policy.as_str().to_string(),
            );
            flag(
                &format!("{}-max-batch-size", stage),
                limits.max_batch_size.to_string(),
            );
            flag(
                &format!("{}-max-tokens-per-batch", stage),
                limits.max_tokens_per_batch.to_string(),
            );
        }

        if config.use_dummy_weights() {
            args.push("--use-dummy-weights".to_string());
        }

        Self {
            program: program.program.clone(),
            args,
            env,
        }
    }

    /// Command line of the benchmark client. Verbose output is always on.
    pub fn client(
        config: &Configuration,
        program: &Program,
        results_path: &Path,
        env: ExecEnvironment,
    ) -> Self {
        let mut args = program.args.clone();
        args.extend([
            "--dataset".to_string(),
            config.dataset().display().to_string(),
            "--host".to_string(),
            LOOPBACK_HOST.to_string(),
            "--port".to_string(),
            config.port().to_string(),
            "--output".to_string(),
            results_path.display().to_string(),
            "--base-ttft".to_string(),
            config.base_ttft().to_string(),
            "--base-tpot".to_string(),
            config.base_tpot().to_string(),
            "--verbose".to_string(),
        ]);

        Self {
            program: program.program.clone(),
            args,
            env,
        }
    }

    /// Executable
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Argument vector, without the program
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Environment overlay
    pub fn env(&self) -> &ExecEnvironment {
        &self.env
    }

    /// Value following `--name`, if the flag is present
    pub fn flag_value(&self, name: &str) -> Option<&str> {
        let flag = format!("--{}", name);
        self.args
            .iter()
            .position(|a| *a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }

    /// Whether `--name` appears in the argument vector
    pub fn has_flag(&self, name: &str) -> bool {
        let flag = format!("--{}", name);
        self.args.iter().any(|a| *a == flag)
    }
}

impl fmt::Display for LaunchCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", shell_quote(&self.program))?;
        for arg in &self.args {
            write!(f, " {}", shell_quote(arg))?;
        }
        Ok(())
    }
}

fn shell_quote(s: &str) -> String {
    let plain = !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=,+@%".contains(c));
    if plain {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}
