//! Run Configuration
//!
//! A [`Configuration`] is created once per run by the resolver and never
//! mutated afterwards. Required fields (model, GPU memory utilization and
//! dataset) are constructor arguments of [`ConfigurationBuilder`], so a built
//! configuration always carries them; every numeric field is checked to be
//! positive before the record exists.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default port of the served endpoint
pub const DEFAULT_PORT: u16 = 8000;
/// Default baseline time-to-first-token, in seconds
pub const DEFAULT_BASE_TTFT: f64 = 0.25;
/// Default baseline time-per-output-token, in seconds
pub const DEFAULT_BASE_TPOT: f64 = 0.1;
/// Default tensor/pipeline parallel degree of each stage
pub const DEFAULT_PARALLEL_SIZE: u32 = 1;

/// Errors raised while resolving the run configuration
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// One or more required options were not given
    #[error("missing required argument: {0}")]
    MissingArgument(String),

    /// An option token the harness does not recognize
    #[error("unknown parameter: {0}")]
    UnknownParameter(String),

    /// An option was given a value outside its domain
    #[error("invalid value for {name}: {reason}")]
    InvalidValue {
        /// Option name, e.g. `--port`
        name: String,
        /// Why the value was rejected
        reason: String,
    },

    /// Any other malformed invocation
    #[error("invalid invocation: {0}")]
    Usage(String),
}

/// Tensor/pipeline parallel layout of one serving stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageParallelism {
    /// Intra-layer split degree
    pub tensor_parallel: u32,
    /// Inter-layer split degree
    pub pipeline_parallel: u32,
}

impl StageParallelism {
    /// Create a layout from tensor and pipeline degrees
    pub fn new(tensor_parallel: u32, pipeline_parallel: u32) -> Self {
        Self {
            tensor_parallel,
            pipeline_parallel,
        }
    }

    /// Number of devices the stage occupies
    pub fn world_size(&self) -> u32 {
        self.tensor_parallel.saturating_mul(self.pipeline_parallel)
    }
}

impl Default for StageParallelism {
    fn default() -> Self {
        Self::new(DEFAULT_PARALLEL_SIZE, DEFAULT_PARALLEL_SIZE)
    }
}

/// Validated parameters of a single benchmark run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    model: String,
    gpu_memory_util: f64,
    dataset: PathBuf,
    port: u16,
    base_ttft: f64,
    base_tpot: f64,
    context: StageParallelism,
    decoding: StageParallelism,
    use_dummy_weights: bool,
}

impl Configuration {
    /// Start building a configuration from its required fields
    pub fn builder(
        model: impl Into<String>,
        gpu_memory_util: f64,
        dataset: impl Into<PathBuf>,
    ) -> ConfigurationBuilder {
        ConfigurationBuilder {
            model: model.into(),
            gpu_memory_util,
            dataset: dataset.into(),
            port: DEFAULT_PORT,
            base_ttft: DEFAULT_BASE_TTFT,
            base_tpot: DEFAULT_BASE_TPOT,
            context: StageParallelism::default(),
            decoding: StageParallelism::default(),
            use_dummy_weights: false,
        }
    }

    /// Model identifier; also used as the tokenizer identifier
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Fraction of GPU memory the engine may claim
    pub fn gpu_memory_util(&self) -> f64 {
        self.gpu_memory_util
    }

    /// Path of the benchmark dataset
    pub fn dataset(&self) -> &Path {
        &self.dataset
    }

    /// Loopback port of the served endpoint
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Baseline time-to-first-token target
    pub fn base_ttft(&self) -> f64 {
        self.base_ttft
    }

    /// Baseline time-per-output-token target
    pub fn base_tpot(&self) -> f64 {
        self.base_tpot
    }

    /// Parallel layout of the context (prefill) stage
    pub fn context(&self) -> StageParallelism {
        self.context
    }

    /// Parallel layout of the decoding stage
    pub fn decoding(&self) -> StageParallelism {
        self.decoding
    }

    /// Whether the engine should skip loading real weights
    pub fn use_dummy_weights(&self) -> bool {
        self.use_dummy_weights
    }

    /// Port of the optional metadata listener (`port + 1`)
    pub fn metadata_port(&self) -> Option<u16> {
        self.port.checked_add(1)
    }
}

/// Builder for [`Configuration`]; defaults match the CLI table
#[derive(Debug, Clone)]
pub struct ConfigurationBuilder {
    model: String,
    gpu_memory_util: f64,
    dataset: PathBuf,
    port: u16,
    base_ttft: f64,
    base_tpot: f64,
    context: StageParallelism,
    decoding: StageParallelism,
    use_dummy_weights: bool,
}

impl ConfigurationBuilder {
    /// Override the endpoint port
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Override the baseline time-to-first-token
    pub fn base_ttft(mut self, base_ttft: f64) -> Self {
        self.base_ttft = base_ttft;
        self
    }

    /// Override the baseline time-per-output-token
    pub fn base_tpot(mut self, base_tpot: f64) -> Self {
        self.base_tpot = base_tpot;
        self
    }

    /// Override the context-stage layout
    pub fn context(mut self, layout: StageParallelism) -> Self {
        self.context = layout;
        self
    }

    /// Override the decoding-stage layout
    pub fn decoding(mut self, layout: StageParallelism) -> Self {
        self.decoding = layout;
        self
    }

    /// Serve with dummy weights
    pub fn use_dummy_weights(mut self, enabled: bool) -> Self {
        self.use_dummy_weights = enabled;
        self
    }

    /// Validate and freeze the configuration
    pub fn build(self) -> Result<Configuration, ConfigError> {
        if self.model.trim().is_empty() {
            return Err(invalid("--model", "must not be empty"));
        }
        if !self.gpu_memory_util.is_finite()
            || self.gpu_memory_util <= 0.0
            || self.gpu_memory_util > 1.0
        {
            return Err(invalid(
                "--gpu-memory-util",
                format!("{} is not a fraction in (0, 1]", self.gpu_memory_util),
            ));
        }
        if self.dataset.as_os_str().is_empty() {
            return Err(invalid("--dataset", "must not be empty"));
        }
        if self.port == 0 {
            return Err(invalid("--port", "must be positive"));
        }
        check_positive("--base-ttft", self.base_ttft)?;
        check_positive("--base-tpot", self.base_tpot)?;
        check_layout("--context-tp", "--context-pp", self.context)?;
        check_layout("--decoding-tp", "--decoding-pp", self.decoding)?;

        Ok(Configuration {
            model: self.model,
            gpu_memory_util: self.gpu_memory_util,
            dataset: self.dataset,
            port: self.port,
            base_ttft: self.base_ttft,
            base_tpot: self.base_tpot,
            context: self.context,
            decoding: self.decoding,
            use_dummy_weights: self.use_dummy_weights,
        })
    }
}

fn invalid(name: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        name: name.to_string(),
        reason: reason.into(),
    }
}

fn check_positive(name: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(invalid(name, format!("{} is not a positive number", value)))
    }
}

fn check_layout(tp_name: &str, pp_name: &str, layout: StageParallelism) -> Result<(), ConfigError> {
    if layout.tensor_parallel == 0 {
        return Err(invalid(tp_name, "must be at least 1"));
    }
    if layout.pipeline_parallel == 0 {
        return Err(invalid(pp_name, "must be at least 1"));
    }
    Ok(())
}
