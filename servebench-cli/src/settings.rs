//! Harness settings from servebench.toml
//!
//! Per-run parameters come from the command line; how to reach the engine
//! and the client, where logs go, and which runtime environment to activate
//! are read from a `servebench.toml` file. It is discovered by walking up
//! from the current directory unless `--config` names one. Every field has
//! a default, so an absent file is equivalent to an empty one.

use serde::{Deserialize, Serialize};
use servebench_core::{ExecEnvironment, Program};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name looked up during discovery
pub const SETTINGS_FILE_NAME: &str = "servebench.toml";

/// Harness settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HarnessSettings {
    /// Serving engine invocation
    #[serde(default)]
    pub server: ServerSettings,
    /// Benchmark client invocation
    #[serde(default)]
    pub client: ClientSettings,
    /// Runtime environment shared by both processes
    #[serde(default)]
    pub environment: EnvironmentSettings,
    /// Metadata listener
    #[serde(default)]
    pub metadata: MetadataSettings,
    /// Run report output
    #[serde(default)]
    pub report: ReportSettings,
}

/// How the serving engine is started
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Executable
    #[serde(default = "default_python")]
    pub program: String,
    /// Arguments placed before the generated engine flags
    #[serde(default = "default_server_args")]
    pub args: Vec<String>,
    /// Combined stdout/stderr of the engine, truncated per run
    #[serde(default = "default_server_log")]
    pub log_file: PathBuf,
    /// Grace period between SIGTERM and SIGKILL (e.g. "10s")
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            program: default_python(),
            args: default_server_args(),
            log_file: default_server_log(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

impl ServerSettings {
    /// Engine invocation prefix
    pub fn program(&self) -> Program {
        Program::new(self.program.clone(), self.args.clone())
    }
}

/// How the benchmark client is started
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSettings {
    /// Executable
    #[serde(default = "default_python")]
    pub program: String,
    /// Arguments placed before the generated client flags
    #[serde(default = "default_client_args")]
    pub args: Vec<String>,
    /// Per-request results written by the client
    #[serde(default = "default_client_output")]
    pub output: PathBuf,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            program: default_python(),
            args: default_client_args(),
            output: default_client_output(),
        }
    }
}

impl ClientSettings {
    /// Client invocation prefix
    pub fn program(&self) -> Program {
        Program::new(self.program.clone(), self.args.clone())
    }
}

/// Prepared runtime environment
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EnvironmentSettings {
    /// Environment prefix to activate (e.g. a conda env directory)
    #[serde(default)]
    pub prefix: Option<PathBuf>,
    /// Extra variables, applied after activation
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
}

impl EnvironmentSettings {
    /// Build the overlay, reading the inherited `PATH` from `path_var`
    pub fn exec_environment(&self, path_var: Option<&str>) -> ExecEnvironment {
        let base = match &self.prefix {
            Some(prefix) => ExecEnvironment::activate(prefix, path_var),
            None => ExecEnvironment::new(),
        };
        self.vars
            .iter()
            .fold(base, |env, (key, value)| env.with_var(key, value))
    }
}

/// Metadata listener on `port + 1`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MetadataSettings {
    /// Serve the resolved configuration as JSON while the run lasts
    #[serde(default)]
    pub enabled: bool,
}

/// Run report
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReportSettings {
    /// Where to write the JSON run report; nothing is written when unset
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_python() -> String {
    "python".to_string()
}
fn default_server_args() -> Vec<String> {
    vec![
        "-m".to_string(),
        "distserve.api_server.distserve_api_server".to_string(),
    ]
}
fn default_server_log() -> PathBuf {
    PathBuf::from("logs/server.log")
}
fn default_shutdown_timeout() -> String {
    "10s".to_string()
}
fn default_client_args() -> Vec<String> {
    vec!["benchmark-serving.py".to_string()]
}
fn default_client_output() -> PathBuf {
    PathBuf::from("logs/results.json")
}

impl HarnessSettings {
    /// Load settings from a TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("cannot read {}: {}", path.display(), e))?;
        let settings: Self = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("invalid settings in {}: {}", path.display(), e))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Find `servebench.toml` in the current directory or any parent
    pub fn discover() -> Option<PathBuf> {
        let mut dir = std::env::current_dir().ok()?;
        loop {
            let candidate = dir.join(SETTINGS_FILE_NAME);
            if candidate.is_file() {
                return Some(candidate);
            }
            if !dir.pop() {
                return None;
            }
        }
    }

    /// Load `explicit` if given, else a discovered file, else defaults
    pub fn resolve(explicit: Option<&Path>) -> anyhow::Result<Self> {
        match explicit {
            Some(path) => Self::load(path),
            None => match Self::discover() {
                Some(path) => Self::load(path),
                None => Ok(Self::default()),
            },
        }
    }

    /// Check fields that serde cannot
    pub fn validate(&self) -> anyhow::Result<()> {
        self.shutdown_timeout()?;
        if self.server.program.trim().is_empty() {
            return Err(anyhow::anyhow!("server.program must not be empty"));
        }
        if self.client.program.trim().is_empty() {
            return Err(anyhow::anyhow!("client.program must not be empty"));
        }
        Ok(())
    }

    /// Parsed `server.shutdown_timeout`
    pub fn shutdown_timeout(&self) -> anyhow::Result<Duration> {
        parse_duration(&self.server.shutdown_timeout)
    }

    /// Environment overlay for both spawned processes
    pub fn exec_environment(&self) -> ExecEnvironment {
        let path = std::env::var("PATH").ok();
        self.environment.exec_environment(path.as_deref())
    }
}

/// Parse a duration string such as "500ms", "10s" or "2m"; a bare number is
/// seconds.
pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(anyhow::anyhow!("Empty duration string"));
    }

    let (num_part, unit_part) = s
        .char_indices()
        .find(|(_, c)| c.is_alphabetic())
        .map(|(i, _)| s.split_at(i))
        .unwrap_or((s, "s"));

    let value: f64 = num_part
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid duration number: {}", num_part))?;
    if !value.is_finite() || value < 0.0 {
        return Err(anyhow::anyhow!("Invalid duration: {}", s));
    }

    let seconds = match unit_part.to_lowercase().as_str() {
        "ms" => value / 1000.0,
        "s" | "" => value,
        "m" | "min" => value * 60.0,
        _ => return Err(anyhow::anyhow!("Unknown duration unit: {}", unit_part)),
    };

    Duration::try_from_secs_f64(seconds).map_err(|e| anyhow::anyhow!("Invalid duration {}: {}", s, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = HarnessSettings::default();
        assert_eq!(settings.server.program, "python");
        assert_eq!(
            settings.server.args,
            ["-m", "distserve.api_server.distserve_api_server"]
        );
        assert_eq!(settings.server.log_file, PathBuf::from("logs/server.log"));
        assert_eq!(settings.client.args, ["benchmark-serving.py"]);
        assert_eq!(settings.client.output, PathBuf::from("logs/results.json"));
        assert_eq!(settings.shutdown_timeout().unwrap(), Duration::from_secs(10));
        assert!(!settings.metadata.enabled);
        assert!(settings.report.path.is_none());
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
            [server]
            log_file = "/tmp/engine.log"
            shutdown_timeout = "500ms"

            [environment]
            prefix = "/opt/conda/envs/distserve"
            vars = { RAY_DEDUP_LOGS = "0" }

            [metadata]
            enabled = true
        "#;

        let settings: HarnessSettings = toml::from_str(toml_str).unwrap();
        assert_eq!(settings.server.log_file, PathBuf::from("/tmp/engine.log"));
        assert_eq!(settings.shutdown_timeout().unwrap(), Duration::from_millis(500));
        // Defaults still apply
        assert_eq!(settings.server.program, "python");
        assert_eq!(settings.client.output, PathBuf::from("logs/results.json"));
        assert!(settings.metadata.enabled);

        let env = settings.environment.exec_environment(Some("/usr/bin"));
        assert_eq!(env.get("PATH"), Some("/opt/conda/envs/distserve/bin:/usr/bin"));
        assert_eq!(env.get("RAY_DEDUP_LOGS"), Some("0"));
    }

    #[test]
    fn test_vars_override_activation() {
        let mut environment = EnvironmentSettings {
            prefix: Some(PathBuf::from("/env")),
            ..Default::default()
        };
        environment
            .vars
            .insert("PATH".to_string(), "/custom".to_string());
        let env = environment.exec_environment(Some("/usr/bin"));
        assert_eq!(env.get("PATH"), Some("/custom"));
    }

    #[test]
    fn test_no_prefix_means_empty_overlay() {
        let env = EnvironmentSettings::default().exec_environment(Some("/usr/bin"));
        assert!(env.is_empty());
    }

    #[test]
    fn test_load_rejects_bad_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE_NAME);
        std::fs::write(&path, "[server]\nshutdown_timeout = \"soon\"\n").unwrap();
        assert!(HarnessSettings::load(&path).is_err());
    }

    #[test]
    fn test_load_rejects_malformed_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE_NAME);
        std::fs::write(&path, "[server\n").unwrap();
        assert!(HarnessSettings::load(&path).is_err());
    }

    #[test]
    fn test_resolve_explicit_missing_file() {
        let err = HarnessSettings::resolve(Some(Path::new("/nonexistent/servebench.toml")));
        assert!(err.is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("3s").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("7").unwrap(), Duration::from_secs(7));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("-1s").is_err());
        assert!(parse_duration("5h").is_err());
    }
}
