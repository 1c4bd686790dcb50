//! Config Resolution
//!
//! Turns the raw argument list into a validated [`Configuration`]. clap
//! does the parsing; its errors are mapped onto [`ConfigError`] so that a
//! missing required option or an unrecognized token stops the run before
//! anything is spawned.

use clap::Parser;
use clap::error::{ContextKind, ContextValue, ErrorKind};
use servebench_core::{ConfigError, Configuration, StageParallelism};
use std::ffi::OsString;
use std::path::PathBuf;
use thiserror::Error;

use crate::Cli;

/// Environment variable that turns on dummy weights
pub const DUMMY_WEIGHTS_ENV: &str = "USE_DUMMY_WEIGHT";

/// A resolved invocation
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Per-run parameters
    pub config: Configuration,
    /// Explicit settings file
    pub settings_path: Option<PathBuf>,
    /// Print the commands instead of running them
    pub dry_run: bool,
    /// Debug-level harness logging
    pub verbose: bool,
}

/// Why no [`Invocation`] was produced
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Missing, unknown or invalid option
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// `--help` or `--version`; the error carries the text to print
    #[error("{0}")]
    Info(clap::Error),
}

/// Resolve `args` (program name first), reading the process environment
pub fn resolve_args<I, T>(args: I) -> Result<Invocation, ResolveError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    resolve_args_with_env(args, |key| std::env::var(key).ok())
}

/// Resolve `args` with an explicit environment lookup
pub fn resolve_args_with_env<I, T>(
    args: I,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Invocation, ResolveError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::try_parse_from(args).map_err(|err| match err.kind() {
        ErrorKind::DisplayHelp
        | ErrorKind::DisplayVersion
        | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => ResolveError::Info(err),
        _ => ResolveError::Config(config_error(&err)),
    })?;

    let dummy_from_env = env(DUMMY_WEIGHTS_ENV)
        .map(|v| matches!(v.as_str(), "1" | "true" | "True"))
        .unwrap_or(false);

    let config = Configuration::builder(cli.model, cli.gpu_memory_util, cli.dataset)
        .port(cli.port)
        .base_ttft(cli.base_ttft)
        .base_tpot(cli.base_tpot)
        .context(StageParallelism::new(cli.context_tp, cli.context_pp))
        .decoding(StageParallelism::new(cli.decoding_tp, cli.decoding_pp))
        .use_dummy_weights(cli.use_dummy_weights || dummy_from_env)
        .build()?;

    Ok(Invocation {
        config,
        settings_path: cli.config,
        dry_run: cli.dry_run,
        verbose: cli.verbose,
    })
}

fn config_error(err: &clap::Error) -> ConfigError {
    let arg = invalid_arg(err);
    match err.kind() {
        ErrorKind::MissingRequiredArgument => ConfigError::MissingArgument(arg),
        ErrorKind::UnknownArgument => ConfigError::UnknownParameter(arg),
        ErrorKind::InvalidValue | ErrorKind::ValueValidation => {
            let value = match err.get(ContextKind::InvalidValue) {
                Some(ContextValue::String(v)) => v.clone(),
                _ => String::new(),
            };
            ConfigError::InvalidValue {
                name: arg,
                reason: format!("'{}' is not accepted", value),
            }
        }
        _ => ConfigError::Usage(
            err.to_string()
                .lines()
                .next()
                .unwrap_or_default()
                .trim_start_matches("error: ")
                .to_string(),
        ),
    }
}

fn invalid_arg(err: &clap::Error) -> String {
    match err.get(ContextKind::InvalidArg) {
        Some(ContextValue::String(s)) => s.clone(),
        Some(ContextValue::Strings(v)) => v.join(", "),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUIRED: [&str; 7] = [
        "servebench",
        "--model",
        "m",
        "--gpu-memory-util",
        "0.9",
        "--dataset",
        "d.json",
    ];

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn resolve(extra: &[&str]) -> Result<Invocation, ResolveError> {
        let args: Vec<&str> = REQUIRED.iter().chain(extra).copied().collect();
        resolve_args_with_env(args, no_env)
    }

    #[test]
    fn test_defaults_when_omitted() {
        let inv = resolve(&[]).unwrap();
        let c = &inv.config;
        assert_eq!(c.model(), "m");
        assert_eq!(c.gpu_memory_util(), 0.9);
        assert_eq!(c.dataset(), std::path::Path::new("d.json"));
        assert_eq!(c.port(), 8000);
        assert_eq!(c.base_ttft(), 0.25);
        assert_eq!(c.base_tpot(), 0.1);
        assert_eq!(c.context(), StageParallelism::new(1, 1));
        assert_eq!(c.decoding(), StageParallelism::new(1, 1));
        assert!(!c.use_dummy_weights());
        assert!(!inv.dry_run);
        assert!(inv.settings_path.is_none());
    }

    #[test]
    fn test_all_options() {
        let inv = resolve(&[
            "--port",
            "9100",
            "--base-ttft",
            "0.4",
            "--base-tpot",
            "0.05",
            "--context-tp",
            "4",
            "--context-pp",
            "1",
            "--decoding-tp",
            "2",
            "--decoding-pp",
            "2",
            "--config",
            "bench.toml",
            "--dry-run",
        ])
        .unwrap();
        let c = &inv.config;
        assert_eq!(c.port(), 9100);
        assert_eq!(c.base_ttft(), 0.4);
        assert_eq!(c.base_tpot(), 0.05);
        assert_eq!(c.context(), StageParallelism::new(4, 1));
        assert_eq!(c.decoding(), StageParallelism::new(2, 2));
        assert_eq!(inv.settings_path, Some(PathBuf::from("bench.toml")));
        assert!(inv.dry_run);
    }

    #[test]
    fn test_each_required_option_is_required() {
        for (flag_idx, name) in [(1, "--model"), (3, "--gpu-memory-util"), (5, "--dataset")] {
            let args: Vec<&str> = REQUIRED
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != flag_idx && *i != flag_idx + 1)
                .map(|(_, a)| *a)
                .collect();
            match resolve_args_with_env(args, no_env) {
                Err(ResolveError::Config(ConfigError::MissingArgument(missing))) => {
                    assert!(missing.contains(name), "{} not in {}", name, missing);
                }
                other => panic!("expected missing {}, got {:?}", name, other),
            }
        }
    }

    #[test]
    fn test_missing_error_message() {
        let err = resolve_args_with_env(
            ["servebench", "--model", "m", "--gpu-memory-util", "0.9"],
            no_env,
        )
        .unwrap_err();
        assert!(err.to_string().starts_with("missing required argument"));
    }

    #[test]
    fn test_unknown_option_rejected() {
        match resolve(&["--tensor-parallel", "2"]) {
            Err(ResolveError::Config(ConfigError::UnknownParameter(token))) => {
                assert_eq!(token, "--tensor-parallel");
            }
            other => panic!("expected unknown parameter, got {:?}", other),
        }
    }

    #[test]
    fn test_stray_token_rejected() {
        let err = resolve(&["extra"]).unwrap_err();
        assert!(matches!(
            err,
            ResolveError::Config(ConfigError::UnknownParameter(_))
        ));
        assert!(err.to_string().starts_with("unknown parameter"));
    }

    #[test]
    fn test_unparsable_value_rejected() {
        let err = resolve(&["--port", "eighty"]).unwrap_err();
        assert!(matches!(
            err,
            ResolveError::Config(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_non_positive_values_rejected() {
        for extra in [
            ["--base-ttft", "0"],
            ["--context-tp", "0"],
            ["--decoding-pp", "0"],
            ["--port", "0"],
        ] {
            let err = resolve(&extra).unwrap_err();
            assert!(
                matches!(err, ResolveError::Config(ConfigError::InvalidValue { .. })),
                "{:?} -> {:?}",
                extra,
                err
            );
        }
    }

    #[test]
    fn test_dummy_weights_from_env() {
        for (value, expected) in [("1", true), ("true", true), ("True", true), ("0", false), ("yes", false)] {
            let inv = resolve_args_with_env(REQUIRED, |key| {
                (key == DUMMY_WEIGHTS_ENV).then(|| value.to_string())
            })
            .unwrap();
            assert_eq!(inv.config.use_dummy_weights(), expected, "{}", value);
        }
    }

    #[test]
    fn test_dummy_weights_flag() {
        let inv = resolve(&["--use-dummy-weights"]).unwrap();
        assert!(inv.config.use_dummy_weights());
    }

    #[test]
    fn test_help_is_not_a_config_error() {
        let err = resolve_args_with_env(["servebench", "--help"], no_env).unwrap_err();
        assert!(matches!(err, ResolveError::Info(_)));
    }
}
