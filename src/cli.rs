// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};
use serde_json::Value;

use crate::types::{AdapterKind, ExecutionMode};

/// Command-line arguments for `execflow`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "execflow",
    version,
    about = "Run one execution job against a remote engine or a local process and follow its log.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Execflow.toml` in the current working directory. A missing
    /// default file means built-in defaults.
    #[arg(long, value_name = "PATH", default_value = "Execflow.toml")]
    pub config: String,

    /// Execution mode (review, plan, solve).
    #[arg(long, value_name = "MODE", default_value = "review")]
    pub mode: ExecutionMode,

    /// What the engine should operate on.
    #[arg(long, value_name = "TARGET", default_value = ".")]
    pub target: String,

    /// Extra engine option; repeatable. Values that parse as JSON keep their
    /// type (`--option depth=3`), anything else is passed as a string.
    #[arg(long = "option", value_name = "KEY=VALUE", value_parser = parse_option)]
    pub options: Vec<(String, Value)>,

    /// Override `[adapter].kind` from the config file.
    #[arg(long, value_name = "KIND")]
    pub adapter: Option<AdapterKind>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `EXECFLOW_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Load and validate the config, print it with the parsed request, but
    /// don't submit anything.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

fn parse_option(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("option '{raw}' has an empty key"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn options_keep_json_types() {
        assert_eq!(parse_option("depth=3").unwrap(), ("depth".to_string(), json!(3)));
        assert_eq!(parse_option("fix=true").unwrap(), ("fix".to_string(), json!(true)));
        assert_eq!(
            parse_option("branch=main").unwrap(),
            ("branch".to_string(), json!("main"))
        );
        assert_eq!(parse_option("expr=a=b").unwrap(), ("expr".to_string(), json!("a=b")));
    }

    #[test]
    fn options_need_a_key() {
        assert!(parse_option("novalue").is_err());
        assert!(parse_option("=1").is_err());
    }

    #[test]
    fn parses_full_command_line() {
        let args = CliArgs::try_parse_from([
            "execflow",
            "--mode",
            "solve",
            "--target",
            "src/",
            "--option",
            "depth=2",
            "--adapter",
            "subprocess",
            "--dry-run",
        ])
        .unwrap();
        assert_eq!(args.mode, ExecutionMode::Solve);
        assert_eq!(args.target, "src/");
        assert_eq!(args.options, vec![("depth".to_string(), json!(2))]);
        assert_eq!(args.adapter, Some(AdapterKind::Subprocess));
        assert!(args.dry_run);
    }

    #[test]
    fn defaults_to_review_of_current_dir() {
        let args = CliArgs::try_parse_from(["execflow"]).unwrap();
        assert_eq!(args.mode, ExecutionMode::Review);
        assert_eq!(args.target, ".");
        assert!(args.options.is_empty());
        assert!(args.adapter.is_none());
    }
}
