// src/config/validate.rs

use std::time::Duration;

use crate::config::model::{
    ConfigFile, OrchestratorSettings, RawConfigFile, RemoteSettings,
};
use crate::errors::{ExecflowError, Result};
use crate::types::{StoreKind, parse_duration};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::ExecflowError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_config(&raw)?;

        let remote = RemoteSettings {
            base_url: raw.remote.base_url.trim_end_matches('/').to_string(),
            poll_interval: duration_field("remote.poll_interval", &raw.remote.poll_interval)?,
            request_timeout: duration_field("remote.request_timeout", &raw.remote.request_timeout)?,
        };
        let orchestrator = OrchestratorSettings {
            max_consecutive_poll_failures: raw.orchestrator.max_consecutive_poll_failures,
            drain_timeout: duration_field("orchestrator.drain_timeout", &raw.orchestrator.drain_timeout)?,
        };

        Ok(ConfigFile::new_unchecked(
            raw.adapter.kind,
            remote,
            raw.subprocess,
            orchestrator,
            raw.store,
        ))
    }
}

/// Check the semantic rules the TOML schema cannot express.
pub fn validate_config(cfg: &RawConfigFile) -> Result<()> {
    validate_remote(cfg)?;
    validate_subprocess(cfg)?;
    validate_orchestrator(cfg)?;
    validate_store(cfg)?;
    Ok(())
}

fn validate_remote(cfg: &RawConfigFile) -> Result<()> {
    let url = cfg.remote.base_url.trim();
    if url.is_empty() {
        return Err(ExecflowError::ConfigError(
            "[remote].base_url must not be empty".to_string(),
        ));
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ExecflowError::ConfigError(format!(
            "[remote].base_url must start with http:// or https:// (got '{}')",
            url
        )));
    }

    let interval = duration_field("remote.poll_interval", &cfg.remote.poll_interval)?;
    if interval.is_zero() {
        return Err(ExecflowError::ConfigError(
            "[remote].poll_interval must be greater than zero".to_string(),
        ));
    }
    duration_field("remote.request_timeout", &cfg.remote.request_timeout)?;
    Ok(())
}

fn validate_subprocess(cfg: &RawConfigFile) -> Result<()> {
    if cfg.subprocess.program.trim().is_empty() {
        return Err(ExecflowError::ConfigError(
            "[subprocess].program must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_orchestrator(cfg: &RawConfigFile) -> Result<()> {
    if cfg.orchestrator.max_consecutive_poll_failures == 0 {
        return Err(ExecflowError::ConfigError(
            "[orchestrator].max_consecutive_poll_failures must be >= 1 (got 0)".to_string(),
        ));
    }
    duration_field("orchestrator.drain_timeout", &cfg.orchestrator.drain_timeout)?;
    Ok(())
}

fn validate_store(cfg: &RawConfigFile) -> Result<()> {
    if cfg.store.kind == StoreKind::File && cfg.store.dir.as_os_str().is_empty() {
        return Err(ExecflowError::ConfigError(
            "[store].dir is required when [store].kind = \"file\"".to_string(),
        ));
    }
    Ok(())
}

fn duration_field(name: &str, value: &str) -> Result<Duration> {
    parse_duration(value)
        .map_err(|e| ExecflowError::ConfigError(format!("[{name}]: {e}")))
}
