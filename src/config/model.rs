// src/config/model.rs

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::types::{AdapterKind, StoreKind};

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [adapter]
/// kind = "subprocess"
///
/// [remote]
/// base_url = "http://127.0.0.1:8765"
/// poll_interval = "1s"
///
/// [subprocess]
/// program = "akita"
/// args = ["--no-color"]
///
/// [orchestrator]
/// max_consecutive_poll_failures = 5
///
/// [store]
/// kind = "file"
/// dir = ".execflow/jobs"
/// ```
///
/// All sections are optional and have reasonable defaults. Durations are
/// kept as strings here and parsed during validation.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    #[serde(default)]
    pub adapter: AdapterSection,

    #[serde(default)]
    pub remote: RawRemoteSection,

    #[serde(default)]
    pub subprocess: SubprocessSection,

    #[serde(default)]
    pub orchestrator: RawOrchestratorSection,

    #[serde(default)]
    pub store: StoreSection,
}

/// `[adapter]` section: which back-end this deployment uses.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AdapterSection {
    #[serde(default)]
    pub kind: AdapterKind,
}

/// `[remote]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct RawRemoteSection {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Delay between two log/status polls.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,

    /// Upper bound for a single HTTP request.
    #[serde(default = "default_request_timeout")]
    pub request_timeout: String,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8765".to_string()
}

fn default_poll_interval() -> String {
    "1s".to_string()
}

fn default_request_timeout() -> String {
    "30s".to_string()
}

impl Default for RawRemoteSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            poll_interval: default_poll_interval(),
            request_timeout: default_request_timeout(),
        }
    }
}

/// `[subprocess]` section.
///
/// The command line is `<program> <args..> <mode> <target>` followed by one
/// `--key=value` flag per request option.
#[derive(Debug, Clone, Deserialize)]
pub struct SubprocessSection {
    #[serde(default = "default_program")]
    pub program: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory for spawned processes.
    ///
    /// If `None`, processes inherit the current directory. The target is
    /// passed verbatim either way.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

fn default_program() -> String {
    "akita".to_string()
}

impl Default for SubprocessSection {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: Vec::new(),
            working_dir: None,
        }
    }
}

/// `[orchestrator]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct RawOrchestratorSection {
    /// Consecutive failed polls after which a job is failed.
    #[serde(default = "default_max_poll_failures")]
    pub max_consecutive_poll_failures: u32,

    /// How long to keep draining buffered output after a cancellation.
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout: String,
}

fn default_max_poll_failures() -> u32 {
    5
}

fn default_drain_timeout() -> String {
    "2s".to_string()
}

impl Default for RawOrchestratorSection {
    fn default() -> Self {
        Self {
            max_consecutive_poll_failures: default_max_poll_failures(),
            drain_timeout: default_drain_timeout(),
        }
    }
}

/// `[store]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreSection {
    #[serde(default)]
    pub kind: StoreKind,

    #[serde(default = "default_store_dir")]
    pub dir: PathBuf,
}

fn default_store_dir() -> PathBuf {
    PathBuf::from(".execflow/jobs")
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            kind: StoreKind::default(),
            dir: default_store_dir(),
        }
    }
}

/// Validated configuration. Build it with `ConfigFile::try_from(raw)`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub adapter: AdapterKind,
    pub remote: RemoteSettings,
    pub subprocess: SubprocessSection,
    pub orchestrator: OrchestratorSettings,
    pub store: StoreSection,
}

#[derive(Debug, Clone)]
pub struct RemoteSettings {
    pub base_url: String,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorSettings {
    pub max_consecutive_poll_failures: u32,
    pub drain_timeout: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_consecutive_poll_failures: default_max_poll_failures(),
            drain_timeout: Duration::from_secs(2),
        }
    }
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        adapter: AdapterKind,
        remote: RemoteSettings,
        subprocess: SubprocessSection,
        orchestrator: OrchestratorSettings,
        store: StoreSection,
    ) -> Self {
        Self {
            adapter,
            remote,
            subprocess,
            orchestrator,
            store,
        }
    }
}
