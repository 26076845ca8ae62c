use std::path::PathBuf;

use execflow::config::{ConfigFile, RawConfigFile};
use execflow::types::{AdapterKind, StoreKind};
use serde_json::{Map, Value};

/// Builder for `ConfigFile` to simplify test setup.
///
/// Starts from the built-in defaults with short timings so tests do not wait
/// on production poll intervals.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        let mut config = RawConfigFile::default();
        config.remote.poll_interval = "10ms".to_string();
        config.remote.request_timeout = "2s".to_string();
        config.orchestrator.drain_timeout = "200ms".to_string();
        Self { config }
    }

    pub fn with_adapter(mut self, kind: AdapterKind) -> Self {
        self.config.adapter.kind = kind;
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.remote.base_url = url.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: &str) -> Self {
        self.config.remote.poll_interval = interval.to_string();
        self
    }

    /// Run `sh -c <script>` for every job; `$1` is the mode, `$2` the target.
    pub fn with_shell_script(mut self, script: &str) -> Self {
        self.config.adapter.kind = AdapterKind::Subprocess;
        self.config.subprocess.program = "sh".to_string();
        self.config.subprocess.args = vec!["-c".to_string(), script.to_string(), "sh".to_string()];
        self
    }

    pub fn with_max_poll_failures(mut self, n: u32) -> Self {
        self.config.orchestrator.max_consecutive_poll_failures = n;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: &str) -> Self {
        self.config.orchestrator.drain_timeout = timeout.to_string();
        self
    }

    pub fn with_file_store(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.store.kind = StoreKind::File;
        self.config.store.dir = dir.into();
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Invalid config built in test")
    }
}

/// Builder for a job's `input_parameters` map.
#[derive(Debug, Default)]
pub struct ParamsBuilder {
    params: Map<String, Value>,
    options: Map<String, Value>,
}

impl ParamsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// `{mode: "review", target: "."}`, the common case.
    pub fn review() -> Self {
        Self::new().mode("review").target(".")
    }

    pub fn mode(mut self, mode: &str) -> Self {
        self.params.insert("mode".into(), Value::String(mode.to_string()));
        self
    }

    pub fn target(mut self, target: &str) -> Self {
        self.params.insert("target".into(), Value::String(target.to_string()));
        self
    }

    pub fn option(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.options.insert(key.to_string(), value.into());
        self
    }

    /// Any other top-level key; the scheduler stores these untouched.
    pub fn extra(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    pub fn build(mut self) -> Map<String, Value> {
        if !self.options.is_empty() {
            self.params.insert("options".into(), Value::Object(self.options));
        }
        self.params
    }
}
