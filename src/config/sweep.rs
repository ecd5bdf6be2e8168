use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    time::Duration,
};

use crate::config::traits::{
    Configuration, MergeFromMap, MergeableConfiguration, PathConfiguration,
};
use crate::path_utils;
use crate::sweep::ParameterList;

/// Endpoint the producer publishes its close signal on
pub const DEFAULT_SIGNAL_ENDPOINT: &str = "tcp://localhost:12345";
/// Topic carrying the close signal
pub const DEFAULT_SIGNAL_TOPIC: &str = "mintclose";

/// ZeroMQ schemes a SUB socket can connect to
const SIGNAL_SCHEMES: [&str; 5] = ["tcp", "ipc", "inproc", "pgm", "epgm"];

/// Option keys accepted in a sweep's `options:` override map
pub const OPTION_KEYS: [&str; 5] = [
    "settle_delay_ms",
    "poll_interval_ms",
    "drain_interval_ms",
    "drain",
    "silence_output",
];

/// Timing and behaviour knobs for a sweep
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SweepOptions {
    /// Pause before launching the producer and again before the consumer
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Pause before each blocking receive while waiting for completion
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Pause before each non-blocking receive while draining
    #[serde(default = "default_drain_interval_ms")]
    pub drain_interval_ms: u64,
    /// Whether trailing completion messages are drained after each run
    #[serde(default = "default_drain")]
    pub drain: bool,
    /// Discard stdout/stderr of launched processes instead of inheriting them
    #[serde(default)]
    pub silence_output: bool,
}

fn default_settle_delay_ms() -> u64 {
    5000
}

fn default_poll_interval_ms() -> u64 {
    5
}

fn default_drain_interval_ms() -> u64 {
    50
}

fn default_drain() -> bool {
    true
}

impl Default for SweepOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl SweepOptions {
    pub fn new() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            drain_interval_ms: default_drain_interval_ms(),
            drain: default_drain(),
            silence_output: false,
        }
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms)
    }

    /// Validate the sweep options
    pub fn validate(&self) -> Result<()> {
        // A zero interval turns the drain into a hot loop against the socket
        if self.drain && self.drain_interval_ms == 0 {
            anyhow::bail!("drain_interval_ms cannot be zero while drain is enabled");
        }
        Ok(())
    }
}

impl MergeableConfiguration<HashMap<String, Value>> for SweepOptions {
    fn merge_with(&self, other: &HashMap<String, Value>) -> Result<Self> {
        self.merge_from_map(other)
    }
}

/// Where the completion signal comes from
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SignalConfig {
    /// ZeroMQ endpoint to connect the SUB socket to
    #[serde(default = "default_signal_endpoint")]
    pub endpoint: String,
    /// Topic to subscribe to and to expect on completion messages
    #[serde(default = "default_signal_topic")]
    pub topic: String,
}

fn default_signal_endpoint() -> String {
    DEFAULT_SIGNAL_ENDPOINT.to_string()
}

fn default_signal_topic() -> String {
    DEFAULT_SIGNAL_TOPIC.to_string()
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            endpoint: default_signal_endpoint(),
            topic: default_signal_topic(),
        }
    }
}

impl SignalConfig {
    pub fn validate(&self) -> Result<()> {
        if self.topic.is_empty() {
            anyhow::bail!("Signal topic cannot be empty");
        }
        let endpoint = url::Url::parse(&self.endpoint)
            .with_context(|| format!("Invalid signal endpoint: {}", self.endpoint))?;
        if !SIGNAL_SCHEMES.contains(&endpoint.scheme()) {
            anyhow::bail!(
                "Unsupported signal endpoint scheme '{}' in {} (expected one of {})",
                endpoint.scheme(),
                self.endpoint,
                SIGNAL_SCHEMES.join(", ")
            );
        }
        Ok(())
    }
}

/// Per-sweep replacement for parts of the global signal channel
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SignalOverride {
    pub endpoint: Option<String>,
    pub topic: Option<String>,
}

impl SignalOverride {
    /// Fields left out keep the global value
    pub fn apply(&self, global: &SignalConfig) -> SignalConfig {
        SignalConfig {
            endpoint: self
                .endpoint
                .clone()
                .unwrap_or_else(|| global.endpoint.clone()),
            topic: self.topic.clone().unwrap_or_else(|| global.topic.clone()),
        }
    }
}

/// Settings shared by every sweep in the file
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct SweepGlobalConfig {
    /// Completion signal channel
    #[serde(default)]
    pub signal: SignalConfig,
    /// Constants available as `{name}` placeholders in every template
    #[serde(default)]
    pub vars: HashMap<String, String>,
    /// Default sweep options
    pub options: Option<SweepOptions>,
}

/// Extra arguments appended to a command for matching configurations
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ConditionalArgs {
    /// Every `var: value` pair must match the configuration
    pub when: HashMap<String, String>,
    /// Argument template appended to the command line
    pub args: String,
}

/// An external executable launched once per configuration
#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ProcessSpec {
    /// Command line template, run through the platform shell
    pub command: String,
    /// Working directory for the process
    pub working_dir: Option<PathBuf>,
    /// Environment variables to set
    pub env: Option<HashMap<String, String>>,
    #[serde(default)]
    pub conditional_args: Vec<ConditionalArgs>,
}

impl ProcessSpec {
    pub fn validate(&self, role: &str) -> Result<()> {
        if self.command.trim().is_empty() {
            anyhow::bail!("{role} command cannot be empty");
        }
        for conditional in &self.conditional_args {
            if conditional.when.is_empty() {
                anyhow::bail!(
                    "{role} conditional_args entry '{}' has no conditions",
                    conditional.args
                );
            }
        }
        Ok(())
    }
}

/// Output file renamed after each run
#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ArtifactSpec {
    /// Directory the pattern and target are relative to
    pub dir: Option<PathBuf>,
    /// Glob pattern template locating the produced file
    pub pattern: String,
    /// File name template the newest match is renamed to
    pub target: String,
}

/// Configuration for a single sweep
#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct SingleSweep {
    /// Sweep name, also used for the results file
    pub name: String,
    /// Axes of the configuration matrix
    #[serde(default)]
    pub parameter_lists: Vec<ParameterList>,
    pub producer: ProcessSpec,
    pub consumer: ProcessSpec,
    /// Sweep-specific options (overrides global options)
    #[serde(default)]
    pub options: HashMap<String, Value>,
    pub artifact: Option<ArtifactSpec>,
    /// Signal channel for this sweep when it differs from the global one
    pub signal: Option<SignalOverride>,
}

impl SingleSweep {
    /// Validate single sweep configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            anyhow::bail!("Sweep name cannot be empty");
        }

        let mut vars = HashSet::new();
        for list in &self.parameter_lists {
            if list.var.is_empty() {
                anyhow::bail!("Sweep '{}' has a parameter list without a var", self.name);
            }
            if !vars.insert(list.var.as_str()) {
                anyhow::bail!(
                    "Sweep '{}' declares parameter '{}' more than once",
                    self.name,
                    list.var
                );
            }
            if list.values.is_empty() {
                anyhow::bail!(
                    "Sweep '{}' parameter '{}' has no values",
                    self.name,
                    list.var
                );
            }
        }

        for key in self.options.keys() {
            if !OPTION_KEYS.contains(&key.as_str()) {
                anyhow::bail!("Sweep '{}' has unknown option '{}'", self.name, key);
            }
        }

        self.producer.validate("producer")?;
        self.consumer.validate("consumer")?;

        if let Some(artifact) = &self.artifact {
            if artifact.pattern.is_empty() || artifact.target.is_empty() {
                anyhow::bail!(
                    "Sweep '{}' artifact needs both a pattern and a target",
                    self.name
                );
            }
        }

        Ok(())
    }

    /// Signal channel this sweep waits on
    pub fn signal_config(&self, global: &SignalConfig) -> SignalConfig {
        match &self.signal {
            Some(signal) => signal.apply(global),
            None => global.clone(),
        }
    }

    /// Directory artifact patterns are resolved against
    pub fn artifact_dir(&self) -> PathBuf {
        self.artifact
            .as_ref()
            .and_then(|a| a.dir.clone())
            .or_else(|| self.consumer.working_dir.clone())
            .unwrap_or_default()
    }

    fn path_fields_mut(&mut self) -> Vec<&mut PathBuf> {
        let mut paths = Vec::new();
        if let Some(dir) = self.producer.working_dir.as_mut() {
            paths.push(dir);
        }
        if let Some(dir) = self.consumer.working_dir.as_mut() {
            paths.push(dir);
        }
        if let Some(dir) = self.artifact.as_mut().and_then(|a| a.dir.as_mut()) {
            paths.push(dir);
        }
        paths
    }
}

/// Complete sweep file
#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct SweepConfig {
    /// Global configuration options
    #[serde(default)]
    pub global: SweepGlobalConfig,
    /// Sweeps to run, in order
    pub sweeps: Vec<SingleSweep>,
    #[serde(default)]
    pub path: PathBuf,
}

impl Configuration for SweepConfig {
    fn config_path(&self) -> &PathBuf {
        &self.path
    }

    fn config_type(&self) -> &str {
        "sweep"
    }

    fn validate(&self) -> Result<()> {
        self.global.signal.validate()?;
        if let Some(opts) = &self.global.options {
            opts.validate()?;
        }
        if self.sweeps.is_empty() {
            anyhow::bail!("No sweeps configured");
        }
        let mut names = HashSet::new();
        for sweep in &self.sweeps {
            sweep.validate()?;
            sweep
                .signal_config(&self.global.signal)
                .validate()
                .with_context(|| format!("Sweep '{}' signal", sweep.name))?;
            if !names.insert(sweep.name.as_str()) {
                anyhow::bail!("Duplicate sweep name: {}", sweep.name);
            }
        }
        Ok(())
    }
}

impl PathConfiguration for SweepConfig {
    fn with_expanded_paths(&self, config_dir: &Path) -> Result<Self> {
        let mut config = self.clone();
        for sweep in config.sweeps.iter_mut() {
            for path in sweep.path_fields_mut() {
                *path = path_utils::absolutize(&*path, config_dir);
            }
        }
        Ok(config)
    }
}

/// Load a sweep file from YAML
pub fn load_sweep_config(config_path: &Path) -> Result<SweepConfig> {
    if !config_path.exists() {
        anyhow::bail!("Sweep config file not found: {:?}", config_path);
    }
    let config_dir = config_path
        .parent()
        .context("Failed to get sweep config directory")?;
    let contents = std::fs::read_to_string(config_path)
        .with_context(|| format!("Failed to read sweep config file: {:?}", config_path))?;
    let mut config = parse_sweep_config(&contents)
        .with_context(|| format!("Failed to parse YAML from file: {:?}", config_path))?;
    config.path = config_path.to_path_buf();
    let config = config.with_expanded_paths(config_dir)?;
    config.validate()?;
    debug!("Using {} configuration\n{:?}", config.config_type(), config);
    Ok(config)
}

/// Parse a sweep file without touching the filesystem
pub fn parse_sweep_config(contents: &str) -> Result<SweepConfig> {
    let config: SweepConfig = serde_yaml::from_str(contents)?;
    Ok(config)
}

/// Merge global and sweep-specific options
pub fn merge_sweep_options(
    global_opts: &Option<SweepOptions>,
    sweep_opts: &HashMap<String, Value>,
) -> Result<SweepOptions> {
    let base_opts = global_opts.clone().unwrap_or_default();
    base_opts.merge_with(sweep_opts)
}
