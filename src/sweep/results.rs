use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;

/// Exit state of a launched process, observed once its configuration finished
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ProcessOutcome {
    /// Still running (or not observable) when the configuration completed
    Running,
    Exited { code: Option<i32>, success: bool },
}

impl From<Option<ExitStatus>> for ProcessOutcome {
    fn from(status: Option<ExitStatus>) -> Self {
        match status {
            Some(status) => ProcessOutcome::Exited {
                code: status.code(),
                success: status.success(),
            },
            None => ProcessOutcome::Running,
        }
    }
}

impl ProcessOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, ProcessOutcome::Exited { success: false, .. })
    }
}

/// A launched process as recorded in the results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchRecord {
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub outcome: ProcessOutcome,
}

/// Record of one configuration of a sweep
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigurationResult {
    /// Position in the matrix (0-indexed)
    pub index: usize,
    pub label: String,
    pub parameters: BTreeMap<String, String>,
    pub producer: LaunchRecord,
    pub consumer: LaunchRecord,
    /// Time from consumer launch until the completion signal, in milliseconds
    pub wait_ms: f64,
    /// Messages received while waiting, the completion signal included
    pub messages_received: usize,
    /// Trailing completion signals consumed by the drain
    pub drained: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<PathBuf>,
}

/// All configurations of one sweep
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepResult {
    pub sweep: String,
    pub configurations: Vec<ConfigurationResult>,
}

impl SweepResult {
    pub fn new(sweep: impl Into<String>) -> Self {
        Self {
            sweep: sweep.into(),
            configurations: Vec::new(),
        }
    }

    /// Configurations where the producer or consumer exited unsuccessfully
    pub fn failed_launches(&self) -> impl Iterator<Item = &ConfigurationResult> {
        self.configurations
            .iter()
            .filter(|c| c.producer.outcome.is_failure() || c.consumer.outcome.is_failure())
    }

    /// Export results to JSON
    pub fn export_json(&self, path: &Path) -> Result<()> {
        let json_data =
            serde_json::to_string_pretty(self).context("Failed to serialize sweep results")?;

        std::fs::write(path, json_data)
            .with_context(|| format!("Failed to write sweep results to {}", path.display()))?;

        Ok(())
    }
}
