use anyhow::{Context, Result};
use glob::Pattern;
use log::{debug, error, info};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::config::ArtifactSpec;
use crate::sweep::parameter::{ParameterMatrix, ParameterSet};

/// Artifact rename rendered for one configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRename {
    /// Glob pattern with the directory part escaped
    pub pattern: String,
    pub target: PathBuf,
}

impl ArtifactRename {
    pub fn render(
        spec: &ArtifactSpec,
        dir: &Path,
        params: &ParameterSet,
        vars: &HashMap<String, String>,
    ) -> Self {
        let pattern = ParameterMatrix::apply_parameters(&spec.pattern, params, vars);
        let target = ParameterMatrix::apply_parameters(&spec.target, params, vars);
        let escaped_dir = PathBuf::from(Pattern::escape(&dir.to_string_lossy()));
        Self {
            pattern: escaped_dir.join(pattern).to_string_lossy().into_owned(),
            target: dir.join(target),
        }
    }

    /// Rename the newest match to the target, see [`rename_latest_artifact`]
    pub fn apply(&self) -> Result<Option<PathBuf>> {
        rename_latest_artifact(&self.pattern, &self.target)
    }
}

/// Most recently modified regular file matching `pattern`
pub fn find_latest_match(pattern: &str) -> Result<Option<PathBuf>> {
    let entries =
        glob::glob(pattern).with_context(|| format!("Invalid artifact pattern: {pattern}"))?;

    let mut latest: Option<(SystemTime, PathBuf)> = None;
    for entry in entries {
        let path = match entry {
            Ok(path) => path,
            Err(e) => {
                debug!("Skipping unreadable artifact candidate: {e}");
                continue;
            }
        };
        if !path.is_file() {
            continue;
        }
        let modified = path
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        if latest.as_ref().is_none_or(|(newest, _)| modified > *newest) {
            latest = Some((modified, path));
        }
    }

    Ok(latest.map(|(_, path)| path))
}

/// Replace `target` with the newest file matching `pattern`.
///
/// Returns the target path, or `None` when nothing matched. A missing
/// artifact is logged and leaves the filesystem untouched.
pub fn rename_latest_artifact(pattern: &str, target: &Path) -> Result<Option<PathBuf>> {
    let Some(source) = find_latest_match(pattern)? else {
        error!("ERROR RENAMING OUTPUT FILE: nothing matches {pattern}");
        return Ok(None);
    };

    if source == target {
        info!("Output file already at {}", target.display());
        return Ok(Some(target.to_path_buf()));
    }

    if target.is_file() {
        fs::remove_file(target)
            .with_context(|| format!("Failed to remove existing file: {}", target.display()))?;
    }

    info!(
        "renaming file: {} -> {}",
        source.display(),
        target.display()
    );
    fs::rename(&source, target).with_context(|| {
        format!(
            "Failed to rename {} to {}",
            source.display(),
            target.display()
        )
    })?;

    Ok(Some(target.to_path_buf()))
}
