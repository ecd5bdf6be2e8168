use anyhow::{Context, Result};
use log::debug;
use std::path::{Path, PathBuf};

/// Expand `~` and environment variables in a path string
pub fn expand_path_str(path: &str) -> String {
    shellexpand::full(path)
        .unwrap_or_else(|_| path.into())
        .into_owned()
}

/// Expand a PathBuf with environment variables
pub fn expand_path_buf(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    PathBuf::from(expand_path_str(&path_str))
}

/// Expand a path and anchor it at `base_dir` when relative.
///
/// The filesystem is not consulted: working directories of external
/// processes may only exist on the benchmark machine.
pub fn absolutize(path: &Path, base_dir: &Path) -> PathBuf {
    let expanded = expand_path_buf(path);
    if expanded.is_absolute() {
        expanded
    } else {
        base_dir.join(expanded)
    }
}

/// Create a directory and all parent directories if they don't exist
pub fn ensure_directory(path: &Path) -> Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory: {path:?}"))?;
        debug!("Created directory: {path:?}");
    }
    Ok(())
}

/// Make a clean output directory, ensuring it exists and is empty
pub fn prepare_output_directory(dir: &Path) -> Result<()> {
    ensure_directory(dir)?;

    if std::fs::read_dir(dir)?.next().is_some() {
        anyhow::bail!(
            "Output directory '{}' is not empty. Please clear it before running a sweep",
            dir.display()
        );
    }

    Ok(())
}

/// Copy a file, naming both ends on failure
pub fn copy_file(source: &Path, dest: &Path) -> Result<()> {
    std::fs::copy(source, dest)
        .with_context(|| format!("Failed to copy {source:?} to {dest:?}"))?;
    debug!("Copied {source:?} to {dest:?}");
    Ok(())
}
