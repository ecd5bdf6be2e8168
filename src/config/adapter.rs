use anyhow::{Context, Result};

use crate::config::sweep::{merge_sweep_options, SweepConfig, SweepOptions};

/// Resolves the effective options of one sweep in a sweep file
pub struct ConfigAdapter;

impl ConfigAdapter {
    /// Global options with the sweep's own overrides applied
    pub fn get_merged_options(config: &SweepConfig, sweep_index: usize) -> Result<SweepOptions> {
        let sweep = config
            .sweeps
            .get(sweep_index)
            .with_context(|| format!("No sweep at index {sweep_index}"))?;
        let options = merge_sweep_options(&config.global.options, &sweep.options)
            .with_context(|| format!("Invalid options for sweep '{}'", sweep.name))?;

        options.validate()?;

        Ok(options)
    }
}
