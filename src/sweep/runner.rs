use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::path::PathBuf;

use crate::config::{ConfigAdapter, SignalConfig, SingleSweep, SweepConfig};
use crate::path_utils;
use crate::sweep::launcher::{ProcessCommand, ShellLauncher};
use crate::sweep::parameter::ParameterSet;
use crate::sweep::signal::ZmqSignalSource;
use crate::sweep::sweep_runner::SweepRunner;

/// Top-level orchestrator for a sweep file
///
/// The MainRunner is responsible for:
/// 1. Preparing the output directory and recording the sweep file and host
/// 2. Opening the completion signal subscription, reused by consecutive
///    sweeps that wait on the same endpoint and topic
/// 3. Selecting sweeps and building a SweepRunner for each
/// 4. Writing one results file per sweep
pub struct MainRunner {
    config: SweepConfig,
    out_dir: PathBuf,
}

/// Rendered plan for one configuration, as shown by `list`
#[derive(Debug, Clone)]
pub struct PlannedConfiguration {
    pub params: ParameterSet,
    pub producer: ProcessCommand,
    pub consumer: ProcessCommand,
}

/// Sweeps to run: the named one, or all of them in file order
pub fn select_sweeps<'a>(
    config: &'a SweepConfig,
    name: Option<&str>,
) -> Result<Vec<(usize, &'a SingleSweep)>> {
    match name {
        Some(n) => {
            let sweep = config
                .sweeps
                .iter()
                .enumerate()
                .find(|(_, s)| s.name == n)
                .with_context(|| format!("Sweep not found: {n}"))?;
            Ok(vec![sweep])
        }
        None => Ok(config.sweeps.iter().enumerate().collect()),
    }
}

/// Build the SweepRunner for the sweep at `index`
pub fn sweep_runner(config: &SweepConfig, index: usize, show_progress: bool) -> Result<SweepRunner> {
    let options = ConfigAdapter::get_merged_options(config, index)?;
    let sweep = &config.sweeps[index];
    SweepRunner::builder(sweep.clone())
        .vars(config.global.vars.clone())
        .options(options)
        .topic(sweep.signal_config(&config.global.signal).topic)
        .show_progress(show_progress)
        .build()
}

/// Render every configuration of the selected sweeps without launching anything
pub fn plan(
    config: &SweepConfig,
    name: Option<&str>,
) -> Result<Vec<(String, Vec<PlannedConfiguration>)>> {
    let mut plans = Vec::new();
    for (index, sweep) in select_sweeps(config, name)? {
        let runner = sweep_runner(config, index, false)?;
        let configurations = runner
            .configurations()
            .into_iter()
            .map(|params| {
                let (producer, consumer) = runner.render(&params);
                PlannedConfiguration {
                    params,
                    producer,
                    consumer,
                }
            })
            .collect();
        plans.push((sweep.name.clone(), configurations));
    }
    Ok(plans)
}

impl MainRunner {
    pub fn new(config: SweepConfig, out_dir: PathBuf) -> Result<Self> {
        debug!("Using output directory: {}", out_dir.display());

        path_utils::prepare_output_directory(&out_dir)?;

        if config.path.is_file() {
            let config_name = config.path.file_name().unwrap_or_default();
            path_utils::copy_file(&config.path, &out_dir.join(config_name))?;
        }

        crate::system_info::dump_sys_info(&out_dir.join("system_info"), &config.global.vars)?;

        Ok(Self { config, out_dir })
    }

    /// Run all sweeps, or only the one called `name`
    pub fn run(&self, name: Option<&str>) -> Result<()> {
        let selected = select_sweeps(&self.config, name)?;
        let mut subscription: Option<(SignalConfig, ZmqSignalSource)> = None;

        for (index, sweep) in selected {
            let runner = sweep_runner(&self.config, index, true)?;
            let mut launcher = ShellLauncher::new(runner.options().silence_output);

            let signal = sweep.signal_config(&self.config.global.signal);
            let signals = match subscription.take() {
                Some((open, source)) if open == signal => {
                    &mut subscription.insert((open, source)).1
                }
                previous => {
                    // Close the old subscription before opening the next one
                    drop(previous);
                    let source = subscribe(&signal)?;
                    &mut subscription.insert((signal, source)).1
                }
            };

            let result = runner.run_sweep(&runner.configurations(), &mut launcher, signals)?;

            for failed in result.failed_launches() {
                warn!(
                    "Configuration {} ({}) had a process exit abnormally",
                    failed.index, failed.label
                );
            }

            let export_path = self.out_dir.join(format!("{}.json", sweep.name));
            result.export_json(&export_path)?;
            info!(
                "Sweep {} completed, results written to {}",
                runner.name(),
                export_path.display()
            );
        }

        // Dropping the source closes the subscription
        drop(subscription);
        info!("DONE");
        Ok(())
    }
}

fn subscribe(signal: &SignalConfig) -> Result<ZmqSignalSource> {
    let source = ZmqSignalSource::connect(&signal.endpoint, &signal.topic)
        .with_context(|| format!("Failed to subscribe to {}", signal.endpoint))?;
    info!(
        "Waiting for '{}' completion signals on {}",
        signal.topic,
        source.endpoint()
    );
    Ok(source)
}
