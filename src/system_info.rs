use anyhow::{Context, Result};
use log::info;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::Write;
use std::path::Path;

use sysinfo::System;

/// Record the host a sweep ran on, plus the sweep's global vars (GPU name etc.)
#[rustfmt::skip]
pub fn dump_sys_info(file: &Path, vars: &HashMap<String, String>) -> Result<()> {
    info!("Writing system info to {file:?}");
    let mut file = File::create(file)
        .with_context(|| format!("Failed to create system info file {file:?}"))?;
    let mut sys = System::new_all();
    sys.refresh_all();

    let unknown = || "<unknown>".to_owned();
    writeln!(file, "{:<25}{}", "Host name:", System::host_name().unwrap_or_else(unknown))?;
    writeln!(file, "{:<25}{}", "OS:", System::long_os_version().unwrap_or_else(unknown))?;
    writeln!(file, "{:<25}{}", "Kernel:", System::kernel_version().unwrap_or_else(unknown))?;
    writeln!(file, "{:<25}{}", "CPU Arch:", System::cpu_arch())?;

    match sys.cpus().first() {
        Some(cpu) => writeln!(file, "{:<25}{} ({} threads) @ {:.2} GHz",
            "CPU:", cpu.brand(), sys.cpus().len(), cpu.frequency() as f64 / 1000.0)?,
        None => writeln!(file, "{:<25}{}", "CPU:", unknown())?,
    }

    writeln!(file, "{:<25}{} bytes", "Total memory:", sys.total_memory())?;
    writeln!(file, "{:<25}{} bytes", "Used memory:", sys.used_memory())?;

    if !vars.is_empty() {
        writeln!(file)?;
        writeln!(file, "Sweep variables:")?;
        let sorted: BTreeMap<_, _> = vars.iter().collect();
        for (name, value) in sorted {
            writeln!(file, "  {:<23}{}", format!("{name}:"), value)?;
        }
    }
    Ok(())
}
