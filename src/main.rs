use anyhow::Result;
use clap::{Parser, Subcommand};
use env_logger::Env;
use log::info;
use std::path::PathBuf;
use steerbench::{
    config::{load_sweep_config, Configuration, SweepConfig},
    sweep::{self, MainRunner},
};

const DEFAULT_CONFIG: &str = "sweep.yml";
const DEFAULT_OUT_DIR: &str = "results";

#[derive(Parser, Debug)]
#[command(
    version,
    about,
    long_about = "Sweep rendering/steering benchmarks over a matrix of configurations"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Sweep definition file
    #[arg(short, long, env = "STEERBENCH_CONFIG", default_value = DEFAULT_CONFIG)]
    config: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run all sweeps, or a single one
    Run {
        /// Sweep name to run
        #[arg(short, long)]
        name: Option<String>,

        /// Directory for results, must be empty
        #[arg(short, long, default_value = DEFAULT_OUT_DIR)]
        out_dir: PathBuf,
    },
    /// Print every configuration and the commands it would launch
    List {
        /// Sweep name to list
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Validate the sweep file
    Check,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let config: SweepConfig = load_sweep_config(&cli.config)?;

    match &cli.command {
        Commands::Run { name, out_dir } => {
            let runner = MainRunner::new(config, out_dir.clone())?;
            runner.run(name.as_deref())?;
        }
        Commands::List { name } => {
            for (sweep_name, configurations) in sweep::plan(&config, name.as_deref())? {
                println!("{sweep_name} ({} configurations)", configurations.len());
                for planned in configurations {
                    println!("  [{}]", planned.params.label());
                    println!("    producer: {}", planned.producer.command_line);
                    println!("    consumer: {}", planned.consumer.command_line);
                }
            }
        }
        Commands::Check => {
            info!(
                "{} configuration {} is valid ({} sweeps)",
                config.config_type(),
                config.config_path().display(),
                config.sweeps.len()
            );
        }
    }

    Ok(())
}
