/// Sweep file configuration
pub mod sweep;
pub use sweep::{
    load_sweep_config, merge_sweep_options, parse_sweep_config, ArtifactSpec, ConditionalArgs,
    ProcessSpec, SignalConfig, SignalOverride, SingleSweep, SweepConfig, SweepGlobalConfig,
    SweepOptions, DEFAULT_SIGNAL_ENDPOINT, DEFAULT_SIGNAL_TOPIC,
};

/// Resolves merged options per sweep
pub mod adapter;
pub use adapter::ConfigAdapter;

/// Option merging implementations
mod sweep_ext;

/// Configuration traits
pub mod traits;
pub use traits::{Configuration, MergeFromMap, MergeableConfiguration, PathConfiguration};
