mod artifact;
pub use artifact::{find_latest_match, rename_latest_artifact, ArtifactRename};
mod launcher;
pub use launcher::{ProcessCommand, ProcessHandle, ProcessLauncher, ProcessRole, ShellLauncher};
mod parameter;
pub use parameter::{ParameterList, ParameterMatrix, ParameterSet};
mod results;
pub use results::{ConfigurationResult, LaunchRecord, ProcessOutcome, SweepResult};
mod runner;
pub use runner::{plan, select_sweeps, sweep_runner, MainRunner, PlannedConfiguration};
mod signal;
pub use signal::{CompletionMatcher, SignalError, SignalMessage, SignalSource, ZmqSignalSource};
mod sweep_runner;
pub use sweep_runner::{SweepRunner, SweepRunnerBuilder};
