use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::path::PathBuf;
use std::thread;
use std::time::Instant;

use crate::config::{SingleSweep, SweepOptions, DEFAULT_SIGNAL_TOPIC};
use crate::sweep::artifact::ArtifactRename;
use crate::sweep::launcher::{ProcessCommand, ProcessHandle, ProcessLauncher, ProcessRole};
use crate::sweep::parameter::{ParameterMatrix, ParameterSet};
use crate::sweep::results::{ConfigurationResult, LaunchRecord, SweepResult};
use crate::sweep::signal::{CompletionMatcher, SignalSource};

/// Drives one sweep: launches the producer/consumer pair for every
/// configuration and blocks until the completion signal arrives.
pub struct SweepRunner {
    sweep: SingleSweep,
    vars: HashMap<String, String>,
    options: SweepOptions,
    matcher: CompletionMatcher,
    artifact_dir: PathBuf,
    show_progress: bool,
}

/// Builder for SweepRunner
pub struct SweepRunnerBuilder {
    sweep: SingleSweep,
    vars: HashMap<String, String>,
    options: SweepOptions,
    topic: String,
    show_progress: bool,
}

impl SweepRunnerBuilder {
    /// Constants available to every template
    pub fn vars(mut self, vars: HashMap<String, String>) -> Self {
        self.vars = vars;
        self
    }

    pub fn options(mut self, options: SweepOptions) -> Self {
        self.options = options;
        self
    }

    /// Topic expected on completion messages
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn show_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn build(self) -> Result<SweepRunner> {
        self.sweep.validate()?;
        self.options.validate()?;
        if self.topic.is_empty() {
            anyhow::bail!("Completion topic cannot be empty");
        }
        let artifact_dir = self.sweep.artifact_dir();
        Ok(SweepRunner {
            sweep: self.sweep,
            vars: self.vars,
            options: self.options,
            matcher: CompletionMatcher::new(self.topic),
            artifact_dir,
            show_progress: self.show_progress,
        })
    }
}

impl SweepRunner {
    pub fn builder(sweep: SingleSweep) -> SweepRunnerBuilder {
        SweepRunnerBuilder {
            sweep,
            vars: HashMap::new(),
            options: SweepOptions::default(),
            topic: DEFAULT_SIGNAL_TOPIC.to_string(),
            show_progress: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.sweep.name
    }

    pub fn options(&self) -> &SweepOptions {
        &self.options
    }

    /// The sweep's configuration matrix, in execution order
    pub fn configurations(&self) -> Vec<ParameterSet> {
        ParameterMatrix::new(&self.sweep.parameter_lists).combinations
    }

    /// Producer and consumer commands for one configuration
    pub fn render(&self, params: &ParameterSet) -> (ProcessCommand, ProcessCommand) {
        (
            ProcessCommand::render(ProcessRole::Producer, &self.sweep.producer, params, &self.vars),
            ProcessCommand::render(ProcessRole::Consumer, &self.sweep.consumer, params, &self.vars),
        )
    }

    /// Run every configuration in order
    pub fn run_sweep(
        &self,
        configurations: &[ParameterSet],
        launcher: &mut dyn ProcessLauncher,
        signals: &mut dyn SignalSource,
    ) -> Result<SweepResult> {
        info!(
            "Running sweep '{}' over {} configurations",
            self.sweep.name,
            configurations.len()
        );

        let progress = if self.show_progress {
            let pb = ProgressBar::new(configurations.len() as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
                    .progress_chars("=> "),
            );
            pb
        } else {
            ProgressBar::hidden()
        };

        let mut result = SweepResult::new(&self.sweep.name);
        for (index, params) in configurations.iter().enumerate() {
            progress.set_message(params.label());
            let record = self
                .run_configuration(index, params, launcher, signals)
                .with_context(|| format!("Configuration {} ({}) failed", index, params))?;
            result.configurations.push(record);
            progress.inc(1);
        }
        progress.finish_and_clear();

        Ok(result)
    }

    fn run_configuration(
        &self,
        index: usize,
        params: &ParameterSet,
        launcher: &mut dyn ProcessLauncher,
        signals: &mut dyn SignalSource,
    ) -> Result<ConfigurationResult> {
        info!("BENCHMARK: {}", params.label());
        let (producer_cmd, consumer_cmd) = self.render(params);

        thread::sleep(self.options.settle_delay());
        debug!("Launching producer: {}", producer_cmd.command_line);
        let mut producer = launcher.launch(&producer_cmd)?;

        thread::sleep(self.options.settle_delay());
        debug!("Launching consumer: {}", consumer_cmd.command_line);
        let mut consumer = launcher.launch(&consumer_cmd)?;

        let started = Instant::now();
        let messages_received = self.wait_for_completion(signals)?;
        let wait_ms = started.elapsed().as_secs_f64() * 1000.0;

        let artifact = match &self.sweep.artifact {
            Some(spec) => {
                ArtifactRename::render(spec, &self.artifact_dir, params, &self.vars).apply()?
            }
            None => None,
        };

        let drained = if self.options.drain {
            self.drain(signals)
        } else {
            0
        };

        Ok(ConfigurationResult {
            index,
            label: params.label(),
            parameters: params.to_map(),
            producer: Self::observe(ProcessRole::Producer, &mut producer),
            consumer: Self::observe(ProcessRole::Consumer, &mut consumer),
            wait_ms,
            messages_received,
            drained,
            artifact,
        })
    }

    /// Block until a completion message arrives. There is no timeout.
    ///
    /// Returns the number of messages received, the completion included.
    fn wait_for_completion(&self, signals: &mut dyn SignalSource) -> Result<usize> {
        let mut received = 0;
        loop {
            thread::sleep(self.options.poll_interval());
            let message = match signals.recv() {
                Ok(message) => message,
                Err(e) if e.is_transient() => {
                    debug!("Ignoring signal channel hiccup: {e}");
                    continue;
                }
                Err(e) => {
                    return Err(e).context("Failed to receive from the signal channel");
                }
            };
            received += 1;
            debug!("tpc={}; msg={}", message.topic, message.body);
            if self.matcher.is_done(&message) {
                return Ok(received);
            }
        }
    }

    /// Consume completion messages that are already queued.
    ///
    /// Stops at the first empty poll, non-completion message or error.
    fn drain(&self, signals: &mut dyn SignalSource) -> usize {
        let mut drained = 0;
        loop {
            thread::sleep(self.options.drain_interval());
            match signals.try_recv() {
                Ok(Some(message)) if self.matcher.is_done(&message) => drained += 1,
                Ok(Some(message)) => {
                    debug!("Drain stopped at tpc={}; msg={}", message.topic, message.body);
                    break;
                }
                Ok(None) => break,
                Err(e) => {
                    debug!("Drain stopped: {e}");
                    break;
                }
            }
        }
        if drained > 0 {
            debug!("Drained {drained} trailing completion messages");
        }
        drained
    }

    fn observe(role: ProcessRole, handle: &mut ProcessHandle) -> LaunchRecord {
        let status = match handle.try_status() {
            Ok(status) => status,
            Err(e) => {
                warn!("Could not poll {role}: {e:#}");
                None
            }
        };
        if let Some(status) = status.filter(|s| !s.success()) {
            warn!(
                "{role} exited abnormally ({status}): {}",
                handle.command_line()
            );
        }
        LaunchRecord {
            command: handle.command_line().to_string(),
            pid: handle.id(),
            outcome: status.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ArtifactSpec, ProcessSpec};
    use crate::sweep::parameter::ParameterList;
    use crate::sweep::results::ProcessOutcome;
    use crate::sweep::signal::{SignalError, SignalMessage};
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;
    use tempfile::tempdir;

    type Queue = Rc<RefCell<VecDeque<SignalMessage>>>;

    /// Records launches; the consumer "publishes" its scripted messages
    struct ScriptedLauncher {
        launches: Vec<(ProcessRole, String)>,
        queue: Queue,
        on_consumer: Vec<SignalMessage>,
        artifact_dir: Option<PathBuf>,
    }

    impl ScriptedLauncher {
        fn new(queue: Queue, on_consumer: Vec<SignalMessage>) -> Self {
            Self {
                launches: Vec::new(),
                queue,
                on_consumer,
                artifact_dir: None,
            }
        }
    }

    impl ProcessLauncher for ScriptedLauncher {
        fn launch(&mut self, command: &ProcessCommand) -> Result<ProcessHandle> {
            self.launches
                .push((command.role, command.command_line.clone()));
            if command.role == ProcessRole::Consumer {
                self.queue
                    .borrow_mut()
                    .extend(self.on_consumer.iter().cloned());
                if let Some(dir) = &self.artifact_dir {
                    let n = self.launches.len();
                    std::fs::write(dir.join(format!("latency_2023_{n}.txt")), "ms").unwrap();
                }
            }
            Ok(ProcessHandle::detached(&command.command_line))
        }
    }

    struct QueueSignals {
        queue: Queue,
        fail_try_recv: bool,
    }

    impl SignalSource for QueueSignals {
        fn recv(&mut self) -> Result<SignalMessage, SignalError> {
            self.queue
                .borrow_mut()
                .pop_front()
                .ok_or(SignalError::Zmq(zmq::Error::ETERM))
        }

        fn try_recv(&mut self) -> Result<Option<SignalMessage>, SignalError> {
            if self.fail_try_recv {
                return Err(SignalError::Zmq(zmq::Error::EFSM));
            }
            Ok(self.queue.borrow_mut().pop_front())
        }
    }

    fn fast_options() -> SweepOptions {
        SweepOptions {
            settle_delay_ms: 0,
            poll_interval_ms: 0,
            drain_interval_ms: 1,
            drain: true,
            silence_output: true,
        }
    }

    fn mint_sweep(parameter_lists: Vec<ParameterList>) -> SingleSweep {
        SingleSweep {
            name: "mint-steering".to_string(),
            parameter_lists,
            producer: ProcessSpec {
                command: "rendering.exe --zmq={zmq} --spout={spout}".to_string(),
                working_dir: None,
                env: None,
                conditional_args: Vec::new(),
            },
            consumer: ProcessSpec {
                command: "steering.exe --zmq={zmq} --spout={spout}".to_string(),
                working_dir: None,
                env: None,
                conditional_args: Vec::new(),
            },
            options: HashMap::new(),
            artifact: None,
            signal: None,
        }
    }

    fn runner(sweep: SingleSweep) -> SweepRunner {
        SweepRunner::builder(sweep)
            .options(fast_options())
            .topic("mintclose")
            .build()
            .unwrap()
    }

    fn done() -> SignalMessage {
        SignalMessage::new("mintclose", "1")
    }

    #[test]
    fn test_launch_pairs_in_order() {
        let runner = runner(mint_sweep(Vec::new()));
        let configurations = vec![
            ParameterSet::new([("zmq", "ipc"), ("spout", "gpu")]),
            ParameterSet::new([("zmq", "tcp"), ("spout", "memshare")]),
        ];
        let queue = Queue::default();
        let mut launcher = ScriptedLauncher::new(queue.clone(), vec![done()]);
        let mut signals = QueueSignals {
            queue,
            fail_try_recv: false,
        };

        let result = runner
            .run_sweep(&configurations, &mut launcher, &mut signals)
            .unwrap();

        assert_eq!(
            launcher.launches,
            vec![
                (ProcessRole::Producer, "rendering.exe --zmq=ipc --spout=gpu".to_string()),
                (ProcessRole::Consumer, "steering.exe --zmq=ipc --spout=gpu".to_string()),
                (ProcessRole::Producer, "rendering.exe --zmq=tcp --spout=memshare".to_string()),
                (ProcessRole::Consumer, "steering.exe --zmq=tcp --spout=memshare".to_string()),
            ]
        );
        assert_eq!(result.configurations.len(), 2);
        assert_eq!(result.configurations[1].label, "tcp x memshare");
        assert_eq!(result.configurations[0].producer.outcome, ProcessOutcome::Running);
    }

    #[test]
    fn test_matrix_size_matches_launch_count() {
        let runner = runner(mint_sweep(vec![
            ParameterList::new("zmq", &["ipc", "tcp"]),
            ParameterList::new("spout", &["gpu", "memshare"]),
        ]));
        let configurations = runner.configurations();
        assert_eq!(configurations.len(), 4);

        let queue = Queue::default();
        let mut launcher = ScriptedLauncher::new(queue.clone(), vec![done()]);
        let mut signals = QueueSignals {
            queue,
            fail_try_recv: false,
        };
        runner
            .run_sweep(&configurations, &mut launcher, &mut signals)
            .unwrap();

        let producers = launcher
            .launches
            .iter()
            .filter(|(role, _)| *role == ProcessRole::Producer)
            .count();
        assert_eq!(producers, 4);
        assert_eq!(launcher.launches.len(), 8);
        for pair in launcher.launches.chunks(2) {
            assert_eq!(pair[0].0, ProcessRole::Producer);
            assert_eq!(pair[1].0, ProcessRole::Consumer);
        }
    }

    #[test]
    fn test_wait_ignores_unmatched_messages() {
        let runner = runner(mint_sweep(Vec::new()));
        let queue = Queue::default();
        let mut launcher = ScriptedLauncher::new(
            queue.clone(),
            vec![
                SignalMessage::new("camera", "1"),
                SignalMessage::new("mintclose", "0"),
                SignalMessage::new("mintclose", ""),
                done(),
            ],
        );
        let mut signals = QueueSignals {
            queue,
            fail_try_recv: false,
        };

        let result = runner
            .run_sweep(&[ParameterSet::default()], &mut launcher, &mut signals)
            .unwrap();
        assert_eq!(result.configurations[0].messages_received, 4);
    }

    #[test]
    fn test_wait_does_not_end_without_completion() {
        let runner = runner(mint_sweep(Vec::new()));
        let queue = Queue::default();
        let mut launcher = ScriptedLauncher::new(
            queue.clone(),
            vec![SignalMessage::new("mintclose", "0")],
        );
        let mut signals = QueueSignals {
            queue,
            fail_try_recv: false,
        };

        // The mock channel shuts down once it runs dry; without a completion
        // signal that is the only way out of the wait.
        let result = runner.run_sweep(&[ParameterSet::default()], &mut launcher, &mut signals);
        assert!(result.is_err());
    }

    #[test]
    fn test_drain_consumes_trailing_completions() {
        let runner = runner(mint_sweep(Vec::new()));
        let queue = Queue::default();
        let mut launcher = ScriptedLauncher::new(
            queue.clone(),
            vec![done(), done(), done(), SignalMessage::new("mintclose", "0")],
        );
        let mut signals = QueueSignals {
            queue: queue.clone(),
            fail_try_recv: false,
        };

        let result = runner
            .run_sweep(&[ParameterSet::default()], &mut launcher, &mut signals)
            .unwrap();
        assert_eq!(result.configurations[0].drained, 2);
        // The non-completion message that stopped the drain was consumed
        assert!(queue.borrow().is_empty());
    }

    #[test]
    fn test_empty_drain_proceeds_to_next_configuration() {
        let runner = runner(mint_sweep(Vec::new()));
        let queue = Queue::default();
        let mut launcher = ScriptedLauncher::new(queue.clone(), vec![done()]);
        let mut signals = QueueSignals {
            queue,
            fail_try_recv: false,
        };

        let configurations = vec![
            ParameterSet::new([("zmq", "ipc"), ("spout", "gpu")]),
            ParameterSet::new([("zmq", "tcp"), ("spout", "gpu")]),
        ];
        let result = runner
            .run_sweep(&configurations, &mut launcher, &mut signals)
            .unwrap();
        assert_eq!(result.configurations.len(), 2);
        assert!(result.configurations.iter().all(|c| c.drained == 0));
    }

    #[test]
    fn test_drain_errors_mean_no_more_messages() {
        let runner = runner(mint_sweep(Vec::new()));
        let queue = Queue::default();
        let mut launcher = ScriptedLauncher::new(queue.clone(), vec![done(), done()]);
        let mut signals = QueueSignals {
            queue,
            fail_try_recv: true,
        };

        let configurations = vec![ParameterSet::default(), ParameterSet::default()];
        let result = runner
            .run_sweep(&configurations, &mut launcher, &mut signals)
            .unwrap();
        assert_eq!(result.configurations.len(), 2);
        assert_eq!(result.configurations[0].drained, 0);
    }

    #[test]
    fn test_drain_disabled_leaves_queue() {
        let sweep = mint_sweep(Vec::new());
        let options = SweepOptions {
            drain: false,
            ..fast_options()
        };
        let runner = SweepRunner::builder(sweep)
            .options(options)
            .topic("mintclose")
            .build()
            .unwrap();

        let queue = Queue::default();
        let mut launcher = ScriptedLauncher::new(queue.clone(), vec![done(), done()]);
        let mut signals = QueueSignals {
            queue: queue.clone(),
            fail_try_recv: false,
        };
        runner
            .run_sweep(&[ParameterSet::default()], &mut launcher, &mut signals)
            .unwrap();
        assert_eq!(queue.borrow().len(), 1);
    }

    #[test]
    fn test_artifact_renamed_per_configuration() {
        let dir = tempdir().unwrap();
        let mut sweep = mint_sweep(vec![ParameterList::new("render_ms", &["0", "10"])]);
        sweep.artifact = Some(ArtifactSpec {
            dir: Some(dir.path().to_path_buf()),
            pattern: "latency_2023*.txt".to_string(),
            target: "latency_{gpu}_{render_ms}ms.txt".to_string(),
        });
        let runner = SweepRunner::builder(sweep)
            .options(fast_options())
            .vars(HashMap::from([("gpu".to_string(), "TitanRTX".to_string())]))
            .build()
            .unwrap();

        let queue = Queue::default();
        let mut launcher = ScriptedLauncher::new(queue.clone(), vec![done()]);
        launcher.artifact_dir = Some(dir.path().to_path_buf());
        let mut signals = QueueSignals {
            queue,
            fail_try_recv: false,
        };

        let configurations = runner.configurations();
        let result = runner
            .run_sweep(&configurations, &mut launcher, &mut signals)
            .unwrap();

        assert_eq!(
            result.configurations[1].artifact,
            Some(dir.path().join("latency_TitanRTX_10ms.txt"))
        );
        assert!(dir.path().join("latency_TitanRTX_0ms.txt").is_file());
        assert!(dir.path().join("latency_TitanRTX_10ms.txt").is_file());
        assert!(!dir.path().join("latency_2023_2.txt").exists());
    }

    #[test]
    fn test_missing_artifact_does_not_stop_sweep() {
        let dir = tempdir().unwrap();
        let mut sweep = mint_sweep(vec![ParameterList::new("render_ms", &["0", "10"])]);
        sweep.artifact = Some(ArtifactSpec {
            dir: Some(dir.path().to_path_buf()),
            pattern: "latency_2023*.txt".to_string(),
            target: "latency_{render_ms}ms.txt".to_string(),
        });
        let runner = runner(sweep);

        let queue = Queue::default();
        let mut launcher = ScriptedLauncher::new(queue.clone(), vec![done()]);
        let mut signals = QueueSignals {
            queue,
            fail_try_recv: false,
        };

        let configurations = runner.configurations();
        let result = runner
            .run_sweep(&configurations, &mut launcher, &mut signals)
            .unwrap();

        assert_eq!(result.configurations.len(), 2);
        assert!(result.configurations.iter().all(|c| c.artifact.is_none()));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_launch_failure_is_fatal() {
        struct FailingLauncher;
        impl ProcessLauncher for FailingLauncher {
            fn launch(&mut self, command: &ProcessCommand) -> Result<ProcessHandle> {
                anyhow::bail!("cannot start {}", command.role)
            }
        }

        let runner = runner(mint_sweep(Vec::new()));
        let mut signals = QueueSignals {
            queue: Queue::default(),
            fail_try_recv: false,
        };
        let result = runner.run_sweep(
            &[ParameterSet::default()],
            &mut FailingLauncher,
            &mut signals,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_rejects_empty_topic() {
        let result = SweepRunner::builder(mint_sweep(Vec::new()))
            .options(fast_options())
            .topic("")
            .build();
        assert!(result.is_err());
    }
}
