use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::process::{Child, ExitStatus};

use crate::command::CommandExecutor;
use crate::config::ProcessSpec;
use crate::sweep::parameter::{ParameterMatrix, ParameterSet};

/// Which side of the benchmark a process plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessRole {
    Producer,
    Consumer,
}

impl fmt::Display for ProcessRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessRole::Producer => write!(f, "producer"),
            ProcessRole::Consumer => write!(f, "consumer"),
        }
    }
}

/// A fully rendered command, ready to launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessCommand {
    pub role: ProcessRole,
    pub command_line: String,
    pub working_dir: Option<PathBuf>,
    pub env: HashMap<String, String>,
}

impl ProcessCommand {
    /// Render a process spec for one configuration.
    ///
    /// Conditional arguments are appended in declaration order when all of
    /// their conditions hold.
    pub fn render(
        role: ProcessRole,
        spec: &ProcessSpec,
        params: &ParameterSet,
        vars: &HashMap<String, String>,
    ) -> Self {
        let mut command_line = ParameterMatrix::apply_parameters(&spec.command, params, vars);
        for conditional in &spec.conditional_args {
            if params.matches(&conditional.when) {
                command_line.push(' ');
                command_line.push_str(&ParameterMatrix::apply_parameters(
                    &conditional.args,
                    params,
                    vars,
                ));
            }
        }

        let env = spec
            .env
            .iter()
            .flatten()
            .map(|(k, v)| (k.clone(), ParameterMatrix::apply_parameters(v, params, vars)))
            .collect();

        Self {
            role,
            command_line,
            working_dir: spec.working_dir.clone(),
            env,
        }
    }
}

/// Handle on a launched process. The sweep never waits on it, it only polls.
#[derive(Debug)]
pub struct ProcessHandle {
    command_line: String,
    child: Option<Child>,
}

impl ProcessHandle {
    pub fn from_child(command_line: impl Into<String>, child: Child) -> Self {
        Self {
            command_line: command_line.into(),
            child: Some(child),
        }
    }

    /// A handle with no OS process behind it
    pub fn detached(command_line: impl Into<String>) -> Self {
        Self {
            command_line: command_line.into(),
            child: None,
        }
    }

    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    /// Exit status if the process has already terminated
    pub fn try_status(&mut self) -> Result<Option<ExitStatus>> {
        match self.child.as_mut() {
            Some(child) => child
                .try_wait()
                .with_context(|| format!("Failed to poll process: {}", self.command_line)),
            None => Ok(None),
        }
    }
}

/// Starts external processes for the sweep
pub trait ProcessLauncher {
    fn launch(&mut self, command: &ProcessCommand) -> Result<ProcessHandle>;
}

/// Launches commands through the platform shell
#[derive(Debug, Clone, Default)]
pub struct ShellLauncher {
    silence_output: bool,
}

impl ShellLauncher {
    pub fn new(silence_output: bool) -> Self {
        Self { silence_output }
    }
}

impl ProcessLauncher for ShellLauncher {
    fn launch(&mut self, command: &ProcessCommand) -> Result<ProcessHandle> {
        let executor = CommandExecutor::builder()
            .name(format!("{}: {}", command.role, command.command_line))
            .working_dir(command.working_dir.as_ref())
            .env_vars(command.env.clone())
            .silence_output(self.silence_output)
            .process_group(true)
            .build();

        let child = executor
            .spawn_shell(&command.command_line)
            .with_context(|| format!("Failed to launch {}", command.role))?;

        Ok(ProcessHandle::from_child(&command.command_line, child))
    }
}
