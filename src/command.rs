use anyhow::{Context, Result};
use log::debug;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

#[cfg(unix)]
use std::os::unix::process::CommandExt;

/// Command execution context
#[derive(Debug, Clone, Default)]
pub struct CommandContext {
    /// Name of the command for logging
    pub command_name: Option<String>,
    /// Current working directory
    pub working_dir: Option<PathBuf>,
    /// Environment variables to set
    pub env_vars: HashMap<String, String>,
    /// Whether to put the child in its own process group (Unix only)
    pub process_group: bool,
    /// Send stdout/stderr to the null device instead of inheriting them
    pub silence_output: bool,
}

/// Builder for CommandExecutor
pub struct CommandExecutorBuilder {
    context: CommandContext,
}

impl Default for CommandExecutorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandExecutorBuilder {
    pub fn new() -> Self {
        Self {
            context: CommandContext::default(),
        }
    }

    pub fn silence_output(mut self, silence: bool) -> Self {
        self.context.silence_output = silence;
        self
    }

    pub fn working_dir<P: AsRef<Path>>(mut self, dir: Option<P>) -> Self {
        self.context.working_dir = dir.map(|d| d.as_ref().to_path_buf());
        self
    }

    pub fn process_group(mut self, create_group: bool) -> Self {
        self.context.process_group = create_group;
        self
    }

    pub fn env_vars(mut self, vars: HashMap<String, String>) -> Self {
        self.context.env_vars.extend(vars);
        self
    }

    pub fn env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.env_vars.insert(key.into(), value.into());
        self
    }

    /// Set a name for the command for logging purposes
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.context.command_name = Some(name.into());
        self
    }

    pub fn build(self) -> CommandExecutor {
        CommandExecutor {
            context: self.context,
        }
    }
}

/// Spawns external programs without waiting on them
pub struct CommandExecutor {
    context: CommandContext,
}

impl CommandExecutor {
    pub fn builder() -> CommandExecutorBuilder {
        CommandExecutorBuilder::new()
    }

    /// Launch a command line through the platform shell and return immediately
    pub fn spawn_shell(&self, cmd_line: &str) -> Result<Child> {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;

            // cmd.exe parses its own command line, so the line must reach it unquoted
            let mut command = Command::new("cmd");
            command.arg("/C").raw_arg(cmd_line);
            self.spawn(command, &self.format_command("cmd", &["/C", cmd_line]))
        }

        #[cfg(not(windows))]
        {
            self.launch_command("sh", &["-c", cmd_line])
        }
    }

    /// Launch a command with arguments, returning the child process handle
    pub fn launch_command(&self, cmd: &str, args: &[&str]) -> Result<Child> {
        let mut command = Command::new(cmd);
        command.args(args);
        self.spawn(command, &self.format_command(cmd, args))
    }

    fn spawn(&self, mut command: Command, command_str: &str) -> Result<Child> {
        debug!("Launching command: {}", command_str);

        if let Some(dir) = &self.context.working_dir {
            command.current_dir(dir);
        }

        for (key, value) in &self.context.env_vars {
            command.env(key, value);
        }

        // The sweep never reads from the child, so pipes would eventually block it
        if self.context.silence_output {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        } else {
            command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        }
        command.stdin(Stdio::null());

        #[cfg(unix)]
        {
            if self.context.process_group {
                command.process_group(0);
            }
        }

        let child = command
            .spawn()
            .with_context(|| format!("Failed to spawn command: {}", command_str))?;

        debug!("Spawned {} with PID {}", command_str, child.id());
        Ok(child)
    }

    /// Format command and arguments for logging
    fn format_command(&self, cmd: &str, args: &[&str]) -> String {
        if let Some(name) = &self.context.command_name {
            return name.clone();
        }

        format!("{} {}", cmd, args.join(" "))
    }
}
