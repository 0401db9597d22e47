//! External command task implementation.
//!
//! [`CommandTask`] runs a program or shell command as a graph task. Outputs of
//! the task's dependencies are passed to the process as environment variables
//! and the trimmed stdout becomes the task's output.
//!
//! # Inputs
//!
//! Each dependency output is exported as `TESSERA_INPUT_<ID>`, where `<ID>` is
//! the dependency ID uppercased with every non-alphanumeric character replaced
//! by `_`. String outputs are passed raw, any other value as JSON. The full
//! input map is also exported as a JSON object on `TESSERA_INPUTS`.
//!
//! # Outputs
//!
//! Stdout is trimmed and parsed as JSON. If it is not valid JSON the trimmed
//! text is stored as a string, and empty output becomes `null`.
//!
//! ```rust
//! use tessera::{CommandTask, Environment};
//! use std::time::Duration;
//!
//! let render = CommandTask::shell("ffmpeg -i \"$TESSERA_INPUT_SCRIPT\" out.mp4 && echo out.mp4")
//!     .env("FFREPORT", "level=32")
//!     .timeout(Duration::from_secs(600))
//!     .build();
//!
//! let probe = CommandTask::builder("ffprobe")
//!     .args(["-v", "quiet", "-print_format", "json", "out.mp4"])
//!     .environment(Environment::new().with_var("LC_ALL", "C"))
//!     .build();
//! # let _ = (render, probe);
//! ```
//!
//! # Error Handling
//!
//! - **Non-zero exit code**: [`TaskError::CommandFailed`] with the exit code
//!   and stderr
//! - **Timeout**: [`TaskError::Timeout`] (transient); the child is killed
//! - **Spawn failure**: [`TaskError::ExecutionFailed`], e.g. program not found

use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::core::environment::Environment;
use crate::core::inputs::TaskInputs;
use crate::core::retry::RetryPolicy;
use crate::core::task::{Task, TaskError};
use crate::core::types::TaskId;

/// Prefix of the per-dependency input variables.
pub const INPUT_VAR_PREFIX: &str = "TESSERA_INPUT_";

/// Variable carrying every dependency output as one JSON object.
pub const INPUTS_VAR: &str = "TESSERA_INPUTS";

/// A task that executes an external command.
#[derive(Debug, Clone)]
pub struct CommandTask {
    program: String,
    args: Vec<String>,
    environment: Environment,
    working_dir: Option<PathBuf>,
    retry_policy: Option<RetryPolicy>,
    timeout: Option<Duration>,
    description: Option<String>,
}

impl CommandTask {
    /// Create a new builder for a command task.
    pub fn builder(program: impl Into<String>) -> CommandTaskBuilder {
        CommandTaskBuilder::new(program)
    }

    /// Create a builder that runs `command` through `sh -c`.
    pub fn shell(command: impl Into<String>) -> CommandTaskBuilder {
        CommandTaskBuilder::new("sh").arg("-c").arg(command)
    }

    /// Get the program being executed.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Get the command arguments.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Get the configured environment.
    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    /// Get the working directory.
    pub fn working_dir(&self) -> Option<&PathBuf> {
        self.working_dir.as_ref()
    }

    /// Get the timeout duration.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn command(&self, inputs: &TaskInputs) -> Result<Command, TaskError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);

        for (key, value) in self.environment.iter() {
            cmd.env(key, value);
        }
        for (dependency, value) in inputs.iter() {
            cmd.env(input_var_name(dependency), input_var_value(value));
        }
        let all_inputs = serde_json::to_string(&inputs)
            .map_err(|e| TaskError::ExecutionFailed(e.to_string()))?;
        cmd.env(INPUTS_VAR, all_inputs);

        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        // Dropping the output future on timeout must not leave the child running.
        cmd.kill_on_drop(true);
        Ok(cmd)
    }
}

/// Name of the variable carrying the output of `dependency`.
pub fn input_var_name(dependency: &TaskId) -> String {
    let suffix: String = dependency
        .as_str()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{}{}", INPUT_VAR_PREFIX, suffix)
}

fn input_var_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Interpret captured stdout as a task output.
pub fn parse_output(stdout: &str) -> Value {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string()))
}

#[async_trait]
impl Task for CommandTask {
    async fn run(&self, inputs: TaskInputs) -> Result<Value, TaskError> {
        let mut cmd = self.command(&inputs)?;
        debug!(program = %self.program, args = ?self.args, "spawning command");

        let output = match self.timeout {
            Some(duration) => timeout(duration, cmd.output())
                .await
                .map_err(|_| TaskError::Timeout(duration))?
                .map_err(|e| TaskError::ExecutionFailed(e.to_string()))?,
            None => cmd
                .output()
                .await
                .map_err(|e| TaskError::ExecutionFailed(e.to_string()))?,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(TaskError::CommandFailed {
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        Ok(parse_output(&String::from_utf8_lossy(&output.stdout)))
    }

    fn retry_policy(&self) -> Option<RetryPolicy> {
        self.retry_policy
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

/// Builder for creating `CommandTask` instances.
#[derive(Debug, Clone)]
pub struct CommandTaskBuilder {
    program: String,
    args: Vec<String>,
    environment: Environment,
    working_dir: Option<PathBuf>,
    retry_policy: Option<RetryPolicy>,
    timeout: Option<Duration>,
    description: Option<String>,
}

impl CommandTaskBuilder {
    /// Create a new builder with the given program.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            environment: Environment::default(),
            working_dir: None,
            retry_policy: None,
            timeout: None,
            description: None,
        }
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set environment variables, replacing any set before.
    pub fn environment(mut self, env: Environment) -> Self {
        self.environment = env;
        self
    }

    /// Add a single environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.set(key, value);
        self
    }

    /// Set the working directory.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Override the graph's retry policy for this task.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Set the execution timeout.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Set a human-readable description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Build the `CommandTask`.
    pub fn build(self) -> CommandTask {
        CommandTask {
            program: self.program,
            args: self.args,
            environment: self.environment,
            working_dir: self.working_dir,
            retry_policy: self.retry_policy,
            timeout: self.timeout,
            description: self.description,
        }
    }
}
