//! # Host Command Execution
//!
//! Runs external programs on the host: the container runtime CLI for image
//! builds and interactive attach, platform trust-store exporters and the cloud
//! CLI used by `validate`.
//!
//! ## Core Components
//!
//! - **[`CommandExecutor`]**: the execution seam, mocked in tests
//! - **[`HostExecutor`]**: `tokio::process::Command` implementation
//! - **[`ExecutionCommand`]**: program, argv, environment and timeout
//! - **[`ExecutionResult`]**: captured output, exit code and duration
//!
//! Commands are always spawned from an argv list. Nothing here goes through a
//! shell, so values such as credentials or proxy URLs are never interpreted.
//! Secret environment values are kept in [`SecretString`] until the moment the
//! child process is spawned and are left out of `Debug` output.
//!
//! ```rust,no_run
//! use devbox::executor::{CommandExecutor, ExecutionCommand, HostExecutor};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let executor = HostExecutor::new();
//!     let command = ExecutionCommand::new("docker", vec!["version".to_string()])
//!         .with_timeout(Duration::from_secs(10));
//!
//!     let result = executor.execute(command).await?;
//!     println!("exit code {}", result.exit_code);
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use secrecy::SecretString;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Host-based command execution.
///
/// Implements [`HostExecutor`] for direct process execution on the
/// host system using `tokio::process::Command`.
pub mod host;

pub use host::HostExecutor;

/// Result of command execution
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Standard output from the command
    pub stdout: String,
    /// Standard error from the command
    pub stderr: String,
    /// Exit code (0 = success, non-zero = failure)
    pub exit_code: i32,
    /// Duration of command execution
    pub duration: Duration,
}

impl ExecutionResult {
    /// Check if the command executed successfully (exit code 0)
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stderr if it has content, otherwise stdout, trimmed.
    pub fn diagnostic_output(&self) -> &str {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim()
        } else {
            stderr
        }
    }
}

/// Command to execute
#[derive(Debug)]
pub struct ExecutionCommand {
    /// Program name or path to execute
    pub program: String,
    /// Command line arguments
    pub args: Vec<String>,
    /// Working directory for command execution
    pub working_dir: Option<PathBuf>,
    /// Environment variables to set
    pub env: BTreeMap<String, String>,
    /// Environment variables holding secret material
    pub secret_env: BTreeMap<String, SecretString>,
    /// Maximum execution time (None = no timeout)
    pub timeout: Option<Duration>,
}

impl ExecutionCommand {
    /// Create a new command with just program and args
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir: None,
            env: BTreeMap::new(),
            secret_env: BTreeMap::new(),
            timeout: None,
        }
    }

    /// Set the working directory
    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = Some(dir);
        self
    }

    /// Add an environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Add an environment variable whose value must not be logged
    pub fn with_secret_env(mut self, key: impl Into<String>, value: SecretString) -> Self {
        self.secret_env.insert(key.into(), value);
        self
    }

    /// Set execution timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Program and arguments for log lines. Environment values are never included.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Errors during command execution
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// The program could not be found on PATH
    #[error("Program not found: {0}")]
    NotFound(String),

    /// Command execution timed out
    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    /// I/O error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Runs host commands.
///
/// [`HostExecutor`] is the production implementation; tests substitute
/// scripted executors to exercise trust-store and credential code paths.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run a command to completion, capturing its output.
    ///
    /// # Errors
    ///
    /// Returns an error if the program cannot be spawned or times out. A
    /// non-zero exit code is not an error.
    async fn execute(&self, command: ExecutionCommand) -> Result<ExecutionResult, ExecutorError>;

    /// Run a command attached to the terminal and return its exit code.
    ///
    /// # Errors
    ///
    /// Returns an error if the program cannot be spawned.
    async fn execute_interactive(&self, command: ExecutionCommand) -> Result<i32, ExecutorError>;

    /// Whether `program` can be found on PATH.
    fn is_available(&self, program: &str) -> bool;

    /// Executor type name for logging
    fn executor_type(&self) -> &'static str;
}
