//! Native host command execution.
//!
//! Executes commands directly on the host system using `tokio::process::Command`.

use super::{CommandExecutor, ExecutionCommand, ExecutionResult, ExecutorError};
use async_trait::async_trait;
use secrecy::ExposeSecret;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tracing::debug;

/// Executes commands directly on the host system
#[derive(Debug, Clone)]
pub struct HostExecutor;

impl HostExecutor {
    /// Create a new host executor
    pub fn new() -> Self {
        Self
    }

    fn command(cmd: &ExecutionCommand) -> Command {
        let mut command = Command::new(&cmd.program);
        command.args(&cmd.args);

        if let Some(ref dir) = cmd.working_dir {
            command.current_dir(dir);
        }

        for (key, value) in &cmd.env {
            command.env(key, value);
        }
        for (key, value) in &cmd.secret_env {
            command.env(key, value.expose_secret());
        }

        command
    }

    fn spawn_error(program: &str, err: std::io::Error) -> ExecutorError {
        if err.kind() == std::io::ErrorKind::NotFound {
            ExecutorError::NotFound(program.to_string())
        } else {
            ExecutorError::IoError(err)
        }
    }
}

impl Default for HostExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandExecutor for HostExecutor {
    async fn execute(&self, cmd: ExecutionCommand) -> Result<ExecutionResult, ExecutorError> {
        debug!("Executing command on host: {}", cmd.display());

        let start = Instant::now();
        let mut command = Self::command(&cmd);
        command.stdin(Stdio::null()).kill_on_drop(true);

        // Execute command with optional timeout
        let output = if let Some(timeout) = cmd.timeout {
            match tokio::time::timeout(timeout, command.output()).await {
                Ok(result) => result.map_err(|e| Self::spawn_error(&cmd.program, e))?,
                Err(_) => {
                    return Err(ExecutorError::Timeout(timeout));
                }
            }
        } else {
            command
                .output()
                .await
                .map_err(|e| Self::spawn_error(&cmd.program, e))?
        };

        let duration = start.elapsed();

        Ok(ExecutionResult {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
            duration,
        })
    }

    async fn execute_interactive(&self, cmd: ExecutionCommand) -> Result<i32, ExecutorError> {
        debug!("Attaching to host command: {}", cmd.display());

        let mut command = Self::command(&cmd);
        command
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        let status = command
            .status()
            .await
            .map_err(|e| Self::spawn_error(&cmd.program, e))?;

        Ok(status.code().unwrap_or(-1))
    }

    fn is_available(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }

    fn executor_type(&self) -> &'static str {
        "host"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_host_executor_simple_command() {
        let executor = HostExecutor::new();

        let cmd = ExecutionCommand::new("echo", vec!["hello".to_string()]);

        let result = executor.execute(cmd).await.unwrap();
        assert_eq!(result.exit_code, 0);
        assert!(result.stdout.contains("hello"));
        assert!(result.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_host_executor_working_directory() {
        let executor = HostExecutor::new();

        let cmd = ExecutionCommand::new("pwd", vec![]).with_working_dir(PathBuf::from("/tmp"));

        let result = executor.execute(cmd).await.unwrap();
        assert_eq!(result.exit_code, 0);
        assert!(result.stdout.contains("/tmp") || result.stdout.contains("/private/tmp"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_host_executor_secret_environment_reaches_child() {
        let executor = HostExecutor::new();

        let cmd = ExecutionCommand::new("printenv", vec!["DEVBOX_TEST_SECRET".to_string()])
            .with_secret_env("DEVBOX_TEST_SECRET", SecretString::from("s3cr3t".to_string()));
        assert!(!format!("{:?}", cmd).contains("s3cr3t"));

        let result = executor.execute(cmd).await.unwrap();
        assert_eq!(result.stdout.trim(), "s3cr3t");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_host_executor_timeout() {
        let executor = HostExecutor::new();

        let cmd = ExecutionCommand::new("sleep", vec!["2".to_string()])
            .with_timeout(std::time::Duration::from_millis(100));

        let result = executor.execute(cmd).await;
        assert!(matches!(result.unwrap_err(), ExecutorError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_missing_program_is_not_found() {
        let executor = HostExecutor::new();
        let cmd = ExecutionCommand::new("devbox-no-such-program", vec![]);

        let result = executor.execute(cmd).await;
        assert!(matches!(result.unwrap_err(), ExecutorError::NotFound(_)));
        assert!(!executor.is_available("devbox-no-such-program"));
    }

    #[test]
    fn test_display_omits_environment() {
        let cmd = ExecutionCommand::new("aws", vec!["sts".to_string(), "get-caller-identity".to_string()])
            .with_env("AWS_REGION", "eu-west-1");
        assert_eq!(cmd.display(), "aws sts get-caller-identity");
    }
}
