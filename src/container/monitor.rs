//! Background health probe.
//!
//! With `HEALTH_PROBE=true` a detached exec runs a small shell loop inside the
//! container that appends load average and memory use to
//! `/var/log/devbox/health.log` every interval. The CLI does not wait for it;
//! the loop ends with the container.

use crate::container::{ContainerError, Result};
use crate::env::container::HEALTH_LOG;
use bollard::Docker;
use bollard::exec::{CreateExecOptions, StartExecResults};
use std::borrow::Cow;
use tracing::{debug, info};

/// Interval used when the configured value is zero.
pub const MIN_INTERVAL_SECS: u64 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthProbe {
    interval_secs: u64,
    log_path: String,
}

impl HealthProbe {
    pub fn new(interval_secs: u64) -> Self {
        Self {
            interval_secs: interval_secs.max(MIN_INTERVAL_SECS),
            log_path: HEALTH_LOG.to_string(),
        }
    }

    pub fn with_log_path(mut self, path: impl Into<String>) -> Self {
        self.log_path = path.into();
        self
    }

    pub fn interval_secs(&self) -> u64 {
        self.interval_secs
    }

    /// The sampling loop as a POSIX shell script.
    pub fn script(&self) -> String {
        let log = shell_escape::escape(Cow::from(self.log_path.as_str()));
        format!(
            "while true; do \
             ts=$(date -u +%Y-%m-%dT%H:%M:%SZ); \
             load=$(cut -d' ' -f1-3 /proc/loadavg); \
             mem=$(awk '/MemTotal/{{t=$2}} /MemAvailable/{{a=$2}} END{{printf \"%d/%d\", t-a, t}}' /proc/meminfo); \
             echo \"$ts load=$load mem_kb=$mem\" >> {log}; \
             sleep {interval}; \
             done",
            log = log,
            interval = self.interval_secs
        )
    }

    /// Exec command line.
    pub fn command(&self) -> Vec<String> {
        vec!["/bin/sh".to_string(), "-c".to_string(), self.script()]
    }

    /// Start the probe as a detached exec in a running container.
    ///
    /// # Errors
    ///
    /// Returns error if the exec cannot be created or started.
    pub async fn launch(&self, docker: &Docker, container: &str) -> Result<()> {
        debug!("Launching health probe in {}", container);

        let exec = docker
            .create_exec(
                container,
                CreateExecOptions {
                    cmd: Some(self.command()),
                    attach_stdout: Some(false),
                    attach_stderr: Some(false),
                    tty: Some(false),
                    ..Default::default()
                },
            )
            .await?;

        match docker
            .start_exec(
                &exec.id,
                Some(bollard::exec::StartExecOptions {
                    detach: true,
                    ..Default::default()
                }),
            )
            .await?
        {
            StartExecResults::Detached => {
                info!(
                    "Health probe writing to {} every {}s",
                    self.log_path, self.interval_secs
                );
                Ok(())
            }
            StartExecResults::Attached { .. } => Err(ContainerError::ExecutionError(
                "Health probe exec unexpectedly attached".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_samples_load_and_memory() {
        let probe = HealthProbe::new(30);
        let script = probe.script();
        assert!(script.contains("/proc/loadavg"));
        assert!(script.contains("/proc/meminfo"));
        assert!(script.contains("sleep 30"));
        assert!(script.contains(">> /var/log/devbox/health.log"));
    }

    #[test]
    fn test_log_path_is_quoted() {
        let probe = HealthProbe::new(5).with_log_path("/var/log/my dir/health.log");
        assert!(probe.script().contains(">> '/var/log/my dir/health.log'"));
    }

    #[test]
    fn test_zero_interval_is_raised() {
        assert_eq!(HealthProbe::new(0).interval_secs(), MIN_INTERVAL_SECS);
    }

    #[test]
    fn test_command_runs_through_sh() {
        let command = HealthProbe::new(10).command();
        assert_eq!(command[0], "/bin/sh");
        assert_eq!(command[1], "-c");
    }
}
