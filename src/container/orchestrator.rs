//! Container lifecycle calls against the runtime API.
//!
//! Creation, startup, shutdown and removal of the single named project
//! container, plus log retrieval for start diagnostics.

use crate::container::{ContainerClient, ContainerError, ContainerSpec, Result};
use futures::stream::StreamExt;
use tracing::{debug, info};

/// Seconds the runtime waits for the entry process before killing it.
pub const DEFAULT_STOP_TIMEOUT: i64 = 10;

fn not_found_or(name: &str, e: bollard::errors::Error) -> ContainerError {
    match e {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        } => ContainerError::NotFound(name.to_string()),
        e => ContainerError::ApiError(e),
    }
}

/// Creates, starts, stops and removes containers.
pub struct ContainerOrchestrator {
    client: ContainerClient,
    stop_timeout: i64,
}

impl ContainerOrchestrator {
    pub fn new(client: ContainerClient) -> Self {
        Self {
            client,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }

    pub fn with_stop_timeout(mut self, seconds: i64) -> Self {
        self.stop_timeout = seconds;
        self
    }

    /// Create a container from a spec.
    ///
    /// # Returns
    ///
    /// Container ID
    ///
    /// # Errors
    ///
    /// Returns error if container creation fails.
    pub async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let options = bollard::container::CreateContainerOptions {
            name: spec.name.as_str(),
            ..Default::default()
        };

        debug!("Creating container: {} from {}", spec.name, spec.image);

        let response = self
            .client
            .docker()
            .create_container(Some(options), spec.to_runtime_config())
            .await?;

        for warning in &response.warnings {
            debug!("Runtime warning for {}: {}", spec.name, warning);
        }
        info!("Created container: {} ({})", spec.name, response.id);

        Ok(response.id)
    }

    /// Start a container.
    ///
    /// # Errors
    ///
    /// Returns error if container start fails.
    pub async fn start_container(&self, name: &str) -> Result<()> {
        debug!("Starting container: {}", name);

        self.client
            .docker()
            .start_container(name, None::<bollard::container::StartContainerOptions<String>>)
            .await
            .map_err(|e| not_found_or(name, e))?;

        info!("Started container: {}", name);
        Ok(())
    }

    /// Stop a container. Stopping a container that is not running succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::NotFound`] if the container does not exist.
    pub async fn stop_container(&self, name: &str) -> Result<()> {
        debug!("Stopping container: {}", name);

        match self
            .client
            .docker()
            .stop_container(
                name,
                Some(bollard::container::StopContainerOptions {
                    t: self.stop_timeout,
                }),
            )
            .await
        {
            Ok(()) => {}
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => {
                debug!("Container {} was not running", name);
            }
            Err(e) => return Err(not_found_or(name, e)),
        }

        info!("Stopped container: {}", name);
        Ok(())
    }

    /// Remove a container.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::NotFound`] if the container does not exist.
    pub async fn remove_container(&self, name: &str, force: bool) -> Result<()> {
        debug!("Removing container: {}", name);

        self.client
            .docker()
            .remove_container(
                name,
                Some(bollard::container::RemoveContainerOptions {
                    force,
                    v: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| not_found_or(name, e))?;

        info!("Removed container: {}", name);
        Ok(())
    }

    /// Last `tail` lines of container output.
    ///
    /// # Errors
    ///
    /// Returns error if log retrieval fails.
    pub async fn logs(&self, name: &str, tail: usize) -> Result<String> {
        let mut stream = self.client.docker().logs(
            name,
            Some(bollard::container::LogsOptions::<String> {
                stdout: true,
                stderr: true,
                tail: tail.to_string(),
                ..Default::default()
            }),
        );
        let mut output = String::new();

        while let Some(result) = stream.next().await {
            match result {
                Ok(log) => output.push_str(&log.to_string()),
                Err(e) => return Err(not_found_or(name, e)),
            }
        }

        Ok(output)
    }

    pub fn client(&self) -> &ContainerClient {
        &self.client
    }
}
