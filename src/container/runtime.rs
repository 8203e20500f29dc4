//! The container runtime seam.
//!
//! [`ContainerLifecycleManager`](crate::container::ContainerLifecycleManager)
//! drives Docker or Podman only through [`ContainerRuntime`]. [`DockerRuntime`]
//! serves most calls from the bollard API and uses the runtime CLI where the
//! API is awkward: image builds and attaching the user's terminal.

use crate::container::{
    BuildRequest, ContainerClient, ContainerError, ContainerOrchestrator, ContainerSpec,
    ContainerStatus, HealthProbe, ImageBuilder, NetworkManager, Result, RuntimeType,
};
use crate::executor::{CommandExecutor, ExecutionCommand, ExecutorError};
use crate::security::HostCapabilities;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Operations the lifecycle manager needs from a container runtime.
///
/// Missing objects are reported as [`ContainerError::NotFound`] by the
/// removal and stop calls so callers can tell "already gone" from failure.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Runtime name for messages, e.g. `Docker`.
    fn name(&self) -> String;

    async fn host_capabilities(&self) -> Result<HostCapabilities>;

    async fn image_exists(&self, image: &str) -> Result<bool>;

    async fn build_image(&self, request: &BuildRequest) -> Result<()>;

    async fn remove_image(&self, image: &str) -> Result<()>;

    /// Images carrying the project label.
    async fn project_images(&self, project: &str) -> Result<Vec<String>>;

    async fn container_status(&self, name: &str) -> Result<ContainerStatus>;

    async fn create_container(&self, spec: &ContainerSpec) -> Result<()>;

    async fn start_container(&self, name: &str) -> Result<()>;

    async fn stop_container(&self, name: &str) -> Result<()>;

    async fn remove_container(&self, name: &str) -> Result<()>;

    async fn container_logs(&self, name: &str, tail: usize) -> Result<String>;

    /// Start a created container with the terminal attached and return the
    /// exit status of its entry process.
    async fn attach(&self, name: &str) -> Result<i32>;

    /// Run `command` in a running container with the terminal attached.
    async fn exec_interactive(&self, name: &str, command: &[String]) -> Result<i32>;

    async fn launch_health_probe(&self, name: &str, probe: &HealthProbe) -> Result<()>;

    async fn ensure_network(&self, name: &str, labels: &BTreeMap<String, String>) -> Result<()>;

    async fn remove_network(&self, name: &str) -> Result<()>;
}

/// Docker or Podman reached through bollard and the matching CLI.
pub struct DockerRuntime {
    client: ContainerClient,
    orchestrator: ContainerOrchestrator,
    images: ImageBuilder,
    networks: NetworkManager,
    executor: Arc<dyn CommandExecutor>,
    runtime_type: RuntimeType,
    program: String,
}

impl DockerRuntime {
    /// Connect to the runtime API and locate its CLI.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::RuntimeUnavailable`] if no runtime answers.
    pub async fn connect(home: Option<&Path>, executor: Arc<dyn CommandExecutor>) -> Result<Self> {
        let client = ContainerClient::connect(home).await?;

        let runtime_type = match client.runtime_type().await {
            Ok(t) => t,
            Err(e) => {
                debug!("Runtime detection failed, assuming Docker: {}", e);
                RuntimeType::Docker
            }
        };

        let mut program = runtime_type.cli_program().to_string();
        if !executor.is_available(&program) {
            let other = match runtime_type {
                RuntimeType::Docker => RuntimeType::Podman,
                RuntimeType::Podman => RuntimeType::Docker,
            };
            if executor.is_available(other.cli_program()) {
                debug!("{} CLI not found, using {}", program, other.cli_program());
                program = other.cli_program().to_string();
            } else {
                warn!(
                    "{} CLI not found on PATH; build and shell will fail",
                    program
                );
            }
        }

        let docker = client.docker().clone();
        Ok(Self {
            orchestrator: ContainerOrchestrator::new(client.clone()),
            images: ImageBuilder::new(docker.clone(), executor.clone(), program.clone()),
            networks: NetworkManager::new(docker),
            client,
            executor,
            runtime_type,
            program,
        })
    }

    async fn run_cli_interactive(&self, args: Vec<String>) -> Result<i32> {
        let command = ExecutionCommand::new(self.program.clone(), args);
        let command_line = command.display();
        debug!("Running {}", command_line);

        self.executor
            .execute_interactive(command)
            .await
            .map_err(|e| match e {
                ExecutorError::NotFound(program) => ContainerError::RuntimeUnavailable(format!(
                    "{} CLI not found on PATH",
                    program
                )),
                e => ContainerError::ExecutionError(format!("Failed to run {}: {}", command_line, e)),
            })
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn name(&self) -> String {
        self.runtime_type.to_string()
    }

    async fn host_capabilities(&self) -> Result<HostCapabilities> {
        self.client.host_capabilities().await
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        self.images.image_exists(image).await
    }

    async fn build_image(&self, request: &BuildRequest) -> Result<()> {
        self.images.build(request).await
    }

    async fn remove_image(&self, image: &str) -> Result<()> {
        self.images.remove_image(image, false).await
    }

    async fn project_images(&self, project: &str) -> Result<Vec<String>> {
        self.images.project_images(project).await
    }

    async fn container_status(&self, name: &str) -> Result<ContainerStatus> {
        self.client.container_status(name).await
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<()> {
        self.orchestrator.create_container(spec).await.map(|_| ())
    }

    async fn start_container(&self, name: &str) -> Result<()> {
        self.orchestrator.start_container(name).await
    }

    async fn stop_container(&self, name: &str) -> Result<()> {
        self.orchestrator.stop_container(name).await
    }

    async fn remove_container(&self, name: &str) -> Result<()> {
        self.orchestrator.remove_container(name, true).await
    }

    async fn container_logs(&self, name: &str, tail: usize) -> Result<String> {
        self.orchestrator.logs(name, tail).await
    }

    async fn attach(&self, name: &str) -> Result<i32> {
        self.run_cli_interactive(vec![
            "start".to_string(),
            "--attach".to_string(),
            "--interactive".to_string(),
            name.to_string(),
        ])
        .await
    }

    async fn exec_interactive(&self, name: &str, command: &[String]) -> Result<i32> {
        let mut args = vec!["exec".to_string(), "-it".to_string(), name.to_string()];
        args.extend(command.iter().cloned());
        self.run_cli_interactive(args).await
    }

    async fn launch_health_probe(&self, name: &str, probe: &HealthProbe) -> Result<()> {
        probe.launch(self.client.docker(), name).await
    }

    async fn ensure_network(&self, name: &str, labels: &BTreeMap<String, String>) -> Result<()> {
        self.networks.ensure_internal(name, labels).await
    }

    async fn remove_network(&self, name: &str) -> Result<()> {
        self.networks.remove_network(name).await
    }
}
