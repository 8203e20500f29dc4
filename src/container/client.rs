//! Docker/Podman client wrapper.
//!
//! Provides a simplified interface to the bollard Docker API with connection
//! fallback to the Podman sockets and a ping check before first use.

use crate::container::{ContainerError, Result};
use crate::security::HostCapabilities;
use bollard::Docker;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Seconds before an API call over an explicit socket times out.
const SOCKET_TIMEOUT: u64 = 120;

/// Docker/Podman API client wrapper.
#[derive(Clone)]
pub struct ContainerClient {
    docker: Arc<Docker>,
}

impl ContainerClient {
    /// Connect to Docker, falling back to the rootless and system Podman
    /// sockets. `home` locates the rootless socket.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::RuntimeUnavailable`] if no candidate answers
    /// a ping.
    pub async fn connect(home: Option<&Path>) -> Result<Self> {
        debug!("Attempting to connect to container runtime...");

        match Docker::connect_with_local_defaults() {
            Ok(docker) => match docker.ping().await {
                Ok(_) => {
                    info!("Connected to container runtime via local defaults");
                    return Ok(Self::from_docker(docker));
                }
                Err(e) => debug!("Local defaults did not answer: {}", e),
            },
            Err(e) => debug!("Local defaults failed: {}", e),
        }

        for socket in podman_sockets(home) {
            debug!("Trying Podman socket: {}", socket);
            match Docker::connect_with_socket(&socket, SOCKET_TIMEOUT, bollard::API_DEFAULT_VERSION) {
                Ok(docker) => match docker.ping().await {
                    Ok(_) => {
                        info!("Connected to Podman via {}", socket);
                        return Ok(Self::from_docker(docker));
                    }
                    Err(e) => debug!("Podman socket {} did not answer: {}", socket, e),
                },
                Err(e) => debug!("Podman socket {} failed: {}", socket, e),
            }
        }

        Err(ContainerError::RuntimeUnavailable(
            "Failed to connect to Docker or Podman. Please ensure Docker or Podman is installed and running."
                .to_string(),
        ))
    }

    pub fn from_docker(docker: Docker) -> Self {
        Self {
            docker: Arc::new(docker),
        }
    }

    /// Ping the container runtime to verify connectivity.
    ///
    /// # Errors
    ///
    /// Returns error if ping fails.
    pub async fn ping(&self) -> Result<()> {
        self.docker.ping().await.map_err(|e| {
            ContainerError::RuntimeUnavailable(format!("Failed to ping container runtime: {}", e))
        })?;
        debug!("Container runtime ping successful");
        Ok(())
    }

    /// Get version information from the container runtime.
    ///
    /// # Errors
    ///
    /// Returns error if version query fails.
    pub async fn version(&self) -> Result<bollard::models::SystemVersion> {
        self.docker
            .version()
            .await
            .map_err(|e| ContainerError::Other(format!("Failed to get version: {}", e)))
    }

    /// Get system information from the container runtime.
    ///
    /// # Errors
    ///
    /// Returns error if system info query fails.
    pub async fn info(&self) -> Result<bollard::models::SystemInfo> {
        self.docker
            .info()
            .await
            .map_err(|e| ContainerError::Other(format!("Failed to get info: {}", e)))
    }

    /// Security features of the host the runtime runs on.
    ///
    /// # Errors
    ///
    /// Returns error if system info query fails.
    pub async fn host_capabilities(&self) -> Result<HostCapabilities> {
        let info = self.info().await?;
        let options = info.security_options.unwrap_or_default();
        let capabilities = HostCapabilities::from_info(&options, info.os_type.as_deref());
        debug!(
            "Host capabilities: seccomp={} rootless={} os={}",
            capabilities.seccomp, capabilities.rootless, capabilities.os_type
        );
        Ok(capabilities)
    }

    /// Get the underlying Docker client.
    pub fn docker(&self) -> &Docker {
        &self.docker
    }

    /// Check if the runtime is Docker or Podman.
    ///
    /// # Errors
    ///
    /// Returns error if runtime detection fails.
    pub async fn runtime_type(&self) -> Result<RuntimeType> {
        let version = self.version().await?;

        let podman = version
            .components
            .unwrap_or_default()
            .iter()
            .any(|c| c.name.to_lowercase().contains("podman"));

        if podman {
            Ok(RuntimeType::Podman)
        } else {
            Ok(RuntimeType::Docker)
        }
    }

    /// Check if an image exists locally.
    ///
    /// # Errors
    ///
    /// Returns error if image inspection fails.
    pub async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(ContainerError::ApiError(e)),
        }
    }

    /// Inspect a container by name.
    ///
    /// # Errors
    ///
    /// Returns error if inspection fails for reasons other than not found.
    pub async fn container_status(&self, name: &str) -> Result<ContainerStatus> {
        let inspect = match self
            .docker
            .inspect_container(
                name,
                None::<bollard::query_parameters::InspectContainerOptions>,
            )
            .await
        {
            Ok(inspect) => inspect,
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => return Ok(ContainerStatus::Absent),
            Err(e) => return Err(ContainerError::ApiError(e)),
        };

        let running = inspect
            .state
            .as_ref()
            .and_then(|s| s.running)
            .unwrap_or(false);
        let image = inspect.config.as_ref().and_then(|c| c.image.clone());

        let mut ports = BTreeMap::new();
        if let Some(bindings) = inspect.network_settings.and_then(|n| n.ports) {
            for (key, binding) in bindings {
                let container_port = key.split('/').next().and_then(|p| p.parse::<u16>().ok());
                let host_port = binding
                    .unwrap_or_default()
                    .into_iter()
                    .find_map(|b| b.host_port.and_then(|p| p.parse::<u16>().ok()));
                if let (Some(container_port), Some(host_port)) = (container_port, host_port) {
                    ports.insert(container_port, host_port);
                }
            }
        }

        Ok(ContainerStatus::Present {
            running,
            image,
            ports,
        })
    }
}

fn podman_sockets(home: Option<&Path>) -> Vec<String> {
    let mut sockets = Vec::new();
    if cfg!(unix) {
        if let Some(home) = home {
            sockets.push(format!("unix://{}/run/podman/podman.sock", home.display()));
        }
        sockets.push("unix:///run/podman/podman.sock".to_string());
    }
    sockets
}

/// What the runtime knows about the project container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerStatus {
    Absent,
    Present {
        running: bool,
        image: Option<String>,
        /// Container port → published host port
        ports: BTreeMap<u16, u16>,
    },
}

impl ContainerStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, ContainerStatus::Present { running: true, .. })
    }
}

/// Type of container runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeType {
    /// Docker runtime
    Docker,
    /// Podman runtime
    Podman,
}

impl RuntimeType {
    /// Name of the runtime's command line tool.
    pub fn cli_program(&self) -> &'static str {
        match self {
            RuntimeType::Docker => "docker",
            RuntimeType::Podman => "podman",
        }
    }
}

impl std::fmt::Display for RuntimeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeType::Docker => write!(f, "Docker"),
            RuntimeType::Podman => write!(f, "Podman"),
        }
    }
}
