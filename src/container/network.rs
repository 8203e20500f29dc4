//! Isolated container network.
//!
//! With `NETWORK_ISOLATION=true` the container joins an internal bridge
//! network named `<container>-isolated`, which has no route to the outside.

use crate::container::{ContainerError, Result};
use bollard::Docker;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

/// Network manager for the project's isolated network.
pub struct NetworkManager {
    docker: Docker,
}

impl NetworkManager {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// Create the internal network unless it already exists.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::NetworkError`] if creation fails.
    pub async fn ensure_internal(&self, name: &str, labels: &BTreeMap<String, String>) -> Result<()> {
        if self.network_exists(name).await? {
            debug!("Network {} already exists", name);
            return Ok(());
        }

        let labels: HashMap<&str, &str> = labels
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        let response = self
            .docker
            .create_network(bollard::network::CreateNetworkOptions {
                name,
                driver: "bridge",
                internal: true,
                labels,
                ..Default::default()
            })
            .await
            .map_err(|e| ContainerError::NetworkError(format!("Failed to create {}: {}", name, e)))?;

        info!("Created internal network: {} ({})", name, response.id);
        Ok(())
    }

    /// Remove a network by name.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::NotFound`] if there is no such network.
    pub async fn remove_network(&self, name: &str) -> Result<()> {
        debug!("Removing network: {}", name);
        self.docker.remove_network(name).await.map_err(|e| match e {
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            } => ContainerError::NotFound(name.to_string()),
            e => ContainerError::ApiError(e),
        })?;
        info!("Removed network: {}", name);
        Ok(())
    }

    /// Check if a network exists.
    ///
    /// # Errors
    ///
    /// Returns error if network inspection fails.
    pub async fn network_exists(&self, name: &str) -> Result<bool> {
        match self
            .docker
            .inspect_network(name, None::<bollard::network::InspectNetworkOptions<String>>)
            .await
        {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(ContainerError::ApiError(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerClient;

    #[tokio::test]
    #[ignore] // Requires Docker/Podman
    async fn test_internal_network_lifecycle() {
        let client = ContainerClient::connect(None).await.unwrap();
        let manager = NetworkManager::new(client.docker().clone());
        let name = "devbox-test-isolated";
        let labels: BTreeMap<String, String> =
            [("devbox.project".to_string(), "devbox-test".to_string())].into();

        manager.ensure_internal(name, &labels).await.unwrap();
        manager.ensure_internal(name, &labels).await.unwrap();
        assert!(manager.network_exists(name).await.unwrap());

        manager.remove_network(name).await.unwrap();
        assert!(matches!(
            manager.remove_network(name).await,
            Err(ContainerError::NotFound(_))
        ));
    }
}
