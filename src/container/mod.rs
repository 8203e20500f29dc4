//! Container runtime layer.
//!
//! Everything that talks to Docker or Podman lives here. The lifecycle
//! manager only sees the [`ContainerRuntime`] trait; [`DockerRuntime`] is the
//! production implementation and combines the bollard API client with the
//! runtime CLI for image builds and interactive attach.
//!
//! ## Architecture
//!
//! - [`client`]: bollard connection with Podman socket fallback
//! - [`config`]: [`ContainerSpec`] and its builder
//! - [`orchestrator`]: create, start, stop and remove a named container
//! - [`image`]: image references, CLI builds and project image listing
//! - [`network`]: the internal network used for isolation
//! - [`monitor`]: the detached health probe
//! - [`runtime`]: the [`ContainerRuntime`] seam
//! - [`lifecycle`]: [`ContainerLifecycleManager`] and [`LifecycleState`]
//!
//! ## Usage
//!
//! ```rust,no_run
//! use devbox::container::{ContainerRuntime, DockerRuntime};
//! use devbox::executor::HostExecutor;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = DockerRuntime::connect(None, Arc::new(HostExecutor::new())).await?;
//!     let status = runtime.container_status("devbox").await?;
//!     println!("{:?}", status);
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod image;
pub mod lifecycle;
pub mod monitor;
pub mod network;
pub mod orchestrator;
pub mod runtime;

pub use client::{ContainerClient, ContainerStatus, RuntimeType};
pub use config::{ContainerSpec, ContainerSpecBuilder, EnvBinding, MountSpec, PublishedPort};
pub use image::{BuildRequest, ImageBuilder, ImageReference};
pub use lifecycle::{
    AccessUrl, BuildError, BuildOutcome, CleanupStep, CleanupWarning, ContainerLifecycleManager,
    LifecycleContext, LifecycleError, LifecycleState, RuntimeEnvironment, ShellOutcome,
    StartError, StartOutcome, Transition,
};
pub use monitor::HealthProbe;
pub use network::NetworkManager;
pub use orchestrator::ContainerOrchestrator;
pub use runtime::{ContainerRuntime, DockerRuntime};

use regex::Regex;
use std::sync::LazyLock;

/// Label carrying the project identity on images and containers.
pub const PROJECT_LABEL: &str = "devbox.project";
/// Label marking a container as created by devbox.
pub const MANAGED_LABEL: &str = "devbox.managed";

static PORT_CONFLICT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)port is already allocated|address already in use|bind: address|ports are not available")
        .expect("port conflict pattern is valid")
});

static BOUND_PORT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:0\.0\.0\.0|\[::\]|127\.0\.0\.1|localhost):(\d{1,5})")
        .expect("bound port pattern is valid")
});

/// Container runtime errors.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    /// Docker/Podman API error
    #[error("Container API error: {0}")]
    ApiError(#[from] bollard::errors::Error),

    /// Neither Docker nor Podman answered
    #[error("Container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    /// Container, image or network not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Container configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The runtime CLI exited non-zero
    #[error("`{command}` failed with exit code {exit_code}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        output: String,
    },

    /// Command could not be run at all
    #[error("Execution error: {0}")]
    ExecutionError(String),

    /// Network error
    #[error("Network error: {0}")]
    NetworkError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// General error
    #[error("Container error: {0}")]
    Other(String),
}

impl ContainerError {
    /// Runtime output attached to the error, if any.
    pub fn output(&self) -> String {
        match self {
            ContainerError::CommandFailed { output, .. } => output.clone(),
            ContainerError::ApiError(bollard::errors::Error::DockerResponseServerError {
                message,
                ..
            }) => message.clone(),
            other => other.to_string(),
        }
    }

    /// Whether the failure is a host port that was taken after probing.
    pub fn is_port_conflict(&self) -> bool {
        PORT_CONFLICT_PATTERN.is_match(&self.output())
    }

    /// The host port named in a bind failure.
    pub fn conflicting_port(&self) -> Option<u16> {
        BOUND_PORT_PATTERN
            .captures(&self.output())
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }
}

/// Result type for container operations.
pub type Result<T> = std::result::Result<T, ContainerError>;
