//! Top-level error and notice types.
//!
//! Every subsystem has its own error enum; [`DevboxError`] gathers the fatal
//! ones for the command layer and maps them to process exit codes. Non-fatal
//! findings are collected as [`Notice`]s and printed once the command is done.

use crate::certs::{CertificateInstallError, CertificateReadError};
use crate::config::{ConfigWarning, ConfigurationError};
use crate::container::{BuildError, CleanupWarning, ContainerError, LifecycleError, StartError};
use crate::credentials::ProvisioningWarning;
use crate::ports::{PortExhaustionError, ReassignmentNotice};

/// Process exit codes.
pub mod exit {
    pub const SUCCESS: i32 = 0;
    pub const FAILURE: i32 = 1;
    pub const CONFIGURATION: i32 = 2;
    pub const PORT_EXHAUSTION: i32 = 3;
    pub const BUILD: i32 = 4;
    pub const START: i32 = 5;
    pub const RUNTIME_UNAVAILABLE: i32 = 6;
}

#[derive(Debug, thiserror::Error)]
pub enum DevboxError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    PortExhaustion(#[from] PortExhaustionError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Start(#[from] StartError),

    #[error("container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("container runtime error: {0}")]
    Container(ContainerError),

    #[error(transparent)]
    CertificateInstall(#[from] CertificateInstallError),

    #[error("lifecycle error: {0}")]
    Lifecycle(String),

    #[error("failed to prepare {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DevboxError {
    pub fn exit_code(&self) -> i32 {
        match self {
            DevboxError::Configuration(_) => exit::CONFIGURATION,
            DevboxError::PortExhaustion(_) => exit::PORT_EXHAUSTION,
            DevboxError::Build(_) => exit::BUILD,
            DevboxError::Start(_) => exit::START,
            DevboxError::RuntimeUnavailable(_) => exit::RUNTIME_UNAVAILABLE,
            DevboxError::Container(_)
            | DevboxError::CertificateInstall(_)
            | DevboxError::Lifecycle(_)
            | DevboxError::Io { .. } => exit::FAILURE,
        }
    }

    /// Subsystem and next step.
    pub fn remediation(&self) -> String {
        match self {
            DevboxError::Configuration(e) => format!("[config] {}", e.remediation()),
            DevboxError::PortExhaustion(e) => format!("[ports] {}", e.remediation()),
            DevboxError::Build(e) => format!("[build] {}", e.hint),
            DevboxError::Start(e) => format!("[start] {}", e.hint),
            DevboxError::RuntimeUnavailable(_) => {
                "[runtime] start Docker or Podman (or set DOCKER_HOST) and try again".to_string()
            }
            DevboxError::Container(_) => {
                "[runtime] check `docker info` and retry; run with -v for details".to_string()
            }
            DevboxError::CertificateInstall(e) => match e {
                CertificateInstallError::Write { path, .. } => {
                    format!("[certs] make sure {} is writable", path.display())
                }
            },
            DevboxError::Lifecycle(_) => {
                "[lifecycle] run `devbox clean` to reset the environment, then retry".to_string()
            }
            DevboxError::Io { path, .. } => {
                format!("[host] check the permissions of {}", path.display())
            }
        }
    }

    /// Runtime output worth showing below the message, if any.
    pub fn output(&self) -> Option<&str> {
        match self {
            DevboxError::Build(e) => Some(e.output.as_str()),
            DevboxError::Start(e) => Some(e.output.as_str()),
            _ => None,
        }
        .filter(|o| !o.trim().is_empty())
    }
}

impl From<ContainerError> for DevboxError {
    fn from(error: ContainerError) -> Self {
        match error {
            ContainerError::RuntimeUnavailable(reason) => DevboxError::RuntimeUnavailable(reason),
            e => DevboxError::Container(e),
        }
    }
}

impl From<LifecycleError> for DevboxError {
    fn from(error: LifecycleError) -> Self {
        match error {
            LifecycleError::Build(e) => DevboxError::Build(e),
            LifecycleError::Start(e) => DevboxError::Start(e),
            LifecycleError::Ports(e) => DevboxError::PortExhaustion(e),
            LifecycleError::Runtime(e) => e.into(),
            e @ (LifecycleError::RetryRequired { .. } | LifecycleError::IllegalTransition { .. }) => {
                DevboxError::Lifecycle(e.to_string())
            }
        }
    }
}

/// A non-fatal finding reported after the command.
#[derive(Debug)]
pub enum Notice {
    Config(ConfigWarning),
    Provisioning(ProvisioningWarning),
    CertificateSkipped(CertificateReadError),
    /// The host trust store could not be read
    HostTrustStore(String),
    PortReassigned(ReassignmentNotice),
    Cleanup(CleanupWarning),
    HealthProbe(String),
    /// A container from different build inputs was found
    StaleContainer { container: String, image: String },
    /// Ports are not published from a container on the internal network
    PortsNotPublished { network: String },
}

impl Notice {
    pub fn remediation(&self) -> Option<String> {
        match self {
            Notice::Config(_) => Some(
                "remove the key or check its spelling against `devbox config`".to_string(),
            ),
            Notice::Provisioning(w) => Some(w.remediation()),
            Notice::CertificateSkipped(_) => {
                Some("remove or replace the file in CERT_DIR".to_string())
            }
            Notice::HostTrustStore(_) => Some(
                "set INSTALL_HOST_CERTS=false to silence this, or put the certificates in CERT_DIR"
                    .to_string(),
            ),
            Notice::PortReassigned(_) => None,
            Notice::Cleanup(w) => Some(w.remediation()),
            Notice::HealthProbe(_) => Some(
                "the container runs without the probe; check that /bin/sh exists in the image"
                    .to_string(),
            ),
            Notice::StaleContainer { .. } => {
                Some("run `devbox start --rebuild` to pick up the new image".to_string())
            }
            Notice::PortsNotPublished { .. } => Some(
                "use `devbox shell` to work inside the container, or set NETWORK_ISOLATION=false to reach its services from the host"
                    .to_string(),
            ),
        }
    }
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Notice::Config(w) => write!(f, "{}", w),
            Notice::Provisioning(w) => write!(f, "{}", w),
            Notice::CertificateSkipped(e) => write!(f, "skipped certificate: {}", e),
            Notice::HostTrustStore(reason) => {
                write!(f, "host trust store not installed: {}", reason)
            }
            Notice::PortReassigned(n) => write!(f, "{}", n),
            Notice::Cleanup(w) => write!(f, "{}", w),
            Notice::HealthProbe(reason) => write!(f, "health probe not started: {}", reason),
            Notice::StaleContainer { container, image } => write!(
                f,
                "{} was created from {}, which no longer matches the build inputs",
                container, image
            ),
            Notice::PortsNotPublished { network } => write!(
                f,
                "no ports published: the container is attached to the internal network {}, which the host cannot reach",
                network
            ),
        }
    }
}
