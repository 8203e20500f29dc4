//! Platform adapters.
//!
//! Linux, macOS and Windows differ in where the trust store lives, how it is
//! exported and how host paths are written in bind mounts. Each family gets one
//! [`HostAdapter`] implementation, selected once at startup by [`detect`];
//! nothing else in the crate branches on the platform.

pub mod linux;
pub mod macos;
pub mod windows;

pub use linux::LinuxHost;
pub use macos::MacHost;
pub use windows::WindowsHost;

use crate::executor::CommandExecutor;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Host operating system family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Linux,
    MacOs,
    Windows,
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::Linux => write!(f, "linux"),
            Platform::MacOs => write!(f, "macos"),
            Platform::Windows => write!(f, "windows"),
        }
    }
}

/// PEM text exported from one host trust store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustStoreExport {
    /// Store the data came from, for log lines
    pub origin: String,
    pub pem: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// The platform trust store could not be enumerated
    #[error("cannot read trust store {store}: {reason}")]
    TrustStore { store: String, reason: String },
}

/// Platform-specific host operations.
#[async_trait]
pub trait HostAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    /// Home directory of the invoking user.
    fn home_dir(&self) -> Option<&Path>;

    /// Render a host path as a bind mount source for the runtime API.
    fn mount_source(&self, path: &Path) -> String;

    /// Export the trust anchors of the host trust store as PEM.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::TrustStore`] if no store could be read at all.
    async fn trust_store(&self) -> Result<Vec<TrustStoreExport>, HostError>;
}

/// Select the adapter for the platform devbox was compiled for.
pub fn detect(home: Option<PathBuf>, executor: Arc<dyn CommandExecutor>) -> Box<dyn HostAdapter> {
    let adapter: Box<dyn HostAdapter> = if cfg!(target_os = "macos") {
        Box::new(MacHost::new(home, executor))
    } else if cfg!(target_os = "windows") {
        Box::new(WindowsHost::new(home, executor))
    } else {
        Box::new(LinuxHost::new(home))
    };
    tracing::debug!("Host platform: {}", adapter.platform());
    adapter
}
