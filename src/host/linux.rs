//! Linux host adapter.

use super::{HostAdapter, HostError, Platform, TrustStoreExport};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Distribution CA bundle locations (Debian/Ubuntu, Fedora/RHEL, openSUSE, Alpine).
pub const DISTRIBUTION_BUNDLES: &[&str] = &[
    "/etc/ssl/certs/ca-certificates.crt",
    "/etc/pki/tls/certs/ca-bundle.crt",
    "/etc/pki/ca-trust/extracted/pem/tls-ca-bundle.pem",
    "/etc/ssl/ca-bundle.pem",
    "/etc/ssl/cert.pem",
];

#[derive(Debug, Clone)]
pub struct LinuxHost {
    home: Option<PathBuf>,
    bundles: Vec<PathBuf>,
}

impl LinuxHost {
    pub fn new(home: Option<PathBuf>) -> Self {
        Self {
            home,
            bundles: DISTRIBUTION_BUNDLES.iter().map(PathBuf::from).collect(),
        }
    }

    /// Read trust anchors from the given bundle files instead of the distribution defaults.
    pub fn with_bundles(mut self, bundles: Vec<PathBuf>) -> Self {
        self.bundles = bundles;
        self
    }
}

#[async_trait]
impl HostAdapter for LinuxHost {
    fn platform(&self) -> Platform {
        Platform::Linux
    }

    fn home_dir(&self) -> Option<&Path> {
        self.home.as_deref()
    }

    fn mount_source(&self, path: &Path) -> String {
        path.display().to_string()
    }

    async fn trust_store(&self) -> Result<Vec<TrustStoreExport>, HostError> {
        let mut exports = Vec::new();

        for bundle in &self.bundles {
            match tokio::fs::read(bundle).await {
                Ok(pem) => {
                    debug!("Read host CA bundle {:?} ({} bytes)", bundle, pem.len());
                    exports.push(TrustStoreExport {
                        origin: bundle.display().to_string(),
                        pem,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Skipping host CA bundle {:?}: {}", bundle, e),
            }
        }

        if exports.is_empty() {
            return Err(HostError::TrustStore {
                store: "distribution CA bundle".to_string(),
                reason: format!("none of {} known bundle files is readable", self.bundles.len()),
            });
        }

        Ok(exports)
    }
}
