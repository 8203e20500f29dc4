//! macOS host adapter. Trust anchors are exported from the system keychains
//! with `security find-certificate`.

use super::{HostAdapter, HostError, Platform, TrustStoreExport};
use crate::executor::{CommandExecutor, ExecutionCommand};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const SYSTEM_KEYCHAINS: &[&str] = &[
    "/System/Library/Keychains/SystemRootCertificates.keychain",
    "/Library/Keychains/System.keychain",
];

pub struct MacHost {
    home: Option<PathBuf>,
    executor: Arc<dyn CommandExecutor>,
}

impl MacHost {
    pub fn new(home: Option<PathBuf>, executor: Arc<dyn CommandExecutor>) -> Self {
        Self { home, executor }
    }
}

#[async_trait]
impl HostAdapter for MacHost {
    fn platform(&self) -> Platform {
        Platform::MacOs
    }

    fn home_dir(&self) -> Option<&Path> {
        self.home.as_deref()
    }

    fn mount_source(&self, path: &Path) -> String {
        path.display().to_string()
    }

    async fn trust_store(&self) -> Result<Vec<TrustStoreExport>, HostError> {
        let mut exports = Vec::new();
        let mut last_failure = String::new();

        for keychain in SYSTEM_KEYCHAINS {
            let command = ExecutionCommand::new(
                "security",
                vec![
                    "find-certificate".to_string(),
                    "-a".to_string(),
                    "-p".to_string(),
                    keychain.to_string(),
                ],
            )
            .with_timeout(Duration::from_secs(30));

            match self.executor.execute(command).await {
                Ok(result) if result.success() => {
                    debug!("Exported keychain {} ({} bytes)", keychain, result.stdout.len());
                    exports.push(TrustStoreExport {
                        origin: keychain.to_string(),
                        pem: result.stdout.into_bytes(),
                    });
                }
                Ok(result) => {
                    last_failure = result.diagnostic_output().to_string();
                    warn!("Skipping keychain {}: {}", keychain, last_failure);
                }
                Err(e) => {
                    last_failure = e.to_string();
                    warn!("Skipping keychain {}: {}", keychain, last_failure);
                }
            }
        }

        if exports.is_empty() {
            return Err(HostError::TrustStore {
                store: "system keychains".to_string(),
                reason: last_failure,
            });
        }
        Ok(exports)
    }
}
