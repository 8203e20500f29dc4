//! Windows host adapter.

use super::{HostAdapter, HostError, Platform, TrustStoreExport};
use crate::executor::{CommandExecutor, ExecutionCommand};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const ROOT_STORE: &str = r"Cert:\LocalMachine\Root";

/// Writes every certificate of the machine root store as PEM to stdout.
const EXPORT_SCRIPT: &str = r#"Get-ChildItem -Path 'Cert:\LocalMachine\Root' | ForEach-Object {
  '-----BEGIN CERTIFICATE-----'
  [System.Convert]::ToBase64String($_.RawData, 'InsertLineBreaks')
  '-----END CERTIFICATE-----'
}"#;

pub struct WindowsHost {
    home: Option<PathBuf>,
    executor: Arc<dyn CommandExecutor>,
}

impl WindowsHost {
    pub fn new(home: Option<PathBuf>, executor: Arc<dyn CommandExecutor>) -> Self {
        Self { home, executor }
    }
}

#[async_trait]
impl HostAdapter for WindowsHost {
    fn platform(&self) -> Platform {
        Platform::Windows
    }

    fn home_dir(&self) -> Option<&Path> {
        self.home.as_deref()
    }

    /// Docker Desktop accepts drive paths with forward slashes.
    fn mount_source(&self, path: &Path) -> String {
        path.display().to_string().replace('\\', "/")
    }

    async fn trust_store(&self) -> Result<Vec<TrustStoreExport>, HostError> {
        let command = ExecutionCommand::new(
            "powershell",
            vec![
                "-NoProfile".to_string(),
                "-NonInteractive".to_string(),
                "-Command".to_string(),
                EXPORT_SCRIPT.to_string(),
            ],
        )
        .with_timeout(Duration::from_secs(60));

        let result = self
            .executor
            .execute(command)
            .await
            .map_err(|e| HostError::TrustStore {
                store: ROOT_STORE.to_string(),
                reason: e.to_string(),
            })?;

        if !result.success() {
            return Err(HostError::TrustStore {
                store: ROOT_STORE.to_string(),
                reason: result.diagnostic_output().to_string(),
            });
        }

        debug!("Exported {} ({} bytes)", ROOT_STORE, result.stdout.len());
        Ok(vec![TrustStoreExport {
            origin: ROOT_STORE.to_string(),
            pem: result.stdout.into_bytes(),
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::testing::ScriptedExecutor;

    #[test]
    fn test_mount_source_uses_forward_slashes() {
        let host = WindowsHost::new(None, Arc::new(ScriptedExecutor::default()));
        assert_eq!(
            host.mount_source(Path::new(r"C:\Users\dev\project")),
            "C:/Users/dev/project"
        );
    }

    #[tokio::test]
    async fn test_powershell_failure_is_reported() {
        let executor = Arc::new(ScriptedExecutor::new(vec![ScriptedExecutor::failed(
            1,
            "Access is denied.",
        )]));
        let host = WindowsHost::new(None, executor.clone());

        assert!(matches!(
            host.trust_store().await,
            Err(HostError::TrustStore { .. })
        ));
        assert_eq!(executor.calls.lock().unwrap()[0][0], "powershell");
    }
}
