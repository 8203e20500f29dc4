//! Environment constants and path utilities for devbox.
//!
//! This module centralizes the project-relative paths and the in-container
//! mount targets used throughout the application.

use std::path::{Path, PathBuf};

/// Project state directory name (hidden directory like .git, .vscode)
pub const DEVBOX_DIR_NAME: &str = ".devbox";

/// Configuration file name inside the state directory
pub const CONFIG_FILE_NAME: &str = "devbox.conf";

/// Host-side directory tree created on first run.
pub mod host {
    /// Default workspace directory name (used when WORKSPACE_DIR is unset)
    pub const WORKSPACE_DIR_NAME: &str = "workspace";

    /// Package and tool cache directory name
    pub const CACHE_DIR_NAME: &str = "cache";

    /// Trust-anchor bundle directory name
    pub const CERTS_DIR_NAME: &str = "certs";

    /// Log directory name (health probe output lands here)
    pub const LOGS_DIR_NAME: &str = "logs";

    /// Combined PEM bundle written into the certs directory
    pub const CA_BUNDLE_FILE_NAME: &str = "ca-bundle.pem";
}

/// Mount targets and well-known paths inside the container.
pub mod container {
    /// Project workspace mount
    pub const WORKSPACE: &str = "/workspace";

    /// Cache mount
    pub const CACHE: &str = "/cache";

    /// Log mount
    pub const LOGS: &str = "/var/log/devbox";

    /// Trust-anchor mount
    pub const CERTS: &str = "/usr/local/share/ca-certificates/devbox";

    /// Cloud credential mount (profile store or credential file)
    pub const AWS: &str = "/devbox/aws";

    /// Health probe log file
    pub const HEALTH_LOG: &str = "/var/log/devbox/health.log";
}

/// Build the state directory path from a project root
pub fn devbox_dir_path(project_root: &Path) -> PathBuf {
    project_root.join(DEVBOX_DIR_NAME)
}

/// Build the configuration file path from a project root
pub fn config_file_path(project_root: &Path) -> PathBuf {
    devbox_dir_path(project_root).join(CONFIG_FILE_NAME)
}

/// Build the default workspace directory path
pub fn workspace_dir_path(project_root: &Path) -> PathBuf {
    devbox_dir_path(project_root).join(host::WORKSPACE_DIR_NAME)
}

/// Build the cache directory path
pub fn cache_dir_path(project_root: &Path) -> PathBuf {
    devbox_dir_path(project_root).join(host::CACHE_DIR_NAME)
}

/// Build the certificate directory path
pub fn certs_dir_path(project_root: &Path) -> PathBuf {
    devbox_dir_path(project_root).join(host::CERTS_DIR_NAME)
}

/// Build the log directory path
pub fn logs_dir_path(project_root: &Path) -> PathBuf {
    devbox_dir_path(project_root).join(host::LOGS_DIR_NAME)
}

/// Resolve a configured path against the project root unless it is absolute
pub fn project_relative(project_root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        project_root.join(path)
    }
}

/// Build the in-container path of the combined CA bundle
pub fn container_ca_bundle_path() -> String {
    format!("{}/{}", container::CERTS, host::CA_BUNDLE_FILE_NAME)
}

/// Host-side directory tree for one project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostLayout {
    pub root: PathBuf,
    pub workspace: PathBuf,
    pub cache: PathBuf,
    pub certs: PathBuf,
    pub logs: PathBuf,
}

impl HostLayout {
    /// Describe the tree for a project root without touching the filesystem.
    pub fn for_project(project_root: &Path) -> Self {
        Self {
            root: devbox_dir_path(project_root),
            workspace: workspace_dir_path(project_root),
            cache: cache_dir_path(project_root),
            certs: certs_dir_path(project_root),
            logs: logs_dir_path(project_root),
        }
    }

    /// Create any missing directories. Existing directories are reused.
    pub fn ensure(&self) -> std::io::Result<()> {
        for dir in [
            &self.root,
            &self.workspace,
            &self.cache,
            &self.certs,
            &self.logs,
        ] {
            if !dir.exists() {
                std::fs::create_dir_all(dir)?;
                tracing::debug!("Created directory: {:?}", dir);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_project_relative() {
        let project = Path::new("/test/project");
        assert_eq!(
            project_relative(project, Path::new("container/Dockerfile")),
            Path::new("/test/project/container/Dockerfile")
        );
        assert_eq!(
            project_relative(project, Path::new("/opt/Dockerfile")),
            Path::new("/opt/Dockerfile")
        );
    }

    #[test]
    fn test_path_construction() {
        let project = Path::new("/test/project");

        assert_eq!(devbox_dir_path(project), Path::new("/test/project/.devbox"));
        assert_eq!(
            config_file_path(project),
            Path::new("/test/project/.devbox/devbox.conf")
        );
        assert_eq!(
            certs_dir_path(project),
            Path::new("/test/project/.devbox/certs")
        );
        assert_eq!(
            logs_dir_path(project),
            Path::new("/test/project/.devbox/logs")
        );
        assert_eq!(
            container_ca_bundle_path(),
            "/usr/local/share/ca-certificates/devbox/ca-bundle.pem"
        );
    }

    #[test]
    fn test_layout_ensure_is_reentrant() {
        let temp_dir = TempDir::new().unwrap();
        let layout = HostLayout::for_project(temp_dir.path());

        layout.ensure().unwrap();
        std::fs::write(layout.cache.join("keep.txt"), "cached").unwrap();
        layout.ensure().unwrap();

        assert!(layout.workspace.is_dir());
        assert!(layout.certs.is_dir());
        assert!(layout.logs.is_dir());
        assert!(layout.cache.join("keep.txt").exists());
    }
}
