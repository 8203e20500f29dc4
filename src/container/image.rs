//! Container image building and management.
//!
//! Images are built with the runtime CLI (`docker build` / `podman build`)
//! rather than the API, which would need the context streamed as a tar
//! archive. The tag is a content hash of the build inputs, so an unchanged
//! Dockerfile with unchanged build arguments maps to the image that already
//! exists.

use crate::config::{Configuration, keys};
use crate::container::{ContainerError, MANAGED_LABEL, PROJECT_LABEL, Result};
use crate::env::project_relative;
use crate::executor::{CommandExecutor, ExecutionCommand};
use bollard::Docker;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Hex digits of the input hash used as the image tag.
pub const TAG_LEN: usize = 12;

/// Settings forwarded as build arguments, with the lowercase form the
/// Dockerfile may also reference.
const BUILD_ARG_SETTINGS: [(&str, Option<&str>); 6] = [
    (keys::HTTP_PROXY, Some("http_proxy")),
    (keys::HTTPS_PROXY, Some("https_proxy")),
    (keys::NO_PROXY, Some("no_proxy")),
    (keys::BASE_REGISTRY, None),
    (keys::PIP_INDEX_URL, None),
    (keys::NPM_REGISTRY, None),
];

/// Named build context carrying the installed CA bundle. A Dockerfile
/// picks it up with `COPY --from=devbox-certs ca-bundle.pem <dest>`.
pub const CA_BUILD_CONTEXT: &str = "devbox-certs";

/// Build argument holding the CA bundle fingerprint.
pub const CA_FINGERPRINT_ARG: &str = "DEVBOX_CA_FINGERPRINT";

/// `<repository>:<input hash prefix>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    pub repository: String,
    pub tag: String,
}

impl ImageReference {
    /// Hash the Dockerfile content and the build arguments in key order.
    pub fn compute(repository: &str, dockerfile: &[u8], build_args: &BTreeMap<String, String>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(dockerfile);
        hasher.update([0u8]);
        for (key, value) in build_args {
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update(b"\n");
        }
        let digest = hasher.finalize();
        let tag: String = digest.iter().map(|b| format!("{:02x}", b)).collect();

        Self {
            repository: repository.to_string(),
            tag: tag[..TAG_LEN].to_string(),
        }
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

/// Inputs of one image build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    /// Value of the project label
    pub project: String,
    pub dockerfile: PathBuf,
    pub context: PathBuf,
    pub build_args: BTreeMap<String, String>,
    /// Directory of the installed CA bundle, passed as a named build context
    pub ca_bundle: Option<PathBuf>,
    pub image: ImageReference,
    pub(crate) dockerfile_content: Vec<u8>,
}

impl BuildRequest {
    /// Derive the build inputs from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::ConfigError`] if the Dockerfile cannot be read.
    pub fn from_config(config: &Configuration, project_root: &Path) -> Result<Self> {
        let dockerfile = project_relative(
            project_root,
            config
                .path(keys::DOCKERFILE)
                .unwrap_or(Path::new("container/Dockerfile")),
        );
        let context = project_relative(
            project_root,
            config.path(keys::BUILD_CONTEXT).unwrap_or(Path::new("container")),
        );
        let content = std::fs::read(&dockerfile).map_err(|e| {
            ContainerError::ConfigError(format!(
                "cannot read Dockerfile {}: {}",
                dockerfile.display(),
                e
            ))
        })?;

        let build_args = build_args(config);
        let repository = config.text(keys::IMAGE_NAME).unwrap_or("devbox");
        let image = ImageReference::compute(repository, &content, &build_args);

        Ok(Self {
            project: project_label(config),
            dockerfile,
            context,
            build_args,
            ca_bundle: None,
            image,
            dockerfile_content: content,
        })
    }

    /// Make the CA bundle in `dir` available to the build. The bundle
    /// fingerprint becomes a build input, so a changed set of trust anchors
    /// yields a new image reference.
    pub fn with_ca_bundle(mut self, dir: &Path, fingerprint: &str) -> Self {
        self.build_args
            .insert(CA_FINGERPRINT_ARG.to_string(), fingerprint.to_string());
        self.ca_bundle = Some(dir.to_path_buf());
        self.image = ImageReference::compute(
            &self.image.repository,
            &self.dockerfile_content,
            &self.build_args,
        );
        self
    }

    /// Runtime CLI arguments. Build argument values are not part of the
    /// argv; the CLI reads them from its environment.
    pub fn cli_args(&self) -> Vec<String> {
        let mut args = vec![
            "build".to_string(),
            "-t".to_string(),
            self.image.to_string(),
            "-f".to_string(),
            self.dockerfile.display().to_string(),
            "--label".to_string(),
            format!("{}={}", PROJECT_LABEL, self.project),
            "--label".to_string(),
            format!("{}=true", MANAGED_LABEL),
        ];
        for key in self.build_args.keys() {
            args.push("--build-arg".to_string());
            args.push(key.clone());
        }
        if let Some(dir) = &self.ca_bundle {
            args.push("--build-context".to_string());
            args.push(format!("{}={}", CA_BUILD_CONTEXT, dir.display()));
        }
        args.push(self.context.display().to_string());
        args
    }
}

/// Build arguments from the proxy and registry settings that are set.
pub fn build_args(config: &Configuration) -> BTreeMap<String, String> {
    let mut args = BTreeMap::new();
    for (key, lowercase) in BUILD_ARG_SETTINGS {
        if let Some(value) = config.raw(key) {
            if let Some(lower) = lowercase {
                args.insert(lower.to_string(), value.clone());
            }
            args.insert(key.to_string(), value);
        }
    }
    args
}

/// Label value identifying the project's images and container.
pub fn project_label(config: &Configuration) -> String {
    config.text(keys::CONTAINER_NAME).unwrap_or("devbox").to_string()
}

/// Image builder for the project image.
pub struct ImageBuilder {
    docker: Docker,
    executor: Arc<dyn CommandExecutor>,
    program: String,
}

impl ImageBuilder {
    /// `program` is the runtime CLI, `docker` or `podman`.
    pub fn new(docker: Docker, executor: Arc<dyn CommandExecutor>, program: impl Into<String>) -> Self {
        Self {
            docker,
            executor,
            program: program.into(),
        }
    }

    /// Build the image described by `request` with the runtime CLI.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::CommandFailed`] with the build output if the
    /// CLI exits non-zero, or [`ContainerError::ExecutionError`] if it cannot
    /// be run.
    pub async fn build(&self, request: &BuildRequest) -> Result<()> {
        info!("Building image {} using {} CLI", request.image, self.program);

        let mut command = ExecutionCommand::new(self.program.clone(), request.cli_args());
        for (key, value) in &request.build_args {
            command = command.with_env(key.clone(), value.clone());
        }
        let command_line = command.display();
        debug!("Running {}", command_line);

        let result = self
            .executor
            .execute(command)
            .await
            .map_err(|e| ContainerError::ExecutionError(format!("Failed to run {}: {}", command_line, e)))?;

        if !result.success() {
            let output = format!("{}\n{}", result.stdout.trim(), result.stderr.trim())
                .trim()
                .to_string();
            return Err(ContainerError::CommandFailed {
                command: command_line,
                exit_code: result.exit_code,
                output,
            });
        }

        info!("Successfully built image: {}", request.image);
        Ok(())
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
                status_code: 404,
                ..
            }) => Ok(false),
            Err(e) => Err(ContainerError::ApiError(e)),
        }
    }

    /// Remove an image.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::NotFound`] if the image does not exist, or
    /// the API error.
    pub async fn remove_image(&self, image: &str, force: bool) -> Result<()> {
        info!("Removing image: {}", image);

        self.docker
            .remove_image(
                image,
                Some(bollard::image::RemoveImageOptions {
                    force,
                    ..Default::default()
                }),
                None,
            )
            .await
            .map_err(|e| match e {
                bollard::errors::Error::DockerResponseServerError {
                    status_code: 404, ..
                } => ContainerError::NotFound(image.to_string()),
                e => ContainerError::ApiError(e),
            })?;

        info!("Successfully removed image: {}", image);
        Ok(())
    }

    /// Every image labelled for `project`, as `repo:tag` where one exists and
    /// image id otherwise.
    ///
    /// # Errors
    ///
    /// Returns error if listing fails.
    pub async fn project_images(&self, project: &str) -> Result<Vec<String>> {
        let mut filters = HashMap::new();
        filters.insert(
            "label".to_string(),
            vec![format!("{}={}", PROJECT_LABEL, project)],
        );

        let images = self
            .docker
            .list_images(Some(bollard::image::ListImagesOptions::<String> {
                all: false,
                filters,
                ..Default::default()
            }))
            .await?;

        let mut references = Vec::new();
        for image in images {
            let tags: Vec<String> = image
                .repo_tags
                .into_iter()
                .filter(|t| t != "<none>:<none>")
                .collect();
            if tags.is_empty() {
                references.push(image.id);
            } else {
                references.extend(tags);
            }
        }
        debug!("Found {} image(s) for project {}", references.len(), project);
        Ok(references)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigLayers, ConfigResolver, Layer, RawLayer};
    use tempfile::TempDir;

    fn config_with(pairs: &[(&str, &str)]) -> Configuration {
        let mut cli = RawLayer::new(Layer::Cli);
        for (k, v) in pairs {
            cli.set(*k, *v);
        }
        let layers = ConfigLayers {
            cli,
            ..Default::default()
        };
        ConfigResolver::resolve(&layers).unwrap().configuration
    }

    #[test]
    fn test_reference_is_stable_for_same_inputs() {
        let args: BTreeMap<String, String> =
            [("HTTP_PROXY".to_string(), "http://proxy:3128/".to_string())].into();
        let a = ImageReference::compute("devbox", b"FROM debian\n", &args);
        let b = ImageReference::compute("devbox", b"FROM debian\n", &args);
        assert_eq!(a, b);
        assert_eq!(a.tag.len(), TAG_LEN);
        assert!(a.to_string().starts_with("devbox:"));
    }

    #[test]
    fn test_reference_changes_with_inputs() {
        let none = BTreeMap::new();
        let base = ImageReference::compute("devbox", b"FROM debian\n", &none);
        let edited = ImageReference::compute("devbox", b"FROM ubuntu\n", &none);
        let with_arg = ImageReference::compute(
            "devbox",
            b"FROM debian\n",
            &[("BASE_REGISTRY".to_string(), "mirror.corp".to_string())].into(),
        );
        assert_ne!(base, edited);
        assert_ne!(base, with_arg);
    }

    #[test]
    fn test_build_args_include_lowercase_proxy() {
        let config = config_with(&[
            ("HTTP_PROXY", "http://proxy.corp:3128"),
            ("NO_PROXY", "localhost,.corp"),
            ("BASE_REGISTRY", "mirror.corp"),
        ]);
        let args = build_args(&config);
        assert_eq!(args["HTTP_PROXY"], "http://proxy.corp:3128/");
        assert_eq!(args["http_proxy"], "http://proxy.corp:3128/");
        assert_eq!(args["no_proxy"], "localhost,.corp");
        assert_eq!(args["BASE_REGISTRY"], "mirror.corp");
        assert!(!args.contains_key("HTTPS_PROXY"));
    }

    #[test]
    fn test_request_from_config_and_argv() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("container")).unwrap();
        std::fs::write(dir.path().join("container/Dockerfile"), "FROM debian\n").unwrap();

        let config = config_with(&[("HTTP_PROXY", "http://user:pw@proxy.corp:3128")]);
        let request = BuildRequest::from_config(&config, dir.path()).unwrap();
        assert_eq!(request.project, "devbox");
        assert_eq!(request.context, dir.path().join("container"));

        let args = request.cli_args();
        assert_eq!(args[0], "build");
        assert!(args.contains(&request.image.to_string()));
        assert!(args.contains(&"devbox.project=devbox".to_string()));
        assert!(args.contains(&"HTTP_PROXY".to_string()));
        assert!(args.iter().all(|a| !a.contains("pw@")));
        assert_eq!(args.last().unwrap(), &dir.path().join("container").display().to_string());
    }

    #[test]
    fn test_ca_bundle_reaches_build_and_tag() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("container")).unwrap();
        std::fs::write(dir.path().join("container/Dockerfile"), "FROM debian\n").unwrap();
        let config = config_with(&[]);
        let certs = dir.path().join(".devbox/certs");

        let plain = BuildRequest::from_config(&config, dir.path()).unwrap();
        assert!(plain.cli_args().iter().all(|a| a != "--build-context"));

        let with_certs = plain.clone().with_ca_bundle(&certs, "0123456789abcdef");
        let args = with_certs.cli_args();
        let at = args.iter().position(|a| a == "--build-context").unwrap();
        assert_eq!(args[at + 1], format!("devbox-certs={}", certs.display()));
        assert!(args.contains(&CA_FINGERPRINT_ARG.to_string()));
        assert_eq!(with_certs.build_args[CA_FINGERPRINT_ARG], "0123456789abcdef");
        assert_ne!(with_certs.image, plain.image);

        let same = plain.clone().with_ca_bundle(&certs, "0123456789abcdef");
        assert_eq!(same.image, with_certs.image);
        let other = plain.with_ca_bundle(&certs, "fedcba9876543210");
        assert_ne!(other.image, with_certs.image);
    }

    #[test]
    fn test_missing_dockerfile() {
        let dir = TempDir::new().unwrap();
        let config = config_with(&[]);
        let err = BuildRequest::from_config(&config, dir.path()).unwrap_err();
        assert!(matches!(err, ContainerError::ConfigError(_)));
    }
}
