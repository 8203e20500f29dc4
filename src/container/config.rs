//! Container specification and builder.
//!
//! [`ContainerSpec`] is the single argument of the runtime create call. It is
//! assembled fresh for every `start` and `shell` through
//! [`ContainerSpecBuilder`], which always carries a [`SecurityPolicy`]; the
//! builder has no way to request a privileged container.

use crate::container::{ContainerError, Result};
use crate::security::SecurityPolicy;
use bollard::service::{HostConfig, Mount, MountTypeEnum, PortBinding};
use secrecy::{ExposeSecret, SecretString};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

/// One container environment variable.
#[derive(Debug, Clone)]
pub enum EnvBinding {
    Plain { name: String, value: String },
    /// Never logged; exposed only when the runtime request is assembled
    Secret { name: String, value: SecretString },
}

impl EnvBinding {
    pub fn plain(name: impl Into<String>, value: impl Into<String>) -> Self {
        EnvBinding::Plain {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn secret(name: impl Into<String>, value: SecretString) -> Self {
        EnvBinding::Secret {
            name: name.into(),
            value,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            EnvBinding::Plain { name, .. } | EnvBinding::Secret { name, .. } => name,
        }
    }

    pub fn is_secret(&self) -> bool {
        matches!(self, EnvBinding::Secret { .. })
    }

    /// `NAME=value` entry of the runtime API's environment list.
    fn to_runtime_entry(&self) -> String {
        match self {
            EnvBinding::Plain { name, value } => format!("{}={}", name, value),
            EnvBinding::Secret { name, value } => format!("{}={}", name, value.expose_secret()),
        }
    }
}

/// A host path to bind into the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    pub source: PathBuf,
    pub target: String,
    pub read_only: bool,
}

impl MountSpec {
    pub fn read_write(source: PathBuf, target: impl Into<String>) -> Self {
        Self {
            source,
            target: target.into(),
            read_only: false,
        }
    }

    pub fn read_only(source: PathBuf, target: impl Into<String>) -> Self {
        Self {
            source,
            target: target.into(),
            read_only: true,
        }
    }
}

/// A service published on a host port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedPort {
    pub service: String,
    pub container_port: u16,
    pub host_port: u16,
}

/// Container specification builder.
pub struct ContainerSpecBuilder {
    name: Option<String>,
    image: Option<String>,
    cmd: Option<Vec<String>>,
    working_dir: Option<String>,
    env: Vec<EnvBinding>,
    labels: BTreeMap<String, String>,
    memory_limit: Option<i64>,
    mounts: Vec<Mount>,
    ports: Vec<PublishedPort>,
    interactive: bool,
    security: Option<SecurityPolicy>,
}

impl Default for ContainerSpecBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerSpecBuilder {
    pub fn new() -> Self {
        Self {
            name: None,
            image: None,
            cmd: None,
            working_dir: None,
            env: Vec::new(),
            labels: BTreeMap::new(),
            memory_limit: None,
            mounts: Vec::new(),
            ports: Vec::new(),
            interactive: false,
            security: None,
        }
    }

    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn image<S: Into<String>>(mut self, image: S) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Set the command to run in the container.
    pub fn cmd<I, S>(mut self, cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cmd = Some(cmd.into_iter().map(|s| s.into()).collect());
        self
    }

    pub fn working_dir<S: Into<String>>(mut self, dir: S) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Add a plain environment variable.
    pub fn env<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.env.push(EnvBinding::plain(key, value));
        self
    }

    /// Add prepared bindings (plain or secret).
    pub fn bindings<I: IntoIterator<Item = EnvBinding>>(mut self, bindings: I) -> Self {
        self.env.extend(bindings);
        self
    }

    pub fn label<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Set memory limit in bytes.
    pub fn memory_limit(mut self, bytes: i64) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    /// Add a bind mount. `source` is already rendered for the host platform.
    pub fn mount(mut self, source: String, target: String, read_only: bool) -> Self {
        self.mounts.push(Mount {
            target: Some(target),
            source: Some(source),
            typ: Some(MountTypeEnum::BIND),
            read_only: Some(read_only),
            ..Default::default()
        });
        self
    }

    pub fn publish(mut self, port: PublishedPort) -> Self {
        self.ports.push(port);
        self
    }

    /// Allocate a TTY and keep stdin open.
    pub fn interactive(mut self, enable: bool) -> Self {
        self.interactive = enable;
        self
    }

    pub fn security(mut self, policy: SecurityPolicy) -> Self {
        self.security = Some(policy);
        self
    }

    /// # Errors
    ///
    /// Returns [`ContainerError::ConfigError`] if the name, image or security
    /// policy is missing, or if two bindings share a name.
    pub fn build(self) -> Result<ContainerSpec> {
        let name = self
            .name
            .ok_or_else(|| ContainerError::ConfigError("Container name is required".to_string()))?;
        let image = self
            .image
            .ok_or_else(|| ContainerError::ConfigError("Image is required".to_string()))?;
        let security = self
            .security
            .ok_or_else(|| ContainerError::ConfigError("Security policy is required".to_string()))?;

        let mut seen = std::collections::BTreeSet::new();
        for binding in &self.env {
            if !seen.insert(binding.name()) {
                return Err(ContainerError::ConfigError(format!(
                    "Environment variable {} is bound twice",
                    binding.name()
                )));
            }
        }

        Ok(ContainerSpec {
            name,
            image,
            cmd: self.cmd,
            working_dir: self.working_dir,
            env: self.env,
            labels: self.labels,
            memory_limit: self.memory_limit,
            mounts: self.mounts,
            ports: self.ports,
            interactive: self.interactive,
            security,
        })
    }
}

/// Everything the runtime needs to create the container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub cmd: Option<Vec<String>>,
    pub working_dir: Option<String>,
    pub env: Vec<EnvBinding>,
    pub labels: BTreeMap<String, String>,
    pub memory_limit: Option<i64>,
    pub mounts: Vec<Mount>,
    pub ports: Vec<PublishedPort>,
    pub interactive: bool,
    pub security: SecurityPolicy,
}

impl ContainerSpec {
    pub fn builder() -> ContainerSpecBuilder {
        ContainerSpecBuilder::new()
    }

    pub fn env_value(&self, name: &str) -> Option<&EnvBinding> {
        self.env.iter().find(|b| b.name() == name)
    }

    /// Host configuration with the security policy applied.
    pub fn host_config(&self) -> HostConfig {
        let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = self
            .ports
            .iter()
            .map(|p| {
                (
                    format!("{}/tcp", p.container_port),
                    Some(vec![PortBinding {
                        host_ip: Some("0.0.0.0".to_string()),
                        host_port: Some(p.host_port.to_string()),
                    }]),
                )
            })
            .collect();

        let mut host_config = HostConfig {
            mounts: if self.mounts.is_empty() {
                None
            } else {
                Some(self.mounts.clone())
            },
            memory: self.memory_limit,
            port_bindings: if port_bindings.is_empty() {
                None
            } else {
                Some(port_bindings)
            },
            auto_remove: Some(false),
            ..Default::default()
        };
        self.security.apply(&mut host_config);
        host_config
    }

    /// The runtime create request. The result holds secret values and must
    /// not be logged.
    pub fn to_runtime_config(&self) -> bollard::container::Config<String> {
        let exposed_ports: HashMap<String, HashMap<(), ()>> = self
            .ports
            .iter()
            .map(|p| (format!("{}/tcp", p.container_port), HashMap::new()))
            .collect();

        bollard::container::Config {
            image: Some(self.image.clone()),
            cmd: self.cmd.clone(),
            working_dir: self.working_dir.clone(),
            env: Some(self.env.iter().map(EnvBinding::to_runtime_entry).collect()),
            labels: Some(self.labels.clone().into_iter().collect()),
            exposed_ports: if exposed_ports.is_empty() {
                None
            } else {
                Some(exposed_ports)
            },
            tty: Some(self.interactive),
            open_stdin: Some(self.interactive),
            attach_stdin: Some(self.interactive),
            attach_stdout: Some(self.interactive),
            attach_stderr: Some(self.interactive),
            host_config: Some(self.host_config()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use crate::security::{HostCapabilities, SecurityPolicyBuilder};
    use std::path::Path;

    fn policy() -> SecurityPolicy {
        let config = Configuration::defaults().unwrap();
        SecurityPolicyBuilder::new(&config, &HostCapabilities::default(), Path::new("/project"))
            .build()
            .unwrap()
    }

    fn base() -> ContainerSpecBuilder {
        ContainerSpec::builder()
            .name("devbox")
            .image("devbox:abc123")
            .security(policy())
    }

    #[test]
    fn test_basic_spec() {
        let spec = base()
            .cmd(vec!["sleep", "infinity"])
            .working_dir("/workspace")
            .label("devbox.managed", "true")
            .build()
            .unwrap();

        let config = spec.to_runtime_config();
        assert_eq!(config.image.as_deref(), Some("devbox:abc123"));
        assert_eq!(config.working_dir.as_deref(), Some("/workspace"));
        assert_eq!(config.labels.unwrap()["devbox.managed"], "true");
        assert_eq!(config.tty, Some(false));
    }

    #[test]
    fn test_secret_bindings_reach_runtime_but_not_debug() {
        let spec = base()
            .env("AWS_REGION", "eu-west-1")
            .bindings(vec![EnvBinding::secret(
                "AWS_SECRET_ACCESS_KEY",
                SecretString::from("s3cr3t".to_string()),
            )])
            .build()
            .unwrap();

        assert!(!format!("{:?}", spec).contains("s3cr3t"));
        let env = spec.to_runtime_config().env.unwrap();
        assert!(env.contains(&"AWS_SECRET_ACCESS_KEY=s3cr3t".to_string()));
        assert!(env.contains(&"AWS_REGION=eu-west-1".to_string()));
    }

    #[test]
    fn test_ports_and_mounts() {
        let spec = base()
            .publish(PublishedPort {
                service: "http".to_string(),
                container_port: 8080,
                host_port: 9080,
            })
            .mount("/home/dev/.aws".to_string(), "/devbox/aws".to_string(), true)
            .memory_limit(512 * 1024 * 1024)
            .build()
            .unwrap();

        let host_config = spec.host_config();
        let bindings = host_config.port_bindings.unwrap();
        let binding = bindings["8080/tcp"].as_ref().unwrap();
        assert_eq!(binding[0].host_port.as_deref(), Some("9080"));
        assert_eq!(host_config.mounts.unwrap()[0].read_only, Some(true));
        assert_eq!(host_config.memory, Some(512 * 1024 * 1024));
        assert_eq!(host_config.privileged, Some(false));
        assert!(spec.to_runtime_config().exposed_ports.unwrap().contains_key("8080/tcp"));
    }

    #[test]
    fn test_duplicate_binding_is_rejected() {
        let result = base().env("FOO", "a").env("FOO", "b").build();
        assert!(matches!(result, Err(ContainerError::ConfigError(_))));
    }

    #[test]
    fn test_missing_image_error() {
        let result = ContainerSpec::builder()
            .name("devbox")
            .security(policy())
            .build();
        assert!(matches!(result, Err(ContainerError::ConfigError(_))));
    }
}
