//! Least-privilege container policy.
//!
//! [`SecurityPolicyBuilder`] turns the security settings into a
//! [`SecurityPolicy`]: every default runtime capability is dropped except a
//! small allow-list, the root filesystem is read-only, writable paths are
//! size-limited tmpfs mounts and privilege escalation is disabled. Settings
//! can re-enable individual default capabilities or relax the root filesystem,
//! but nothing here widens the policy unless a setting asks for it. There is
//! no way to express a privileged container.

use crate::config::{Configuration, ConfigurationError, Layer, keys};
use bollard::service::HostConfig;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Capabilities granted by Docker and Podman to every container by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Capability {
    AuditWrite,
    Chown,
    DacOverride,
    Fowner,
    Fsetid,
    Kill,
    Mknod,
    NetBindService,
    NetRaw,
    Setfcap,
    Setgid,
    Setpcap,
    Setuid,
    SysChroot,
}

impl Capability {
    pub const DEFAULT_SET: [Capability; 14] = [
        Capability::AuditWrite,
        Capability::Chown,
        Capability::DacOverride,
        Capability::Fowner,
        Capability::Fsetid,
        Capability::Kill,
        Capability::Mknod,
        Capability::NetBindService,
        Capability::NetRaw,
        Capability::Setfcap,
        Capability::Setgid,
        Capability::Setpcap,
        Capability::Setuid,
        Capability::SysChroot,
    ];

    /// Kept by every policy.
    pub const BASELINE: [Capability; 3] = [
        Capability::NetBindService,
        Capability::Setuid,
        Capability::Setgid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::AuditWrite => "AUDIT_WRITE",
            Capability::Chown => "CHOWN",
            Capability::DacOverride => "DAC_OVERRIDE",
            Capability::Fowner => "FOWNER",
            Capability::Fsetid => "FSETID",
            Capability::Kill => "KILL",
            Capability::Mknod => "MKNOD",
            Capability::NetBindService => "NET_BIND_SERVICE",
            Capability::NetRaw => "NET_RAW",
            Capability::Setfcap => "SETFCAP",
            Capability::Setgid => "SETGID",
            Capability::Setpcap => "SETPCAP",
            Capability::Setuid => "SETUID",
            Capability::SysChroot => "SYS_CHROOT",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = String;

    /// Accepts `CHOWN`, `chown` and `CAP_CHOWN`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let name = upper.strip_prefix("CAP_").unwrap_or(&upper);
        Capability::DEFAULT_SET
            .iter()
            .copied()
            .find(|c| c.as_str() == name)
            .ok_or_else(|| {
                format!(
                    "`{}` is not a default runtime capability and cannot be enabled",
                    name
                )
            })
    }
}

/// Container network attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkMode {
    /// Default bridge network with outbound access
    Bridged,
    /// Internal network without a route to the outside
    Isolated { network: String },
}

impl NetworkMode {
    pub fn runtime_name(&self) -> &str {
        match self {
            NetworkMode::Bridged => "bridge",
            NetworkMode::Isolated { network } => network,
        }
    }
}

/// A validated seccomp profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeccompProfile {
    pub path: PathBuf,
    /// Profile JSON as sent to the runtime API
    pub json: String,
}

/// Security-relevant features of the container host, from the runtime's `info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCapabilities {
    pub seccomp: bool,
    pub rootless: bool,
    /// tmpfs mounts accept `noexec,nosuid,nodev`
    pub hardened_tmpfs: bool,
    pub os_type: String,
}

impl Default for HostCapabilities {
    fn default() -> Self {
        Self {
            seccomp: true,
            rootless: false,
            hardened_tmpfs: true,
            os_type: "linux".to_string(),
        }
    }
}

impl HostCapabilities {
    /// Derive host features from `SecurityOptions` and `OSType` of the
    /// runtime's info response, e.g. `name=seccomp,profile=default`.
    pub fn from_info(security_options: &[String], os_type: Option<&str>) -> Self {
        let has = |name: &str| {
            security_options.iter().any(|opt| {
                opt.split(',')
                    .any(|part| part == format!("name={}", name) || part == name)
            })
        };
        let os_type = os_type.unwrap_or("linux").to_ascii_lowercase();
        Self {
            seccomp: has("seccomp"),
            rootless: has("rootless"),
            hardened_tmpfs: os_type == "linux",
            os_type,
        }
    }
}

/// Paths backed by tmpfs when the root filesystem is read-only.
pub const TMPFS_PATHS: [&str; 3] = ["/tmp", "/var/tmp", "/run"];

/// The complete security posture of one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityPolicy {
    cap_add: BTreeSet<Capability>,
    cap_drop: BTreeSet<Capability>,
    readonly_rootfs: bool,
    tmpfs: Vec<(String, String)>,
    network: NetworkMode,
    no_new_privileges: bool,
    seccomp: Option<SeccompProfile>,
}

impl SecurityPolicy {
    pub fn cap_add(&self) -> &BTreeSet<Capability> {
        &self.cap_add
    }

    pub fn cap_drop(&self) -> &BTreeSet<Capability> {
        &self.cap_drop
    }

    pub fn readonly_rootfs(&self) -> bool {
        self.readonly_rootfs
    }

    /// `(path, mount options)` pairs.
    pub fn tmpfs(&self) -> &[(String, String)] {
        &self.tmpfs
    }

    pub fn network(&self) -> &NetworkMode {
        &self.network
    }

    pub fn no_new_privileges(&self) -> bool {
        self.no_new_privileges
    }

    pub fn seccomp(&self) -> Option<&SeccompProfile> {
        self.seccomp.as_ref()
    }

    /// `--security-opt` style entries.
    pub fn security_opt(&self) -> Vec<String> {
        let mut opts = Vec::new();
        if self.no_new_privileges {
            opts.push("no-new-privileges:true".to_string());
        }
        if let Some(profile) = &self.seccomp {
            opts.push(format!("seccomp={}", profile.json));
        }
        opts
    }

    /// Write the policy into a runtime host configuration.
    pub fn apply(&self, host_config: &mut HostConfig) {
        host_config.privileged = Some(false);
        host_config.cap_add = Some(self.cap_add.iter().map(|c| c.to_string()).collect());
        host_config.cap_drop = Some(self.cap_drop.iter().map(|c| c.to_string()).collect());
        host_config.readonly_rootfs = Some(self.readonly_rootfs);
        host_config.network_mode = Some(self.network.runtime_name().to_string());
        host_config.security_opt = Some(self.security_opt());
        if !self.tmpfs.is_empty() {
            host_config.tmpfs = Some(
                self.tmpfs
                    .iter()
                    .cloned()
                    .collect::<HashMap<String, String>>(),
            );
        }
    }

    /// One-line summary for `validate`.
    pub fn summary(&self) -> String {
        format!(
            "caps +[{}] rootfs={} network={} no-new-privileges={} seccomp={}",
            self.cap_add
                .iter()
                .map(Capability::as_str)
                .collect::<Vec<_>>()
                .join(","),
            if self.readonly_rootfs { "ro" } else { "rw" },
            self.network.runtime_name(),
            self.no_new_privileges,
            self.seccomp
                .as_ref()
                .map(|p| p.path.display().to_string())
                .unwrap_or_else(|| "runtime default".to_string()),
        )
    }
}

/// Derives a [`SecurityPolicy`] from configuration and host features.
pub struct SecurityPolicyBuilder<'a> {
    config: &'a Configuration,
    host: &'a HostCapabilities,
    project_root: &'a Path,
}

impl<'a> SecurityPolicyBuilder<'a> {
    pub fn new(config: &'a Configuration, host: &'a HostCapabilities, project_root: &'a Path) -> Self {
        Self {
            config,
            host,
            project_root,
        }
    }

    /// Name of the isolated network for a container.
    pub fn isolated_network_name(container_name: &str) -> String {
        format!("{}-isolated", container_name)
    }

    fn invalid(&self, key: &str, reason: String) -> ConfigurationError {
        ConfigurationError::InvalidValue {
            key: key.to_string(),
            layer: self.config.origin(key).unwrap_or(Layer::Defaults),
            reason,
        }
    }

    /// # Errors
    ///
    /// Returns [`ConfigurationError`] if `EXTRA_CAPABILITIES` names a
    /// capability outside the default runtime set, or if `SECCOMP_PROFILE`
    /// does not exist or is not valid JSON.
    pub fn build(&self) -> Result<SecurityPolicy, ConfigurationError> {
        let mut cap_add: BTreeSet<Capability> = Capability::BASELINE.into_iter().collect();
        for name in self.config.list(keys::EXTRA_CAPABILITIES) {
            let capability = Capability::from_str(name)
                .map_err(|reason| self.invalid(keys::EXTRA_CAPABILITIES, reason))?;
            if cap_add.insert(capability) {
                info!("Re-enabling capability {}", capability);
            }
        }
        let cap_drop = Capability::DEFAULT_SET
            .into_iter()
            .filter(|c| !cap_add.contains(c))
            .collect();

        let readonly_rootfs = self.config.flag(keys::READONLY_ROOTFS);
        if !readonly_rootfs {
            warn!("Root filesystem is writable (READONLY_ROOTFS=false)");
        }

        let size = self.config.text(keys::TMPFS_SIZE).unwrap_or("256m");
        let options = if self.host.hardened_tmpfs {
            format!("rw,noexec,nosuid,nodev,size={}", size)
        } else {
            debug!("Host does not support hardened tmpfs options");
            format!("rw,size={}", size)
        };
        let tmpfs = TMPFS_PATHS
            .iter()
            .map(|path| (path.to_string(), options.clone()))
            .collect();

        let network = if self.config.flag(keys::NETWORK_ISOLATION) {
            let container = self.config.text(keys::CONTAINER_NAME).unwrap_or("devbox");
            NetworkMode::Isolated {
                network: Self::isolated_network_name(container),
            }
        } else {
            NetworkMode::Bridged
        };

        let seccomp = self.seccomp_profile()?;

        Ok(SecurityPolicy {
            cap_add,
            cap_drop,
            readonly_rootfs,
            tmpfs,
            network,
            no_new_privileges: true,
            seccomp,
        })
    }

    fn seccomp_profile(&self) -> Result<Option<SeccompProfile>, ConfigurationError> {
        let Some(path) = self.config.path(keys::SECCOMP_PROFILE) else {
            return Ok(None);
        };
        let path = crate::env::project_relative(self.project_root, path);

        let json = std::fs::read_to_string(&path).map_err(|e| {
            self.invalid(
                keys::SECCOMP_PROFILE,
                format!("cannot read {}: {}", path.display(), e),
            )
        })?;
        serde_json::from_str::<serde_json::Value>(&json).map_err(|e| {
            self.invalid(
                keys::SECCOMP_PROFILE,
                format!("{} is not valid JSON: {}", path.display(), e),
            )
        })?;

        if !self.host.seccomp {
            warn!(
                "Container host does not support seccomp, ignoring profile {}",
                path.display()
            );
            return Ok(None);
        }

        Ok(Some(SeccompProfile { path, json }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigLayers, ConfigResolver, RawLayer};
    use tempfile::TempDir;

    fn config_with(cli: &[(&str, &str)]) -> Configuration {
        let layers = ConfigLayers {
            cli: RawLayer::with_entries(Layer::Cli, cli.iter().copied()),
            ..ConfigLayers::default()
        };
        ConfigResolver::resolve(&layers).unwrap().configuration
    }

    fn build(config: &Configuration) -> Result<SecurityPolicy, ConfigurationError> {
        SecurityPolicyBuilder::new(config, &HostCapabilities::default(), Path::new("/project")).build()
    }

    #[test]
    fn test_default_policy_is_least_privilege() {
        let policy = build(&config_with(&[])).unwrap();

        assert_eq!(
            policy.cap_add().iter().copied().collect::<Vec<_>>(),
            vec![Capability::NetBindService, Capability::Setgid, Capability::Setuid]
        );
        assert_eq!(policy.cap_drop().len(), Capability::DEFAULT_SET.len() - 3);
        assert!(policy.readonly_rootfs());
        assert!(policy.no_new_privileges());
        assert_eq!(policy.network(), &NetworkMode::Bridged);
        assert_eq!(policy.tmpfs().len(), 3);
        assert!(policy.tmpfs()[0].1.contains("noexec,nosuid,nodev,size=256m"));
    }

    #[test]
    fn test_extra_capabilities_move_out_of_drop_list() {
        let policy = build(&config_with(&[("EXTRA_CAPABILITIES", "chown,CAP_FOWNER")])).unwrap();

        assert!(policy.cap_add().contains(&Capability::Chown));
        assert!(policy.cap_add().contains(&Capability::Fowner));
        assert!(!policy.cap_drop().contains(&Capability::Chown));
        assert!(policy.cap_add().is_disjoint(policy.cap_drop()));
    }

    #[test]
    fn test_non_default_capability_is_rejected() {
        let err = build(&config_with(&[("EXTRA_CAPABILITIES", "SYS_ADMIN")])).unwrap_err();
        match err {
            ConfigurationError::InvalidValue { key, layer, reason } => {
                assert_eq!(key, "EXTRA_CAPABILITIES");
                assert_eq!(layer, Layer::Cli);
                assert!(reason.contains("SYS_ADMIN"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_explicit_overrides() {
        let policy = build(&config_with(&[
            ("READONLY_ROOTFS", "false"),
            ("NETWORK_ISOLATION", "true"),
            ("CONTAINER_NAME", "box"),
        ]))
        .unwrap();

        assert!(!policy.readonly_rootfs());
        assert_eq!(
            policy.network(),
            &NetworkMode::Isolated {
                network: "box-isolated".to_string()
            }
        );
    }

    #[test]
    fn test_seccomp_profile_handling() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("seccomp.json"), r#"{"defaultAction":"SCMP_ACT_ERRNO"}"#).unwrap();
        let config = config_with(&[("SECCOMP_PROFILE", "seccomp.json")]);

        let policy = SecurityPolicyBuilder::new(&config, &HostCapabilities::default(), temp_dir.path())
            .build()
            .unwrap();
        assert!(policy.security_opt()[1].starts_with("seccomp={"));

        let no_seccomp = HostCapabilities {
            seccomp: false,
            ..HostCapabilities::default()
        };
        let policy = SecurityPolicyBuilder::new(&config, &no_seccomp, temp_dir.path())
            .build()
            .unwrap();
        assert!(policy.seccomp().is_none());

        let missing = config_with(&[("SECCOMP_PROFILE", "absent.json")]);
        assert!(
            SecurityPolicyBuilder::new(&missing, &HostCapabilities::default(), temp_dir.path())
                .build()
                .is_err()
        );
    }

    #[test]
    fn test_apply_never_privileged() {
        let policy = build(&config_with(&[])).unwrap();
        let mut host_config = HostConfig {
            privileged: Some(true),
            ..Default::default()
        };
        policy.apply(&mut host_config);

        assert_eq!(host_config.privileged, Some(false));
        assert_eq!(host_config.readonly_rootfs, Some(true));
        assert_eq!(host_config.network_mode.as_deref(), Some("bridge"));
        assert_eq!(
            host_config.security_opt,
            Some(vec!["no-new-privileges:true".to_string()])
        );
        assert_eq!(host_config.tmpfs.unwrap().len(), 3);
    }

    #[test]
    fn test_host_capabilities_from_info() {
        let caps = HostCapabilities::from_info(
            &[
                "name=seccomp,profile=builtin".to_string(),
                "name=rootless".to_string(),
            ],
            Some("linux"),
        );
        assert!(caps.seccomp && caps.rootless && caps.hardened_tmpfs);

        let caps = HostCapabilities::from_info(&[], Some("windows"));
        assert!(!caps.seccomp);
        assert!(!caps.hardened_tmpfs);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_no_capability_in_both_lists(
                extra in prop::collection::vec(prop::sample::select(Capability::DEFAULT_SET.to_vec()), 0..8),
                readonly in any::<bool>(),
            ) {
                let names = extra.iter().map(Capability::as_str).collect::<Vec<_>>().join(",");
                let readonly = readonly.to_string();
                let config = config_with(&[
                    ("EXTRA_CAPABILITIES", names.as_str()),
                    ("READONLY_ROOTFS", readonly.as_str()),
                ]);
                let policy = build(&config).unwrap();

                prop_assert!(policy.cap_add().is_disjoint(policy.cap_drop()));
                prop_assert_eq!(
                    policy.cap_add().len() + policy.cap_drop().len(),
                    Capability::DEFAULT_SET.len()
                );
                prop_assert_eq!(policy.readonly_rootfs(), readonly == "true");
            }
        }
    }
}
