//! Cloud credential provisioning.
//!
//! Strategies are tried in order and the first match wins:
//!
//! 1. explicit `AWS_ACCESS_KEY_ID` + `AWS_SECRET_ACCESS_KEY` (+ `AWS_SESSION_TOKEN`)
//! 2. `AWS_PROFILE` found in the profile store (`~/.aws/config`, `~/.aws/credentials`)
//! 3. a credential file at `AWS_SHARED_CREDENTIALS_FILE` or `~/.aws/credentials`
//!
//! When nothing matches, provisioning reports a [`ProvisioningWarning`] and
//! cloud features stay disabled. Secret values stay in [`SecretString`] and
//! only leave it as structured container environment bindings.

use crate::config::{Configuration, keys};
use crate::container::{EnvBinding, MountSpec};
use crate::env::container::AWS as AWS_MOUNT;
use crate::executor::{CommandExecutor, ExecutionCommand};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Resolved cloud credentials. Never logged or persisted.
#[derive(Debug)]
pub enum CredentialSet {
    ExplicitKeys {
        access_key_id: String,
        secret_access_key: SecretString,
        session_token: Option<SecretString>,
    },
    Profile {
        name: String,
        store_dir: PathBuf,
    },
    CredentialFile {
        path: PathBuf,
    },
    None,
}

impl CredentialSet {
    pub fn strategy(&self) -> &'static str {
        match self {
            CredentialSet::ExplicitKeys { .. } => "explicit access keys",
            CredentialSet::Profile { .. } => "named profile",
            CredentialSet::CredentialFile { .. } => "credential file",
            CredentialSet::None => "none",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, CredentialSet::None)
    }

    /// Container environment for these credentials.
    pub fn env_bindings(&self) -> Vec<EnvBinding> {
        match self {
            CredentialSet::ExplicitKeys {
                access_key_id,
                secret_access_key,
                session_token,
            } => {
                let mut bindings = vec![
                    EnvBinding::plain(keys::AWS_ACCESS_KEY_ID, access_key_id.clone()),
                    EnvBinding::secret(keys::AWS_SECRET_ACCESS_KEY, secret_access_key.clone()),
                ];
                if let Some(token) = session_token {
                    bindings.push(EnvBinding::secret(keys::AWS_SESSION_TOKEN, token.clone()));
                }
                bindings
            }
            CredentialSet::Profile { name, .. } => vec![
                EnvBinding::plain(keys::AWS_PROFILE, name.clone()),
                EnvBinding::plain("AWS_CONFIG_FILE", format!("{}/config", AWS_MOUNT)),
                EnvBinding::plain(
                    keys::AWS_SHARED_CREDENTIALS_FILE,
                    format!("{}/credentials", AWS_MOUNT),
                ),
            ],
            CredentialSet::CredentialFile { .. } => vec![EnvBinding::plain(
                keys::AWS_SHARED_CREDENTIALS_FILE,
                format!("{}/credentials", AWS_MOUNT),
            )],
            CredentialSet::None => Vec::new(),
        }
    }

    /// Read-only mounts for these credentials.
    pub fn mounts(&self) -> Vec<MountSpec> {
        match self {
            CredentialSet::Profile { store_dir, .. } => {
                vec![MountSpec::read_only(store_dir.clone(), AWS_MOUNT)]
            }
            CredentialSet::CredentialFile { path } => vec![MountSpec::read_only(
                path.clone(),
                format!("{}/credentials", AWS_MOUNT),
            )],
            _ => Vec::new(),
        }
    }
}

/// Non-fatal provisioning findings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProvisioningWarning {
    #[error("{present} is set but {missing} is not; ignoring explicit keys")]
    IncompleteKeys {
        present: &'static str,
        missing: &'static str,
    },

    #[error("profile `{profile}` not found in {}", .store.display())]
    ProfileNotFound { profile: String, store: PathBuf },

    #[error("no cloud credentials found; cloud features are disabled")]
    NoCredentials,

    #[error("credential check failed: {reason}")]
    VerificationFailed { reason: String },
}

impl ProvisioningWarning {
    pub fn remediation(&self) -> String {
        match self {
            ProvisioningWarning::IncompleteKeys { missing, .. } => {
                format!("set {} as well, or unset both keys", missing)
            }
            ProvisioningWarning::ProfileNotFound { profile, .. } => {
                format!("run `aws configure --profile {}` or fix AWS_PROFILE", profile)
            }
            ProvisioningWarning::NoCredentials => {
                "set AWS_PROFILE or AWS_ACCESS_KEY_ID/AWS_SECRET_ACCESS_KEY to enable cloud features"
                    .to_string()
            }
            ProvisioningWarning::VerificationFailed { .. } => {
                "refresh the credentials (e.g. `aws sso login`) and run `devbox validate` again"
                    .to_string()
            }
        }
    }
}

#[derive(Debug)]
pub enum Provisioning {
    Resolved {
        credentials: CredentialSet,
        warnings: Vec<ProvisioningWarning>,
    },
    Unavailable(Vec<ProvisioningWarning>),
}

impl Provisioning {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Provisioning::Resolved { .. })
    }

    pub fn warnings(&self) -> &[ProvisioningWarning] {
        match self {
            Provisioning::Resolved { warnings, .. } => warnings,
            Provisioning::Unavailable(warnings) => warnings,
        }
    }

    pub fn into_parts(self) -> (CredentialSet, Vec<ProvisioningWarning>) {
        match self {
            Provisioning::Resolved {
                credentials,
                warnings,
            } => (credentials, warnings),
            Provisioning::Unavailable(warnings) => (CredentialSet::None, warnings),
        }
    }
}

/// Source of named profiles.
pub trait ProfileStore: Send + Sync {
    fn has_profile(&self, name: &str) -> bool;

    /// Directory mounted into the container when a profile is used.
    fn directory(&self) -> &Path;
}

/// The AWS CLI profile directory (`~/.aws`).
#[derive(Debug, Clone)]
pub struct AwsProfileStore {
    dir: PathBuf,
}

impl AwsProfileStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn for_home(home: &Path) -> Self {
        Self::new(home.join(".aws"))
    }

    /// Profile names declared in INI text. In `config` files profiles are
    /// written `[profile name]` except for `[default]`.
    pub fn section_names(content: &str, config_style: bool) -> Vec<String> {
        content
            .lines()
            .map(str::trim)
            .filter_map(|line| line.strip_prefix('[')?.strip_suffix(']'))
            .map(str::trim)
            .filter_map(|section| {
                if config_style {
                    match section.strip_prefix("profile ") {
                        Some(name) => Some(name.trim().to_string()),
                        None if section == "default" => Some(section.to_string()),
                        None => None,
                    }
                } else {
                    Some(section.to_string())
                }
            })
            .collect()
    }
}

impl ProfileStore for AwsProfileStore {
    fn has_profile(&self, name: &str) -> bool {
        [("config", true), ("credentials", false)]
            .iter()
            .any(|(file, config_style)| {
                std::fs::read_to_string(self.dir.join(file))
                    .map(|content| {
                        Self::section_names(&content, *config_style)
                            .iter()
                            .any(|n| n == name)
                    })
                    .unwrap_or(false)
            })
    }

    fn directory(&self) -> &Path {
        &self.dir
    }
}

pub struct CredentialProvisioner<'a> {
    config: &'a Configuration,
    home: Option<&'a Path>,
    store: Option<Box<dyn ProfileStore + 'a>>,
}

impl<'a> CredentialProvisioner<'a> {
    /// Provisioner using the profile store under `home`.
    pub fn new(config: &'a Configuration, home: Option<&'a Path>) -> Self {
        let store = home.map(|h| Box::new(AwsProfileStore::for_home(h)) as Box<dyn ProfileStore>);
        Self {
            config,
            home,
            store,
        }
    }

    pub fn with_profile_store(mut self, store: Box<dyn ProfileStore + 'a>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn provision(&self) -> Provisioning {
        let mut warnings = Vec::new();

        if let Some(credentials) = self.explicit_keys(&mut warnings) {
            info!("Using {} for cloud access", credentials.strategy());
            return Provisioning::Resolved {
                credentials,
                warnings,
            };
        }

        if let Some(credentials) = self.profile(&mut warnings) {
            info!("Using {} for cloud access", credentials.strategy());
            return Provisioning::Resolved {
                credentials,
                warnings,
            };
        }

        if let Some(credentials) = self.credential_file() {
            info!("Using {} for cloud access", credentials.strategy());
            return Provisioning::Resolved {
                credentials,
                warnings,
            };
        }

        warn!("{}", ProvisioningWarning::NoCredentials);
        warnings.push(ProvisioningWarning::NoCredentials);
        Provisioning::Unavailable(warnings)
    }

    fn explicit_keys(&self, warnings: &mut Vec<ProvisioningWarning>) -> Option<CredentialSet> {
        let key_id = self.config.text(keys::AWS_ACCESS_KEY_ID);
        let secret = self.config.secret(keys::AWS_SECRET_ACCESS_KEY);

        match (key_id, secret) {
            (Some(access_key_id), Some(secret_access_key)) => Some(CredentialSet::ExplicitKeys {
                access_key_id: access_key_id.to_string(),
                secret_access_key: secret_access_key.clone(),
                session_token: self.config.secret(keys::AWS_SESSION_TOKEN).cloned(),
            }),
            (Some(_), None) => {
                let warning = ProvisioningWarning::IncompleteKeys {
                    present: keys::AWS_ACCESS_KEY_ID,
                    missing: keys::AWS_SECRET_ACCESS_KEY,
                };
                warn!("{}", warning);
                warnings.push(warning);
                None
            }
            (None, Some(_)) => {
                let warning = ProvisioningWarning::IncompleteKeys {
                    present: keys::AWS_SECRET_ACCESS_KEY,
                    missing: keys::AWS_ACCESS_KEY_ID,
                };
                warn!("{}", warning);
                warnings.push(warning);
                None
            }
            (None, None) => None,
        }
    }

    fn profile(&self, warnings: &mut Vec<ProvisioningWarning>) -> Option<CredentialSet> {
        let name = self.config.text(keys::AWS_PROFILE)?;
        let store = self.store.as_ref()?;

        if store.has_profile(name) {
            return Some(CredentialSet::Profile {
                name: name.to_string(),
                store_dir: store.directory().to_path_buf(),
            });
        }

        let warning = ProvisioningWarning::ProfileNotFound {
            profile: name.to_string(),
            store: store.directory().to_path_buf(),
        };
        warn!("{}", warning);
        warnings.push(warning);
        None
    }

    fn credential_file(&self) -> Option<CredentialSet> {
        let path = match self.config.path(keys::AWS_SHARED_CREDENTIALS_FILE) {
            Some(path) => expand_home(path, self.home),
            None => self.home?.join(".aws").join("credentials"),
        };

        if path.is_file() {
            Some(CredentialSet::CredentialFile { path })
        } else {
            debug!("No credential file at {:?}", path);
            None
        }
    }
}

fn expand_home(path: &Path, home: Option<&Path>) -> PathBuf {
    match (path.strip_prefix("~"), home) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

#[derive(Debug, Deserialize)]
struct CallerIdentity {
    #[serde(rename = "Arn")]
    arn: String,
}

/// Confirms credentials with `aws sts get-caller-identity`.
pub struct CredentialValidator<'a> {
    executor: &'a dyn CommandExecutor,
}

impl<'a> CredentialValidator<'a> {
    pub const CLI: &'static str = "aws";

    pub fn new(executor: &'a dyn CommandExecutor) -> Self {
        Self { executor }
    }

    /// Returns the caller ARN, `Ok(None)` when there is nothing to check or
    /// the CLI is not installed.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisioningWarning::VerificationFailed`] if the check runs and fails.
    pub async fn verify(&self, credentials: &CredentialSet, region: &str) -> Result<Option<String>, ProvisioningWarning> {
        if credentials.is_none() {
            return Ok(None);
        }
        if !self.executor.is_available(Self::CLI) {
            debug!("`{}` not on PATH, skipping credential check", Self::CLI);
            return Ok(None);
        }

        let mut command = ExecutionCommand::new(
            Self::CLI,
            vec![
                "sts".to_string(),
                "get-caller-identity".to_string(),
                "--output".to_string(),
                "json".to_string(),
            ],
        )
        .with_env(keys::AWS_REGION, region)
        .with_timeout(Duration::from_secs(30));

        match credentials {
            CredentialSet::ExplicitKeys {
                access_key_id,
                secret_access_key,
                session_token,
            } => {
                command = command
                    .with_env(keys::AWS_ACCESS_KEY_ID, access_key_id.clone())
                    .with_secret_env(keys::AWS_SECRET_ACCESS_KEY, secret_access_key.clone());
                if let Some(token) = session_token {
                    command = command.with_secret_env(keys::AWS_SESSION_TOKEN, token.clone());
                }
            }
            CredentialSet::Profile { name, .. } => {
                command = command.with_env(keys::AWS_PROFILE, name.clone());
            }
            CredentialSet::CredentialFile { path } => {
                command = command.with_env(
                    keys::AWS_SHARED_CREDENTIALS_FILE,
                    path.display().to_string(),
                );
            }
            CredentialSet::None => {}
        }

        let result = self
            .executor
            .execute(command)
            .await
            .map_err(|e| ProvisioningWarning::VerificationFailed {
                reason: e.to_string(),
            })?;

        if !result.success() {
            return Err(ProvisioningWarning::VerificationFailed {
                reason: result.diagnostic_output().to_string(),
            });
        }

        let identity: CallerIdentity = serde_json::from_str(&result.stdout).map_err(|e| {
            ProvisioningWarning::VerificationFailed {
                reason: format!("unexpected CLI output: {}", e),
            }
        })?;
        info!("Credentials verified for {}", identity.arn);
        Ok(Some(identity.arn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigLayers, ConfigResolver, Layer, RawLayer};
    use crate::host::testing::ScriptedExecutor;
    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    struct MockStore {
        profiles: Vec<&'static str>,
        dir: PathBuf,
    }

    impl ProfileStore for MockStore {
        fn has_profile(&self, name: &str) -> bool {
            self.profiles.contains(&name)
        }

        fn directory(&self) -> &Path {
            &self.dir
        }
    }

    fn mock_store(profiles: Vec<&'static str>) -> Box<MockStore> {
        Box::new(MockStore {
            profiles,
            dir: PathBuf::from("/home/dev/.aws"),
        })
    }

    fn config_with(env: &[(&str, &str)]) -> Configuration {
        let layers = ConfigLayers {
            environment: RawLayer::with_entries(Layer::Environment, env.iter().copied()),
            ..ConfigLayers::default()
        };
        ConfigResolver::resolve(&layers).unwrap().configuration
    }

    #[test]
    fn test_explicit_keys_win_over_profile() {
        let config = config_with(&[
            ("AWS_ACCESS_KEY_ID", "AKIAEXAMPLE"),
            ("AWS_SECRET_ACCESS_KEY", "wJalrXUtnFEMI"),
            ("AWS_SESSION_TOKEN", "token"),
            ("AWS_PROFILE", "dev"),
        ]);
        let provisioning = CredentialProvisioner::new(&config, None)
            .with_profile_store(mock_store(vec!["dev"]))
            .provision();

        let (credentials, warnings) = provisioning.into_parts();
        assert!(warnings.is_empty());
        match &credentials {
            CredentialSet::ExplicitKeys {
                access_key_id,
                secret_access_key,
                session_token,
            } => {
                assert_eq!(access_key_id, "AKIAEXAMPLE");
                assert_eq!(secret_access_key.expose_secret(), "wJalrXUtnFEMI");
                assert!(session_token.is_some());
            }
            other => panic!("unexpected credentials: {other:?}"),
        }
        assert!(!format!("{:?}", credentials).contains("wJalrXUtnFEMI"));

        let bindings = credentials.env_bindings();
        assert_eq!(bindings.len(), 3);
        assert!(bindings[1].is_secret());
        assert!(credentials.mounts().is_empty());
    }

    #[test]
    fn test_half_key_pair_falls_through_to_profile() {
        let config = config_with(&[("AWS_ACCESS_KEY_ID", "AKIA"), ("AWS_PROFILE", "dev")]);
        let provisioning = CredentialProvisioner::new(&config, None)
            .with_profile_store(mock_store(vec!["dev"]))
            .provision();

        assert_eq!(
            provisioning.warnings(),
            &[ProvisioningWarning::IncompleteKeys {
                present: "AWS_ACCESS_KEY_ID",
                missing: "AWS_SECRET_ACCESS_KEY",
            }]
        );
        let (credentials, _) = provisioning.into_parts();
        assert!(matches!(credentials, CredentialSet::Profile { ref name, .. } if name == "dev"));
        assert_eq!(credentials.mounts()[0].target, "/devbox/aws");
        assert!(credentials.mounts()[0].read_only);
    }

    #[test]
    fn test_missing_profile_falls_through_to_credential_file() {
        let temp_dir = TempDir::new().unwrap();
        let aws_dir = temp_dir.path().join(".aws");
        std::fs::create_dir_all(&aws_dir).unwrap();
        std::fs::write(aws_dir.join("credentials"), "[default]\naws_access_key_id=x\n").unwrap();

        let config = config_with(&[("AWS_PROFILE", "prod")]);
        let provisioning = CredentialProvisioner::new(&config, Some(temp_dir.path())).provision();

        assert!(matches!(
            provisioning.warnings()[0],
            ProvisioningWarning::ProfileNotFound { .. }
        ));
        let (credentials, _) = provisioning.into_parts();
        assert!(matches!(credentials, CredentialSet::CredentialFile { .. }));
        assert_eq!(credentials.mounts()[0].target, "/devbox/aws/credentials");
    }

    #[test]
    fn test_nothing_configured_is_unavailable() {
        let temp_dir = TempDir::new().unwrap();
        let config = config_with(&[]);
        let provisioning = CredentialProvisioner::new(&config, Some(temp_dir.path())).provision();

        assert!(!provisioning.is_resolved());
        assert_eq!(provisioning.warnings(), &[ProvisioningWarning::NoCredentials]);
    }

    #[test]
    fn test_profile_store_parses_both_files() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(
            temp_dir.path().join("config"),
            "[default]\nregion=us-east-1\n[profile dev]\nregion=eu-west-1\n[sso-session corp]\n",
        )
        .unwrap();
        std::fs::write(temp_dir.path().join("credentials"), "[ci]\naws_access_key_id=x\n").unwrap();
        let store = AwsProfileStore::new(temp_dir.path().to_path_buf());

        assert!(store.has_profile("default"));
        assert!(store.has_profile("dev"));
        assert!(store.has_profile("ci"));
        assert!(!store.has_profile("corp"));
        assert!(!store.has_profile("sso-session corp"));
    }

    #[tokio::test]
    async fn test_validator_passes_secrets_as_environment() {
        let executor = ScriptedExecutor::new(vec![ScriptedExecutor::ok(
            r#"{"UserId":"AIDA","Account":"123456789012","Arn":"arn:aws:iam::123456789012:user/dev"}"#,
        )]);
        let credentials = CredentialSet::ExplicitKeys {
            access_key_id: "AKIA".to_string(),
            secret_access_key: SecretString::from("s3cr3t".to_string()),
            session_token: None,
        };

        let arn = CredentialValidator::new(&executor)
            .verify(&credentials, "us-east-1")
            .await
            .unwrap();

        assert_eq!(arn.as_deref(), Some("arn:aws:iam::123456789012:user/dev"));
        let calls = executor.calls.lock().unwrap();
        assert_eq!(calls[0], vec!["aws", "sts", "get-caller-identity", "--output", "json"]);
        assert!(!calls[0].iter().any(|arg| arg.contains("s3cr3t")));
    }

    #[tokio::test]
    async fn test_validator_failure_is_warning() {
        let executor = ScriptedExecutor::new(vec![ScriptedExecutor::failed(
            255,
            "ExpiredToken: The security token included in the request is expired",
        )]);
        let credentials = CredentialSet::Profile {
            name: "dev".to_string(),
            store_dir: PathBuf::from("/home/dev/.aws"),
        };

        let err = CredentialValidator::new(&executor)
            .verify(&credentials, "us-east-1")
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisioningWarning::VerificationFailed { .. }));
    }

    #[tokio::test]
    async fn test_validator_skips_without_cli() {
        let executor = ScriptedExecutor::default();
        let credentials = CredentialSet::CredentialFile {
            path: PathBuf::from("/home/dev/.aws/credentials"),
        };
        assert_eq!(
            CredentialValidator::new(&executor)
                .verify(&credentials, "us-east-1")
                .await,
            Ok(None)
        );
    }
}
