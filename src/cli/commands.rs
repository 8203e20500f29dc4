//! Command handlers.
//!
//! Each handler resolves configuration once, runs the resolvers it needs and
//! drives at most one lifecycle operation. Non-fatal findings are pushed onto
//! the caller's notice list; fatal ones are returned as [`DevboxError`].

use crate::certs::CertificateInstaller;
use crate::cli::args::{Args, Commands};
use crate::config::{Configuration, ConfigResolver, EnvSnapshot, RawLayer, keys, write_template};
use crate::container::{
    BuildRequest, ContainerLifecycleManager, ContainerRuntime, DockerRuntime, LifecycleContext,
    RuntimeEnvironment,
};
use crate::credentials::{CredentialProvisioner, CredentialValidator};
use crate::env::{self, HostLayout};
use crate::error::{DevboxError, Notice, exit};
use crate::executor::{CommandExecutor, HostExecutor};
use crate::host::{self, HostAdapter};
use crate::ports::{self, PortConflictResolver, PortProbe, TcpProbe};
use crate::security::{HostCapabilities, SecurityPolicyBuilder};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Inputs shared by every command.
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub project_root: PathBuf,
    pub env: EnvSnapshot,
    pub cli: RawLayer,
}

impl CommandContext {
    /// # Errors
    ///
    /// Returns [`DevboxError::Io`] if no project directory was given and the
    /// current directory cannot be determined.
    pub fn from_args(args: &Args, env: EnvSnapshot) -> Result<Self, DevboxError> {
        let project_root = match &args.project_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().map_err(|source| DevboxError::Io {
                path: PathBuf::from("."),
                source,
            })?,
        };
        Ok(Self {
            project_root,
            env,
            cli: args.to_cli_layer(),
        })
    }

    fn home(&self) -> Option<PathBuf> {
        self.env.home_dir()
    }

    fn load_configuration(&self, notices: &mut Vec<Notice>) -> Result<Configuration, DevboxError> {
        let resolution =
            ConfigResolver::for_project(&self.project_root).load(&self.env, self.cli.clone())?;
        for warning in &resolution.warnings {
            warn!("{}", warning);
        }
        notices.extend(resolution.warnings.into_iter().map(Notice::Config));
        Ok(resolution.configuration)
    }
}

/// Run the selected command and return its exit code.
///
/// # Errors
///
/// Returns the first fatal error; its [`DevboxError::exit_code`] is the
/// process exit status.
pub async fn execute(args: &Args, context: &CommandContext, notices: &mut Vec<Notice>) -> Result<i32, DevboxError> {
    match &args.command {
        Commands::Config { force } => write_config(context, *force),
        Commands::Validate { json } => validate(context, *json, notices).await,
        Commands::Build { rebuild } => build(context, *rebuild, notices).await,
        Commands::Start { rebuild } => start(context, *rebuild, notices).await,
        Commands::Shell { rebuild, command } => shell(context, *rebuild, command, notices).await,
        Commands::Stop => stop(context, notices).await,
        Commands::Clean { clean_images } => clean(context, *clean_images, notices).await,
    }
}

fn write_config(context: &CommandContext, force: bool) -> Result<i32, DevboxError> {
    let path = env::config_file_path(&context.project_root);
    write_template(&path, force)?;
    println!("Wrote {}", path.display());
    Ok(exit::SUCCESS)
}

/// Trust bundle written to the host certs directory.
struct InstalledBundle {
    path: PathBuf,
    fingerprint: String,
}

/// Everything a runtime-facing command needs.
struct Session {
    config: Configuration,
    layout: HostLayout,
    host: Box<dyn HostAdapter>,
    runtime: DockerRuntime,
}

impl Session {
    async fn open(context: &CommandContext, notices: &mut Vec<Notice>) -> Result<Self, DevboxError> {
        let config = context.load_configuration(notices)?;
        let layout = HostLayout::for_project(&context.project_root);
        layout.ensure().map_err(|source| DevboxError::Io {
            path: layout.root.clone(),
            source,
        })?;

        let executor: Arc<dyn CommandExecutor> = Arc::new(HostExecutor::new());
        let home = context.home();
        let host = host::detect(home.clone(), executor.clone());
        let runtime = DockerRuntime::connect(home.as_deref(), executor).await?;
        info!("Using {} runtime", runtime.name());

        Ok(Self {
            config,
            layout,
            host,
            runtime,
        })
    }

    fn manager<'a>(&'a self, context: &'a CommandContext, probe: &'a dyn PortProbe) -> ContainerLifecycleManager<'a> {
        ContainerLifecycleManager::new(
            &self.runtime,
            LifecycleContext {
                config: &self.config,
                project_root: &context.project_root,
                host: self.host.as_ref(),
                probe,
            },
        )
    }

    /// Collect and install trust anchors; `None` when there are none.
    async fn install_certificates(&self, context: &CommandContext, notices: &mut Vec<Notice>) -> Result<Option<InstalledBundle>, DevboxError> {
        let cert_dir = self
            .config
            .path(keys::CERT_DIR)
            .map(|p| env::project_relative(&context.project_root, p));
        let mut bundle = CertificateInstaller::new(self.host.as_ref())
            .collect(self.config.flag(keys::INSTALL_HOST_CERTS), cert_dir.as_deref())
            .await;

        notices.extend(
            std::mem::take(&mut bundle.skipped)
                .into_iter()
                .map(Notice::CertificateSkipped),
        );
        if let Some(reason) = bundle.host_store_error.take() {
            notices.push(Notice::HostTrustStore(reason));
        }

        if bundle.is_empty() {
            debug!("No certificates to install");
            return Ok(None);
        }
        let path = bundle.install(&self.layout.certs)?;
        Ok(Some(InstalledBundle {
            path,
            fingerprint: bundle.fingerprint(),
        }))
    }

    async fn runtime_environment(
        &self,
        context: &CommandContext,
        certificates: Option<&InstalledBundle>,
        notices: &mut Vec<Notice>,
    ) -> Result<RuntimeEnvironment, DevboxError> {
        let home = context.home();
        let (credentials, warnings) = CredentialProvisioner::new(&self.config, home.as_deref())
            .provision()
            .into_parts();
        notices.extend(warnings.into_iter().map(Notice::Provisioning));
        info!("Cloud credentials: {}", credentials.strategy());

        let capabilities = match self.runtime.host_capabilities().await {
            Ok(capabilities) => capabilities,
            Err(e) => {
                warn!("Could not query runtime features, assuming defaults: {}", e);
                HostCapabilities::default()
            }
        };
        let policy = SecurityPolicyBuilder::new(&self.config, &capabilities, &context.project_root).build()?;
        info!("Security policy: {}", policy.summary());

        Ok(RuntimeEnvironment {
            credentials,
            policy,
            ca_bundle: certificates.map(|c| c.path.clone()),
        })
    }

    /// The build inputs; with a bundle, the certs directory joins the build
    /// as a named context.
    fn build_request(&self, context: &CommandContext, certificates: Option<&InstalledBundle>) -> Result<BuildRequest, DevboxError> {
        let request = BuildRequest::from_config(&self.config, &context.project_root)?;
        Ok(match certificates {
            Some(bundle) => request.with_ca_bundle(&self.layout.certs, &bundle.fingerprint),
            None => request,
        })
    }
}

async fn build(context: &CommandContext, rebuild: bool, notices: &mut Vec<Notice>) -> Result<i32, DevboxError> {
    let session = Session::open(context, notices).await?;
    let certificates = session.install_certificates(context, notices).await?;
    let request = session.build_request(context, certificates.as_ref())?;

    let probe = TcpProbe;
    let outcome = session.manager(context, &probe).build(&request, rebuild).await?;
    if outcome.built {
        println!("Built {}", outcome.image);
    } else {
        println!("{} is up to date", outcome.image);
    }
    Ok(exit::SUCCESS)
}

async fn start(context: &CommandContext, rebuild: bool, notices: &mut Vec<Notice>) -> Result<i32, DevboxError> {
    let session = Session::open(context, notices).await?;
    let certificates = session.install_certificates(context, notices).await?;
    let request = session.build_request(context, certificates.as_ref())?;
    let environment = session
        .runtime_environment(context, certificates.as_ref(), notices)
        .await?;

    let probe = TcpProbe;
    let outcome = session
        .manager(context, &probe)
        .start(&request, &environment, rebuild)
        .await?;
    notices.extend(outcome.notices);

    if outcome.already_running {
        println!("{} is already running", outcome.container);
    } else {
        println!("{} is running from {}", outcome.container, outcome.image);
    }
    for url in &outcome.urls {
        println!("  {}", url);
    }
    Ok(exit::SUCCESS)
}

/// The command for `shell`: explicit arguments, else `SHELL_COMMAND` split on whitespace.
pub fn shell_command(config: &Configuration, explicit: &[String]) -> Vec<String> {
    if !explicit.is_empty() {
        return explicit.to_vec();
    }
    config
        .text(keys::SHELL_COMMAND)
        .unwrap_or("/bin/sh")
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

async fn shell(context: &CommandContext, rebuild: bool, command: &[String], notices: &mut Vec<Notice>) -> Result<i32, DevboxError> {
    let session = Session::open(context, notices).await?;
    let certificates = session.install_certificates(context, notices).await?;
    let request = session.build_request(context, certificates.as_ref())?;
    let environment = session
        .runtime_environment(context, certificates.as_ref(), notices)
        .await?;
    let command = shell_command(&session.config, command);

    let probe = TcpProbe;
    let outcome = session
        .manager(context, &probe)
        .shell(&request, &environment, &command, rebuild)
        .await?;
    notices.extend(outcome.notices);
    Ok(outcome.exit_code)
}

async fn stop(context: &CommandContext, notices: &mut Vec<Notice>) -> Result<i32, DevboxError> {
    let session = Session::open(context, notices).await?;
    let probe = TcpProbe;
    let mut manager = session.manager(context, &probe);
    let warnings = manager.stop().await?;
    if warnings.is_empty() {
        println!("Stopped {}", manager.container_name());
    }
    notices.extend(warnings.into_iter().map(Notice::Cleanup));
    Ok(exit::SUCCESS)
}

async fn clean(context: &CommandContext, remove_images: bool, notices: &mut Vec<Notice>) -> Result<i32, DevboxError> {
    let session = Session::open(context, notices).await?;
    let probe = TcpProbe;
    let mut manager = session.manager(context, &probe);
    let warnings = manager.clean(remove_images).await?;
    println!("Cleaned {}", manager.container_name());
    notices.extend(warnings.into_iter().map(Notice::Cleanup));
    Ok(exit::SUCCESS)
}

/// One resolved setting as shown by `validate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettingReport {
    pub key: String,
    /// Secrets and proxy passwords are masked
    pub value: String,
    pub origin: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProblemReport {
    pub message: String,
    pub remediation: String,
    #[serde(skip)]
    pub exit_code: i32,
}

impl From<&DevboxError> for ProblemReport {
    fn from(error: &DevboxError) -> Self {
        Self {
            message: error.to_string(),
            remediation: error.remediation(),
            exit_code: error.exit_code(),
        }
    }
}

/// Result of `devbox validate`.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub project: PathBuf,
    pub config_file: Option<PathBuf>,
    pub settings: Vec<SettingReport>,
    pub credentials: String,
    pub cloud_enabled: bool,
    /// Identity confirmed by the cloud CLI
    pub caller: Option<String>,
    pub ports: BTreeMap<String, u16>,
    pub security: Option<String>,
    /// Tag from the Dockerfile and build arguments; an installed CA bundle
    /// adds its fingerprint at build time
    pub image: Option<String>,
    pub warnings: Vec<String>,
    pub errors: Vec<ProblemReport>,
}

impl ValidationReport {
    /// Exit code of the first hard failure.
    pub fn exit_code(&self) -> i32 {
        self.errors
            .first()
            .map(|e| e.exit_code)
            .unwrap_or(exit::SUCCESS)
    }

    fn print(&self) {
        println!("Project:      {}", self.project.display());
        match &self.config_file {
            Some(path) => println!("Config file:  {}", path.display()),
            None => println!("Config file:  none (defaults and environment)"),
        }
        println!();
        for setting in &self.settings {
            println!("  {:<28} {:<40} [{}]", setting.key, setting.value, setting.origin);
        }
        println!();
        println!(
            "Credentials:  {}{}",
            self.credentials,
            if self.cloud_enabled { "" } else { " (cloud features disabled)" }
        );
        if let Some(caller) = &self.caller {
            println!("Identity:     {}", caller);
        }
        if !self.ports.is_empty() {
            let ports: Vec<String> = self
                .ports
                .iter()
                .map(|(service, port)| format!("{}={}", service, port))
                .collect();
            println!("Ports:        {}", ports.join(" "));
        }
        if let Some(security) = &self.security {
            println!("Security:     {}", security);
        }
        if let Some(image) = &self.image {
            println!("Image:        {}", image);
        }
        for warning in &self.warnings {
            println!("warning: {}", warning);
        }
        for error in &self.errors {
            println!("error: {}", error.message);
            println!("  hint: {}", error.remediation);
        }
    }
}

/// Build the `validate` report without contacting the container runtime.
pub async fn validation_report(
    context: &CommandContext,
    configuration: &Configuration,
    config_file: Option<PathBuf>,
    probe: &dyn PortProbe,
    executor: &dyn CommandExecutor,
) -> ValidationReport {
    let settings = configuration
        .iter()
        .map(|(key, entry)| SettingReport {
            key: key.to_string(),
            value: entry.value.display(),
            origin: entry.origin.to_string(),
        })
        .collect();

    let mut warnings = Vec::new();
    let mut errors = Vec::new();

    let home = context.home();
    let (credentials, provisioning) = CredentialProvisioner::new(configuration, home.as_deref())
        .provision()
        .into_parts();
    warnings.extend(provisioning.iter().map(|w| format!("{} ({})", w, w.remediation())));

    let region = configuration.text(keys::AWS_REGION).unwrap_or("us-east-1");
    let caller = match CredentialValidator::new(executor).verify(&credentials, region).await {
        Ok(caller) => caller,
        Err(w) => {
            warnings.push(format!("{} ({})", w, w.remediation()));
            None
        }
    };

    let ports = match PortConflictResolver::new(probe).resolve(&ports::desired_ports(configuration)) {
        Ok(resolution) => {
            warnings.extend(resolution.notices.iter().map(ToString::to_string));
            resolution.ports
        }
        Err(e) => {
            errors.push(ProblemReport::from(&DevboxError::from(e)));
            BTreeMap::new()
        }
    };

    let security = match SecurityPolicyBuilder::new(configuration, &HostCapabilities::default(), &context.project_root).build() {
        Ok(policy) => Some(policy.summary()),
        Err(e) => {
            errors.push(ProblemReport::from(&DevboxError::from(e)));
            None
        }
    };

    let image = match BuildRequest::from_config(configuration, &context.project_root) {
        Ok(request) => Some(request.image.to_string()),
        Err(e) => {
            warnings.push(format!("`devbox build` will fail: {}", e));
            None
        }
    };

    ValidationReport {
        project: context.project_root.clone(),
        config_file,
        settings,
        credentials: credentials.strategy().to_string(),
        cloud_enabled: !credentials.is_none(),
        caller,
        ports,
        security,
        image,
        warnings,
        errors,
    }
}

async fn validate(context: &CommandContext, json: bool, notices: &mut Vec<Notice>) -> Result<i32, DevboxError> {
    let resolution =
        ConfigResolver::for_project(&context.project_root).load(&context.env, context.cli.clone())?;
    let executor = HostExecutor::new();
    let report = validation_report(
        context,
        &resolution.configuration,
        resolution.file.clone(),
        &TcpProbe,
        &executor,
    )
    .await;
    notices.extend(resolution.warnings.into_iter().map(Notice::Config));

    if json {
        match serde_json::to_string_pretty(&report) {
            Ok(text) => println!("{}", text),
            Err(e) => warn!("Could not render the report as JSON: {}", e),
        }
    } else {
        report.print();
    }
    Ok(report.exit_code())
}
