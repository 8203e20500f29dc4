//! Container lifecycle state machine.
//!
//! The state of the project environment is observed from the runtime at the
//! beginning of every command and then moved along a fixed set of edges:
//!
//! ```text
//! Unbuilt --build--> Built --start--> Running --stop--> Stopped
//!                    Built --rebuild--> Built
//!                    Stopped --remove container--> Built
//!                    Stopped --remove image--> Unbuilt
//!                    Built --remove image--> Unbuilt
//! ```
//!
//! After a failed edge only a retry of that edge is accepted.
//! [`ContainerLifecycleManager`] composes the [`ContainerSpec`] from
//! configuration, credentials, certificates, ports and the security policy
//! and drives the runtime through [`ContainerRuntime`].

use crate::config::{Configuration, keys};
use crate::container::image::project_label;
use crate::container::{
    BuildRequest, ContainerError, ContainerRuntime, ContainerSpec, ContainerStatus, EnvBinding,
    HealthProbe, ImageReference, MANAGED_LABEL, PROJECT_LABEL, PublishedPort,
};
use crate::credentials::CredentialSet;
use crate::env::{self, HostLayout};
use crate::error::Notice;
use crate::host::HostAdapter;
use crate::ports::{self, PortConflictResolver, PortExhaustionError, PortMap, PortProbe};
use crate::security::{NetworkMode, SecurityPolicy, SecurityPolicyBuilder};
use regex::Regex;
use secrecy::SecretString;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, info, warn};

/// Lines of container output attached to a start failure.
const START_LOG_TAIL: usize = 50;

/// Variables pointing TLS clients in the container at the installed bundle.
const CA_BUNDLE_VARS: [&str; 5] = [
    "SSL_CERT_FILE",
    "REQUESTS_CA_BUNDLE",
    "NODE_EXTRA_CA_CERTS",
    "CURL_CA_BUNDLE",
    "AWS_CA_BUNDLE",
];

const PROXY_VARS: [(&str, &str); 3] = [
    (keys::HTTP_PROXY, "http_proxy"),
    (keys::HTTPS_PROXY, "https_proxy"),
    (keys::NO_PROXY, "no_proxy"),
];

static BUILD_HINTS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (
            r"(?i)x509|certificate verify failed|unknown authority|self[- ]signed certificate",
            "TLS verification failed during the build; put your organisation's CA certificates in CERT_DIR and copy them in the Dockerfile with `COPY --from=devbox-certs ca-bundle.pem /usr/local/share/ca-certificates/devbox.crt`",
        ),
        (
            r"(?i)could not resolve|temporary failure in name resolution|proxyconnect|connection (refused|timed out)|network is unreachable",
            "the build could not reach the network; check HTTP_PROXY, HTTPS_PROXY and NO_PROXY",
        ),
        (
            r"(?i)pull access denied|unauthorized|manifest unknown|not found: manifest",
            "the base image could not be pulled; check BASE_REGISTRY and your registry login",
        ),
        (
            r"(?i)no space left on device",
            "the runtime is out of disk space; prune unused images and build cache",
        ),
    ]
    .into_iter()
    .map(|(pattern, hint)| (Regex::new(pattern).expect("build hint pattern is valid"), hint))
    .collect()
});

/// Remediation hint for a failed image build.
pub fn build_hint(output: &str) -> &'static str {
    BUILD_HINTS
        .iter()
        .find(|(pattern, _)| pattern.is_match(output))
        .map(|(_, hint)| *hint)
        .unwrap_or("inspect the build output above and fix the Dockerfile, then run `devbox build --rebuild`")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Unbuilt,
    Built,
    Running,
    Stopped,
}

impl LifecycleState {
    /// Classify what the runtime reports. The container is consulted first,
    /// so a running container built from older inputs still reads as Running.
    pub fn observe(status: &ContainerStatus, image_present: bool) -> Self {
        match status {
            ContainerStatus::Present { running: true, .. } => LifecycleState::Running,
            ContainerStatus::Present { running: false, .. } => LifecycleState::Stopped,
            ContainerStatus::Absent if image_present => LifecycleState::Built,
            ContainerStatus::Absent => LifecycleState::Unbuilt,
        }
    }

    /// Target of `transition`, or `None` if there is no such edge.
    pub fn target(self, transition: Transition) -> Option<LifecycleState> {
        use LifecycleState::*;
        use Transition::*;
        match (self, transition) {
            (Unbuilt, Build) => Some(Built),
            (Built, Rebuild) => Some(Built),
            (Built, Start) => Some(Running),
            (Running, Stop) => Some(Stopped),
            (Stopped, RemoveContainer) => Some(Built),
            (Stopped, RemoveImage) | (Built, RemoveImage) => Some(Unbuilt),
            _ => None,
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Unbuilt => write!(f, "unbuilt"),
            LifecycleState::Built => write!(f, "built"),
            LifecycleState::Running => write!(f, "running"),
            LifecycleState::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Build,
    Rebuild,
    Start,
    Stop,
    RemoveContainer,
    RemoveImage,
}

impl std::fmt::Display for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transition::Build => write!(f, "build"),
            Transition::Rebuild => write!(f, "rebuild"),
            Transition::Start => write!(f, "start"),
            Transition::Stop => write!(f, "stop"),
            Transition::RemoveContainer => write!(f, "remove container"),
            Transition::RemoveImage => write!(f, "remove image"),
        }
    }
}

/// Current state plus the edge that last failed, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateMachine {
    state: LifecycleState,
    failed: Option<Transition>,
}

impl StateMachine {
    pub fn new(state: LifecycleState) -> Self {
        Self {
            state,
            failed: None,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Check that `transition` may be attempted now.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::RetryRequired`] after a different edge
    /// failed, or [`LifecycleError::IllegalTransition`] if there is no edge.
    pub fn begin(&self, transition: Transition) -> Result<LifecycleState, LifecycleError> {
        if let Some(failed) = self.failed {
            if failed != transition {
                return Err(LifecycleError::RetryRequired {
                    failed,
                    attempted: transition,
                });
            }
        }
        self.state
            .target(transition)
            .ok_or(LifecycleError::IllegalTransition {
                from: self.state,
                transition,
            })
    }

    /// # Errors
    ///
    /// Same as [`begin`](Self::begin).
    pub fn complete(&mut self, transition: Transition) -> Result<LifecycleState, LifecycleError> {
        let target = self.begin(transition)?;
        debug!("{} --{}--> {}", self.state, transition, target);
        self.state = target;
        self.failed = None;
        Ok(target)
    }

    pub fn fail(&mut self, transition: Transition) {
        debug!("{} --{}--> failed", self.state, transition);
        self.failed = Some(transition);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("image build failed for {image}")]
pub struct BuildError {
    pub image: String,
    /// Runtime CLI output
    pub output: String,
    pub hint: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("container {container} failed to start: {reason}")]
pub struct StartError {
    pub container: String,
    pub reason: String,
    pub output: String,
    pub hint: String,
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Start(#[from] StartError),

    #[error(transparent)]
    Ports(#[from] PortExhaustionError),

    #[error("cannot {attempted} after a failed {failed}; retry the {failed} first")]
    RetryRequired {
        failed: Transition,
        attempted: Transition,
    },

    #[error("cannot {transition} while the environment is {from}")]
    IllegalTransition {
        from: LifecycleState,
        transition: Transition,
    },

    #[error(transparent)]
    Runtime(#[from] ContainerError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupStep {
    StopContainer,
    RemoveContainer,
    RemoveNetwork,
    ListImages,
    RemoveImage,
}

impl std::fmt::Display for CleanupStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CleanupStep::StopContainer => write!(f, "stop container"),
            CleanupStep::RemoveContainer => write!(f, "remove container"),
            CleanupStep::RemoveNetwork => write!(f, "remove network"),
            CleanupStep::ListImages => write!(f, "list images"),
            CleanupStep::RemoveImage => write!(f, "remove image"),
        }
    }
}

/// A cleanup step that did not complete. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("could not {step} {target}: {reason}")]
pub struct CleanupWarning {
    pub step: CleanupStep,
    pub target: String,
    pub reason: String,
}

impl CleanupWarning {
    fn new(step: CleanupStep, target: &str, reason: impl Into<String>) -> Self {
        Self {
            step,
            target: target.to_string(),
            reason: reason.into(),
        }
    }

    pub fn remediation(&self) -> String {
        match self.step {
            CleanupStep::StopContainer | CleanupStep::RemoveContainer => format!(
                "nothing to do if {} is gone; otherwise remove it with `docker rm -f {}`",
                self.target, self.target
            ),
            CleanupStep::RemoveNetwork => format!(
                "remove the network with `docker network rm {}` once no container uses it",
                self.target
            ),
            CleanupStep::ListImages | CleanupStep::RemoveImage => format!(
                "list leftovers with `docker images --filter label={}` and remove them manually",
                PROJECT_LABEL
            ),
        }
    }
}

/// Inputs the lifecycle manager reads but does not own.
pub struct LifecycleContext<'a> {
    pub config: &'a Configuration,
    pub project_root: &'a Path,
    pub host: &'a dyn HostAdapter,
    pub probe: &'a dyn PortProbe,
}

/// Per-container inputs prepared by the resolvers.
#[derive(Debug)]
pub struct RuntimeEnvironment {
    pub credentials: CredentialSet,
    pub policy: SecurityPolicy,
    /// Host path of the installed CA bundle, if any certificates were found
    pub ca_bundle: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutcome {
    pub image: String,
    /// False when an image for the same inputs already existed
    pub built: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessUrl {
    pub service: String,
    pub host_port: u16,
    pub url: String,
}

impl AccessUrl {
    fn new(service: &str, host_port: u16) -> Self {
        Self {
            service: service.to_string(),
            host_port,
            url: format!("http://localhost:{}", host_port),
        }
    }
}

impl std::fmt::Display for AccessUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:<10} {}", self.service, self.url)
    }
}

#[derive(Debug)]
pub struct StartOutcome {
    pub container: String,
    pub image: String,
    pub urls: Vec<AccessUrl>,
    pub already_running: bool,
    pub notices: Vec<Notice>,
}

#[derive(Debug)]
pub struct ShellOutcome {
    pub exit_code: i32,
    pub notices: Vec<Notice>,
}

/// Drives one project container through its lifecycle.
pub struct ContainerLifecycleManager<'a> {
    runtime: &'a dyn ContainerRuntime,
    context: LifecycleContext<'a>,
    container: String,
    machine: StateMachine,
}

impl<'a> ContainerLifecycleManager<'a> {
    pub fn new(runtime: &'a dyn ContainerRuntime, context: LifecycleContext<'a>) -> Self {
        let container = context
            .config
            .text(keys::CONTAINER_NAME)
            .unwrap_or("devbox")
            .to_string();
        Self {
            runtime,
            context,
            container,
            machine: StateMachine::new(LifecycleState::Unbuilt),
        }
    }

    pub fn container_name(&self) -> &str {
        &self.container
    }

    pub fn state(&self) -> LifecycleState {
        self.machine.state()
    }

    /// Read the current state from the runtime. Without an image reference
    /// an absent container reads as Unbuilt.
    ///
    /// # Errors
    ///
    /// Returns the runtime error if the runtime cannot be queried.
    pub async fn observe(
        &mut self,
        image: Option<&ImageReference>,
    ) -> Result<(ContainerStatus, bool), LifecycleError> {
        let status = self.runtime.container_status(&self.container).await?;
        let image_present = match image {
            Some(image) => self.runtime.image_exists(&image.to_string()).await?,
            None => false,
        };
        let state = LifecycleState::observe(&status, image_present);
        debug!("Observed {} as {}", self.container, state);
        self.machine = StateMachine::new(state);
        Ok((status, image_present))
    }

    /// Build the project image unless one for the same inputs exists.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Build`] with the runtime output on failure.
    pub async fn build(&mut self, request: &BuildRequest, rebuild: bool) -> Result<BuildOutcome, LifecycleError> {
        let (_, image_present) = self.observe(Some(&request.image)).await?;
        let image = request.image.to_string();

        let transition = match self.machine.state() {
            LifecycleState::Unbuilt => Some(Transition::Build),
            LifecycleState::Built if rebuild => Some(Transition::Rebuild),
            LifecycleState::Built => None,
            // The container keeps the image it was created from.
            LifecycleState::Running | LifecycleState::Stopped if rebuild || !image_present => {
                self.run_build(request, None).await?;
                return Ok(BuildOutcome { image, built: true });
            }
            LifecycleState::Running | LifecycleState::Stopped => None,
        };

        match transition {
            Some(t) => {
                self.run_build(request, Some(t)).await?;
                Ok(BuildOutcome { image, built: true })
            }
            None => {
                info!("Image {} is up to date", image);
                Ok(BuildOutcome { image, built: false })
            }
        }
    }

    async fn run_build(&mut self, request: &BuildRequest, transition: Option<Transition>) -> Result<(), LifecycleError> {
        if let Some(t) = transition {
            self.machine.begin(t)?;
        }

        match self.runtime.build_image(request).await {
            Ok(()) => {
                if let Some(t) = transition {
                    self.machine.complete(t)?;
                }
                Ok(())
            }
            Err(e) => {
                if let Some(t) = transition {
                    self.machine.fail(t);
                }
                match e {
                    ContainerError::CommandFailed { output, .. } => Err(BuildError {
                        image: request.image.to_string(),
                        hint: build_hint(&output).to_string(),
                        output,
                    }
                    .into()),
                    e => Err(e.into()),
                }
            }
        }
    }

    /// Bring the environment to Built with an image for the current inputs,
    /// removing a stale container first.
    async fn prepare(
        &mut self,
        request: &BuildRequest,
        status: &ContainerStatus,
        image_present: bool,
        rebuild: bool,
        notices: &mut Vec<Notice>,
    ) -> Result<(), LifecycleError> {
        if self.machine.state() == LifecycleState::Running {
            self.machine.begin(Transition::Stop)?;
            if let Err(e) = self.runtime.stop_container(&self.container).await {
                self.machine.fail(Transition::Stop);
                return Err(e.into());
            }
            self.machine.complete(Transition::Stop)?;
        }

        if self.machine.state() == LifecycleState::Stopped {
            if let ContainerStatus::Present { image: Some(old), .. } = status {
                if *old != request.image.to_string() {
                    notices.push(Notice::StaleContainer {
                        container: self.container.clone(),
                        image: old.clone(),
                    });
                }
            }
            info!("Removing stale container {}", self.container);
            self.machine.begin(Transition::RemoveContainer)?;
            match self.runtime.remove_container(&self.container).await {
                Ok(()) | Err(ContainerError::NotFound(_)) => {}
                Err(e) => {
                    self.machine.fail(Transition::RemoveContainer);
                    return Err(e.into());
                }
            }
            self.machine.complete(Transition::RemoveContainer)?;
        }

        match self.machine.state() {
            LifecycleState::Unbuilt => self.run_build(request, Some(Transition::Build)).await,
            LifecycleState::Built if rebuild || !image_present => {
                self.run_build(request, Some(Transition::Rebuild)).await
            }
            _ => Ok(()),
        }
    }

    /// Build if needed, then create and start the container.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Ports`] when no free port is left,
    /// [`LifecycleError::Build`] or [`LifecycleError::Start`] when the
    /// runtime refuses, and [`LifecycleError::Runtime`] for API failures.
    pub async fn start(
        &mut self,
        request: &BuildRequest,
        environment: &RuntimeEnvironment,
        rebuild: bool,
    ) -> Result<StartOutcome, LifecycleError> {
        let (status, image_present) = self.observe(Some(&request.image)).await?;
        let mut notices = Vec::new();

        if self.machine.state() == LifecycleState::Running && !rebuild {
            info!("Container {} is already running", self.container);
            if let ContainerStatus::Present { image: Some(old), .. } = &status {
                if *old != request.image.to_string() {
                    notices.push(Notice::StaleContainer {
                        container: self.container.clone(),
                        image: old.clone(),
                    });
                }
            }
            return Ok(StartOutcome {
                container: self.container.clone(),
                image: request.image.to_string(),
                urls: running_urls(&status),
                already_running: true,
                notices,
            });
        }

        self.prepare(request, &status, image_present, rebuild, &mut notices)
            .await?;

        let desired = self.published_ports(environment, &mut notices);
        let resolver = PortConflictResolver::new(self.context.probe);
        let mut resolution = resolver.resolve(&desired)?;
        notices.extend(resolution.notices.drain(..).map(Notice::PortReassigned));

        self.ensure_network(environment).await?;

        let image = request.image.to_string();
        let mut retried = false;
        loop {
            let spec = self
                .compose_spec(&image, &resolution.ports, environment, None)
                .map_err(|e| self.start_error("invalid container specification", e))?;

            self.machine.begin(Transition::Start)?;
            if let Err(e) = self.runtime.create_container(&spec).await {
                self.machine.fail(Transition::Start);
                return Err(self.start_error("container could not be created", e).into());
            }

            match self.runtime.start_container(&self.container).await {
                Ok(()) => {
                    self.machine.complete(Transition::Start)?;
                    break;
                }
                Err(e) => {
                    self.machine.fail(Transition::Start);
                    if let Err(remove) = self.runtime.remove_container(&self.container).await {
                        debug!("Removing failed container: {}", remove);
                    }

                    if e.is_port_conflict() && !retried {
                        retried = true;
                        let excluded: BTreeSet<u16> = match e.conflicting_port() {
                            Some(port) => [port].into(),
                            None => resolution.ports.values().copied().collect(),
                        };
                        warn!(
                            "Port taken after probing ({}); resolving ports again",
                            e.output()
                        );
                        resolution = resolver.resolve_excluding(&desired, &excluded)?;
                        notices.extend(resolution.notices.drain(..).map(Notice::PortReassigned));
                        continue;
                    }
                    return Err(self.start_error("container could not be started", e).into());
                }
            }
        }

        let status = self.runtime.container_status(&self.container).await?;
        if !status.is_running() {
            let output = self
                .runtime
                .container_logs(&self.container, START_LOG_TAIL)
                .await
                .unwrap_or_default();
            self.machine = StateMachine::new(LifecycleState::Stopped);
            return Err(StartError {
                container: self.container.clone(),
                reason: "the entry process exited immediately".to_string(),
                output,
                hint: format!(
                    "check the image's default command; `devbox shell` opens {} in the same image",
                    self.context
                        .config
                        .text(keys::SHELL_COMMAND)
                        .unwrap_or("a shell")
                ),
            }
            .into());
        }

        if self.context.config.flag(keys::HEALTH_PROBE) {
            let interval = self
                .context
                .config
                .integer(keys::HEALTH_PROBE_INTERVAL)
                .unwrap_or(60);
            let probe = HealthProbe::new(interval);
            if let Err(e) = self
                .runtime
                .launch_health_probe(&self.container, &probe)
                .await
            {
                warn!("Health probe not started: {}", e);
                notices.push(Notice::HealthProbe(e.to_string()));
            }
        }

        let urls = resolution
            .ports
            .iter()
            .map(|(service, port)| AccessUrl::new(service, *port))
            .collect();

        info!("Container {} is running from {}", self.container, image);
        Ok(StartOutcome {
            container: self.container.clone(),
            image,
            urls,
            already_running: false,
            notices,
        })
    }

    /// Run `command` interactively in the project image and return its exit
    /// status. A running container is reused; otherwise a fresh container is
    /// created for the command and removed when it exits.
    ///
    /// # Errors
    ///
    /// Same as [`start`](Self::start).
    pub async fn shell(
        &mut self,
        request: &BuildRequest,
        environment: &RuntimeEnvironment,
        command: &[String],
        rebuild: bool,
    ) -> Result<ShellOutcome, LifecycleError> {
        let (status, image_present) = self.observe(Some(&request.image)).await?;
        let mut notices = Vec::new();

        if self.machine.state() == LifecycleState::Running && !rebuild {
            info!("Attaching to running container {}", self.container);
            let exit_code = self
                .runtime
                .exec_interactive(&self.container, command)
                .await?;
            return Ok(ShellOutcome { exit_code, notices });
        }

        self.prepare(request, &status, image_present, rebuild, &mut notices)
            .await?;

        let desired = self.published_ports(environment, &mut notices);
        let resolution = PortConflictResolver::new(self.context.probe).resolve(&desired)?;
        notices.extend(resolution.notices.into_iter().map(Notice::PortReassigned));

        self.ensure_network(environment).await?;

        let image = request.image.to_string();
        let spec = self
            .compose_spec(&image, &resolution.ports, environment, Some(command))
            .map_err(|e| self.start_error("invalid container specification", e))?;

        self.machine.begin(Transition::Start)?;
        if let Err(e) = self.runtime.create_container(&spec).await {
            self.machine.fail(Transition::Start);
            return Err(self.start_error("container could not be created", e).into());
        }

        let exit_code = match self.runtime.attach(&self.container).await {
            Ok(code) => code,
            Err(e) => {
                self.machine.fail(Transition::Start);
                if let Err(remove) = self.runtime.remove_container(&self.container).await {
                    debug!("Removing failed container: {}", remove);
                }
                return Err(self.start_error("terminal could not be attached", e).into());
            }
        };
        self.machine.complete(Transition::Start)?;
        // The entry process has exited, so the container has stopped.
        self.machine.complete(Transition::Stop)?;
        debug!("Shell exited with status {}", exit_code);

        match self.runtime.remove_container(&self.container).await {
            Ok(()) => {
                self.machine.complete(Transition::RemoveContainer)?;
            }
            Err(e) => {
                self.machine.fail(Transition::RemoveContainer);
                notices.push(Notice::Cleanup(CleanupWarning::new(
                    CleanupStep::RemoveContainer,
                    &self.container,
                    e.to_string(),
                )));
            }
        }

        Ok(ShellOutcome { exit_code, notices })
    }

    /// Stop the container. A container that is not running is reported as a
    /// warning.
    ///
    /// # Errors
    ///
    /// Returns the runtime error only if the runtime cannot be queried.
    pub async fn stop(&mut self) -> Result<Vec<CleanupWarning>, LifecycleError> {
        self.observe(None).await?;
        let mut warnings = Vec::new();

        if self.machine.state() != LifecycleState::Running {
            warnings.push(CleanupWarning::new(
                CleanupStep::StopContainer,
                &self.container,
                "container is not running",
            ));
            return Ok(warnings);
        }

        self.machine.begin(Transition::Stop)?;
        match self.runtime.stop_container(&self.container).await {
            Ok(()) => {
                self.machine.complete(Transition::Stop)?;
            }
            Err(e) => {
                self.machine.fail(Transition::Stop);
                warnings.push(CleanupWarning::new(
                    CleanupStep::StopContainer,
                    &self.container,
                    e.to_string(),
                ));
            }
        }
        Ok(warnings)
    }

    /// Stop and remove the container and the isolated network; with
    /// `remove_images` also every image labelled for the project. Every step
    /// runs regardless of the others.
    ///
    /// # Errors
    ///
    /// Returns the runtime error only if the runtime cannot be queried.
    pub async fn clean(&mut self, remove_images: bool) -> Result<Vec<CleanupWarning>, LifecycleError> {
        let mut warnings = self.stop().await?;
        // Stopping an already stopped container is not worth a warning here.
        warnings.retain(|w| !(w.step == CleanupStep::StopContainer && w.reason == "container is not running"));

        match self.runtime.remove_container(&self.container).await {
            Ok(()) => info!("Removed container {}", self.container),
            Err(ContainerError::NotFound(_)) => warnings.push(CleanupWarning::new(
                CleanupStep::RemoveContainer,
                &self.container,
                "container was already removed",
            )),
            Err(e) => warnings.push(CleanupWarning::new(
                CleanupStep::RemoveContainer,
                &self.container,
                e.to_string(),
            )),
        }

        let network = SecurityPolicyBuilder::isolated_network_name(&self.container);
        let isolation = self.context.config.flag(keys::NETWORK_ISOLATION);
        match self.runtime.remove_network(&network).await {
            Ok(()) => info!("Removed network {}", network),
            Err(ContainerError::NotFound(_)) if !isolation => {
                debug!("No isolated network {}", network);
            }
            Err(ContainerError::NotFound(_)) => warnings.push(CleanupWarning::new(
                CleanupStep::RemoveNetwork,
                &network,
                "network was already removed",
            )),
            Err(e) => warnings.push(CleanupWarning::new(
                CleanupStep::RemoveNetwork,
                &network,
                e.to_string(),
            )),
        }

        if remove_images {
            let project = project_label(self.context.config);
            match self.runtime.project_images(&project).await {
                Ok(images) if images.is_empty() => warnings.push(CleanupWarning::new(
                    CleanupStep::RemoveImage,
                    &format!("{}={}", PROJECT_LABEL, project),
                    "no images found",
                )),
                Ok(images) => {
                    for image in images {
                        match self.runtime.remove_image(&image).await {
                            Ok(()) => info!("Removed image {}", image),
                            Err(e) => warnings.push(CleanupWarning::new(
                                CleanupStep::RemoveImage,
                                &image,
                                e.to_string(),
                            )),
                        }
                    }
                }
                Err(e) => warnings.push(CleanupWarning::new(
                    CleanupStep::ListImages,
                    &project,
                    e.to_string(),
                )),
            }
        }

        for warning in &warnings {
            warn!("{}", warning);
        }
        self.observe(None).await?;
        Ok(warnings)
    }

    /// Desired host ports. Docker publishes nothing from an internal
    /// network, so an isolated container gets none.
    fn published_ports(&self, environment: &RuntimeEnvironment, notices: &mut Vec<Notice>) -> PortMap {
        match environment.policy.network() {
            NetworkMode::Isolated { network } => {
                info!("Not publishing ports from internal network {}", network);
                notices.push(Notice::PortsNotPublished {
                    network: network.clone(),
                });
                PortMap::new()
            }
            _ => ports::desired_ports(self.context.config),
        }
    }

    async fn ensure_network(&self, environment: &RuntimeEnvironment) -> Result<(), LifecycleError> {
        if let NetworkMode::Isolated { network } = environment.policy.network() {
            self.runtime
                .ensure_network(network, &self.labels())
                .await
                .map_err(|e| self.start_error("isolated network could not be created", e))?;
        }
        Ok(())
    }

    fn labels(&self) -> BTreeMap<String, String> {
        [
            (PROJECT_LABEL.to_string(), project_label(self.context.config)),
            (MANAGED_LABEL.to_string(), "true".to_string()),
        ]
        .into()
    }

    fn start_error(&self, reason: &str, error: ContainerError) -> StartError {
        let hint = if error.is_port_conflict() {
            match error.conflicting_port() {
                Some(port) => format!(
                    "port {} was taken again after a retry; free it or change the service port setting",
                    port
                ),
                None => "a published port is in use; free it or change the service port settings".to_string(),
            }
        } else if matches!(error, ContainerError::RuntimeUnavailable(_)) {
            "start Docker or Podman and try again".to_string()
        } else {
            format!(
                "inspect the output above; `devbox clean` removes a half-created {}",
                self.container
            )
        };
        StartError {
            container: self.container.clone(),
            reason: format!("{}: {}", reason, error),
            output: error.output(),
            hint,
        }
    }

    /// Assemble the container from configuration and the prepared inputs.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::ConfigError`] if the result is inconsistent,
    /// e.g. a variable bound twice.
    pub fn compose_spec(
        &self,
        image: &str,
        ports: &PortMap,
        environment: &RuntimeEnvironment,
        command: Option<&[String]>,
    ) -> Result<ContainerSpec, ContainerError> {
        let config = self.context.config;
        let host = self.context.host;
        let layout = HostLayout::for_project(self.context.project_root);
        let workspace = config
            .path(keys::WORKSPACE_DIR)
            .map(|p| env::project_relative(self.context.project_root, p))
            .unwrap_or_else(|| layout.workspace.clone());

        let mut builder = ContainerSpec::builder()
            .name(self.container.as_str())
            .image(image)
            .working_dir(env::container::WORKSPACE)
            .label(PROJECT_LABEL, project_label(config))
            .label(MANAGED_LABEL, "true")
            .mount(host.mount_source(&workspace), env::container::WORKSPACE.to_string(), false)
            .mount(host.mount_source(&layout.cache), env::container::CACHE.to_string(), false)
            .mount(host.mount_source(&layout.logs), env::container::LOGS.to_string(), false)
            .env("XDG_CACHE_HOME", env::container::CACHE);

        if environment.ca_bundle.is_some() {
            builder = builder.mount(
                host.mount_source(&layout.certs),
                env::container::CERTS.to_string(),
                true,
            );
            for var in CA_BUNDLE_VARS {
                builder = builder.env(var, env::container_ca_bundle_path());
            }
        }

        for mount in environment.credentials.mounts() {
            builder = builder.mount(host.mount_source(&mount.source), mount.target, mount.read_only);
        }

        builder = builder
            .bindings(proxy_bindings(config))
            .bindings(git_bindings(config))
            .bindings(environment.credentials.env_bindings());
        if let Some(region) = config.text(keys::AWS_REGION) {
            builder = builder.env(keys::AWS_REGION, region);
        }

        if let Some(mb) = config.integer(keys::MEMORY_LIMIT_MB).filter(|mb| *mb > 0) {
            let bytes = i64::try_from(mb.saturating_mul(1024 * 1024)).unwrap_or(i64::MAX);
            builder = builder.memory_limit(bytes);
        }

        for (service, host_port) in ports {
            if let Some(known) = ports::service(service) {
                builder = builder.publish(PublishedPort {
                    service: service.clone(),
                    container_port: known.container_port,
                    host_port: *host_port,
                });
            }
        }

        if let Some(command) = command {
            builder = builder.cmd(command.to_vec()).interactive(true);
        }

        builder.security(environment.policy.clone()).build()
    }
}

/// Proxy variables in both spellings. URLs with a password travel as secrets.
fn proxy_bindings(config: &Configuration) -> Vec<EnvBinding> {
    let mut bindings = Vec::new();
    for (key, lower) in PROXY_VARS {
        let Some(value) = config.raw(key) else {
            continue;
        };
        let secret = config.url(key).is_some_and(|u| u.password().is_some());
        for name in [key, lower] {
            bindings.push(if secret {
                EnvBinding::secret(name, SecretString::from(value.clone()))
            } else {
                EnvBinding::plain(name, value.clone())
            });
        }
    }
    bindings
}

fn git_bindings(config: &Configuration) -> Vec<EnvBinding> {
    let mut bindings = Vec::new();
    if let Some(name) = config.text(keys::GIT_USER_NAME) {
        bindings.push(EnvBinding::plain("GIT_AUTHOR_NAME", name));
        bindings.push(EnvBinding::plain("GIT_COMMITTER_NAME", name));
    }
    if let Some(email) = config.text(keys::GIT_USER_EMAIL) {
        bindings.push(EnvBinding::plain("GIT_AUTHOR_EMAIL", email));
        bindings.push(EnvBinding::plain("GIT_COMMITTER_EMAIL", email));
    }
    bindings
}

fn running_urls(status: &ContainerStatus) -> Vec<AccessUrl> {
    let ContainerStatus::Present { ports, .. } = status else {
        return Vec::new();
    };
    ports::SERVICES
        .iter()
        .filter_map(|s| ports.get(&s.container_port).map(|p| AccessUrl::new(s.name, *p)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certs::tests::FakeHost;
    use crate::config::{ConfigLayers, ConfigResolver, Layer, RawLayer};
    use crate::container::runtime::testing::MockRuntime;
    use crate::ports::tests::BoundPorts;
    use crate::security::HostCapabilities;
    use std::collections::BTreeMap;

    const PROJECT: &str = "/projects/demo";

    fn config_with(pairs: &[(&str, &str)]) -> Configuration {
        let mut cli = RawLayer::new(Layer::Cli);
        for (k, v) in pairs {
            cli.set(*k, *v);
        }
        ConfigResolver::resolve(&ConfigLayers {
            cli,
            ..Default::default()
        })
        .unwrap()
        .configuration
    }

    fn request() -> BuildRequest {
        let build_args = BTreeMap::new();
        BuildRequest {
            project: "devbox".to_string(),
            dockerfile: PathBuf::from("/projects/demo/container/Dockerfile"),
            context: PathBuf::from("/projects/demo/container"),
            image: ImageReference::compute("devbox", b"FROM debian\n", &build_args),
            build_args,
            ca_bundle: None,
            dockerfile_content: b"FROM debian\n".to_vec(),
        }
    }

    fn environment(config: &Configuration, credentials: CredentialSet) -> RuntimeEnvironment {
        RuntimeEnvironment {
            credentials,
            policy: SecurityPolicyBuilder::new(config, &HostCapabilities::default(), Path::new(PROJECT))
                .build()
                .unwrap(),
            ca_bundle: None,
        }
    }

    fn host() -> FakeHost {
        FakeHost { exports: Ok(Vec::new()) }
    }

    fn manager<'a>(
        runtime: &'a MockRuntime,
        config: &'a Configuration,
        host: &'a FakeHost,
        probe: &'a BoundPorts,
    ) -> ContainerLifecycleManager<'a> {
        ContainerLifecycleManager::new(
            runtime,
            LifecycleContext {
                config,
                project_root: Path::new(PROJECT),
                host,
                probe,
            },
        )
    }

    #[test]
    fn test_transition_table() {
        use LifecycleState::*;
        assert_eq!(Unbuilt.target(Transition::Build), Some(Built));
        assert_eq!(Built.target(Transition::Rebuild), Some(Built));
        assert_eq!(Built.target(Transition::Start), Some(Running));
        assert_eq!(Running.target(Transition::Stop), Some(Stopped));
        assert_eq!(Stopped.target(Transition::RemoveContainer), Some(Built));
        assert_eq!(Stopped.target(Transition::RemoveImage), Some(Unbuilt));
        assert_eq!(Unbuilt.target(Transition::Start), None);
        assert_eq!(Running.target(Transition::Build), None);
    }

    #[test]
    fn test_failed_edge_only_accepts_retry() {
        let mut machine = StateMachine::new(LifecycleState::Built);
        machine.fail(Transition::Start);

        assert!(matches!(
            machine.begin(Transition::Rebuild),
            Err(LifecycleError::RetryRequired {
                failed: Transition::Start,
                attempted: Transition::Rebuild
            })
        ));
        assert_eq!(machine.complete(Transition::Start).unwrap(), LifecycleState::Running);
        assert!(machine.begin(Transition::Stop).is_ok());
    }

    #[test]
    fn test_observation() {
        let absent = ContainerStatus::Absent;
        let stopped = ContainerStatus::Present {
            running: false,
            image: None,
            ports: BTreeMap::new(),
        };
        assert_eq!(LifecycleState::observe(&absent, false), LifecycleState::Unbuilt);
        assert_eq!(LifecycleState::observe(&absent, true), LifecycleState::Built);
        assert_eq!(LifecycleState::observe(&stopped, true), LifecycleState::Stopped);
    }

    #[test]
    fn test_build_hints() {
        let tls = build_hint("x509: certificate signed by unknown authority");
        assert!(tls.contains("CERT_DIR"));
        assert!(tls.contains("--from=devbox-certs"));
        assert!(build_hint("Could not resolve host: deb.debian.org").contains("HTTP_PROXY"));
        assert!(build_hint("pull access denied for corp/base").contains("BASE_REGISTRY"));
        assert!(build_hint("exit code 2").contains("Dockerfile"));
    }

    #[tokio::test]
    async fn test_build_is_noop_for_existing_image() {
        let config = config_with(&[]);
        let request = request();
        let runtime = MockRuntime::new().with_image(&request.image.to_string());
        let (host, probe) = (host(), BoundPorts(BTreeSet::new()));
        let mut manager = manager(&runtime, &config, &host, &probe);

        let outcome = manager.build(&request, false).await.unwrap();
        assert!(!outcome.built);
        assert!(runtime.calls().is_empty());

        let outcome = manager.build(&request, true).await.unwrap();
        assert!(outcome.built);
        assert_eq!(manager.state(), LifecycleState::Built);
    }

    #[tokio::test]
    async fn test_build_failure_carries_output_and_hint() {
        let config = config_with(&[]);
        let runtime = MockRuntime::new();
        *runtime.build_failure.lock().unwrap() =
            Some("Temporary failure in name resolution".to_string());
        let (host, probe) = (host(), BoundPorts(BTreeSet::new()));
        let mut manager = manager(&runtime, &config, &host, &probe);

        match manager.build(&request(), false).await {
            Err(LifecycleError::Build(err)) => {
                assert!(err.output.contains("name resolution"));
                assert!(err.hint.contains("HTTP_PROXY"));
            }
            other => panic!("expected build error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_start_builds_and_reports_urls() {
        let config = config_with(&[("HEALTH_PROBE", "true")]);
        let runtime = MockRuntime::new();
        let (host, probe) = (host(), BoundPorts(BTreeSet::new()));
        let mut manager = manager(&runtime, &config, &host, &probe);

        let outcome = manager
            .start(&request(), &environment(&config, CredentialSet::None), false)
            .await
            .unwrap();

        assert_eq!(manager.state(), LifecycleState::Running);
        assert!(!outcome.already_running);
        let urls: Vec<_> = outcome.urls.iter().map(|u| u.url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["http://localhost:5678", "http://localhost:8080", "http://localhost:8888"]
        );
        let calls = runtime.calls();
        assert!(calls[0].starts_with("build devbox:"));
        assert_eq!(&calls[1..], &["create devbox", "start devbox", "probe devbox"]);
    }

    #[tokio::test]
    async fn test_start_removes_stale_container() {
        let config = config_with(&[]);
        let request = request();
        let runtime = MockRuntime::new()
            .with_image(&request.image.to_string())
            .with_container("devbox", "devbox:0ld", false);
        let (host, probe) = (host(), BoundPorts(BTreeSet::new()));
        let mut manager = manager(&runtime, &config, &host, &probe);

        let outcome = manager
            .start(&request, &environment(&config, CredentialSet::None), false)
            .await
            .unwrap();

        assert_eq!(runtime.calls(), vec!["remove devbox", "create devbox", "start devbox"]);
        assert!(matches!(
            outcome.notices.as_slice(),
            [Notice::StaleContainer { image, .. }] if image == "devbox:0ld"
        ));
    }

    #[tokio::test]
    async fn test_start_retries_once_after_port_race() {
        let config = config_with(&[]);
        let request = request();
        let runtime = MockRuntime::new().with_image(&request.image.to_string());
        runtime.fail_next_start(ContainerError::ApiError(
            bollard::errors::Error::DockerResponseServerError {
                status_code: 500,
                message: "Bind for 0.0.0.0:8080 failed: port is already allocated".to_string(),
            },
        ));
        let (host, probe) = (host(), BoundPorts(BTreeSet::new()));
        let mut manager = manager(&runtime, &config, &host, &probe);

        let outcome = manager
            .start(&request, &environment(&config, CredentialSet::None), false)
            .await
            .unwrap();

        let http = outcome.urls.iter().find(|u| u.service == "http").unwrap();
        assert_eq!(http.host_port, 9080);
        assert!(outcome.notices.iter().any(|n| matches!(
            n,
            Notice::PortReassigned(r) if r.service == "http" && r.assigned == 9080
        )));
        assert_eq!(
            runtime.calls(),
            vec!["create devbox", "start devbox", "remove devbox", "create devbox", "start devbox"]
        );
    }

    #[tokio::test]
    async fn test_second_port_race_is_start_error() {
        let config = config_with(&[]);
        let request = request();
        let runtime = MockRuntime::new().with_image(&request.image.to_string());
        for _ in 0..2 {
            runtime.fail_next_start(ContainerError::CommandFailed {
                command: "start".to_string(),
                exit_code: 125,
                output: "listen tcp 0.0.0.0:8888: bind: address already in use".to_string(),
            });
        }
        let (host, probe) = (host(), BoundPorts(BTreeSet::new()));
        let mut manager = manager(&runtime, &config, &host, &probe);

        match manager
            .start(&request, &environment(&config, CredentialSet::None), false)
            .await
        {
            Err(LifecycleError::Start(err)) => assert!(err.hint.contains("8888")),
            other => panic!("expected start error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_port_exhaustion_stops_start() {
        let config = config_with(&[]);
        let request = request();
        let runtime = MockRuntime::new().with_image(&request.image.to_string());
        let host = host();
        let probe = BoundPorts([8080, 9080, 10080, 11080].into_iter().collect());
        let mut manager = manager(&runtime, &config, &host, &probe);

        let result = manager
            .start(&request, &environment(&config, CredentialSet::None), false)
            .await;
        assert!(matches!(result, Err(LifecycleError::Ports(_))));
        assert!(runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn test_container_exiting_immediately_is_start_error() {
        let config = config_with(&[]);
        let request = request();
        let runtime = MockRuntime::new().with_image(&request.image.to_string());
        *runtime.exit_immediately.lock().unwrap() = true;
        let (host, probe) = (host(), BoundPorts(BTreeSet::new()));
        let mut manager = manager(&runtime, &config, &host, &probe);

        match manager
            .start(&request, &environment(&config, CredentialSet::None), false)
            .await
        {
            Err(LifecycleError::Start(err)) => assert!(err.output.contains("entrypoint")),
            other => panic!("expected start error, got {:?}", other),
        }
        assert_eq!(manager.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_failed_health_probe_is_a_notice() {
        let config = config_with(&[("HEALTH_PROBE", "true")]);
        let request = request();
        let runtime = MockRuntime::new().with_image(&request.image.to_string());
        *runtime.probe_failure.lock().unwrap() = true;
        let (host, probe) = (host(), BoundPorts(BTreeSet::new()));
        let mut manager = manager(&runtime, &config, &host, &probe);

        let outcome = manager
            .start(&request, &environment(&config, CredentialSet::None), false)
            .await
            .unwrap();
        assert!(matches!(outcome.notices.as_slice(), [Notice::HealthProbe(_)]));
    }

    #[tokio::test]
    async fn test_already_running_reports_published_ports() {
        let config = config_with(&[]);
        let request = request();
        let runtime = MockRuntime::new().with_container("devbox", &request.image.to_string(), true);
        runtime
            .containers
            .lock()
            .unwrap()
            .get_mut("devbox")
            .unwrap()
            .ports
            .insert(8080, 9080);
        let (host, probe) = (host(), BoundPorts(BTreeSet::new()));
        let mut manager = manager(&runtime, &config, &host, &probe);

        let outcome = manager
            .start(&request, &environment(&config, CredentialSet::None), false)
            .await
            .unwrap();
        assert!(outcome.already_running);
        assert_eq!(outcome.urls, vec![AccessUrl::new("http", 9080)]);
        assert!(runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn test_isolated_network_is_created() {
        let config = config_with(&[("NETWORK_ISOLATION", "true")]);
        let request = request();
        let runtime = MockRuntime::new().with_image(&request.image.to_string());
        let (host, probe) = (host(), BoundPorts(BTreeSet::new()));
        let mut manager = manager(&runtime, &config, &host, &probe);

        manager
            .start(&request, &environment(&config, CredentialSet::None), false)
            .await
            .unwrap();
        assert_eq!(runtime.calls()[0], "network devbox-isolated");
    }

    #[tokio::test]
    async fn test_isolated_container_publishes_no_ports() {
        let config = config_with(&[("NETWORK_ISOLATION", "true")]);
        let request = request();
        let runtime = MockRuntime::new().with_image(&request.image.to_string());
        // Every desired port is taken; isolation must not even probe them.
        let (host, probe) = (host(), BoundPorts([8080, 8888, 5678].into()));
        let mut manager = manager(&runtime, &config, &host, &probe);

        let outcome = manager
            .start(&request, &environment(&config, CredentialSet::None), false)
            .await
            .unwrap();

        assert!(outcome.urls.is_empty());
        assert!(outcome.notices.iter().any(|n| matches!(
            n,
            Notice::PortsNotPublished { network } if network == "devbox-isolated"
        )));
        assert!(!outcome.notices.iter().any(|n| matches!(n, Notice::PortReassigned(_))));
        let specs = runtime.specs.lock().unwrap();
        assert!(specs.last().unwrap().ports.is_empty());
    }

    #[tokio::test]
    async fn test_shell_runs_command_and_removes_container() {
        let config = config_with(&[]);
        let request = request();
        let runtime = MockRuntime::new().with_image(&request.image.to_string());
        *runtime.attach_status.lock().unwrap() = 3;
        let (host, probe) = (host(), BoundPorts(BTreeSet::new()));
        let mut manager = manager(&runtime, &config, &host, &probe);

        let command = vec!["/bin/bash".to_string()];
        let outcome = manager
            .shell(&request, &environment(&config, CredentialSet::None), &command, false)
            .await
            .unwrap();

        assert_eq!(outcome.exit_code, 3);
        assert_eq!(runtime.calls(), vec!["create devbox", "attach devbox", "remove devbox"]);
        assert_eq!(manager.state(), LifecycleState::Built);
        let spec = &runtime.specs.lock().unwrap()[0];
        assert!(spec.interactive);
        assert_eq!(spec.cmd.as_deref(), Some(command.as_slice()));
    }

    #[tokio::test]
    async fn test_shell_execs_into_running_container() {
        let config = config_with(&[]);
        let request = request();
        let runtime = MockRuntime::new().with_container("devbox", &request.image.to_string(), true);
        let (host, probe) = (host(), BoundPorts(BTreeSet::new()));
        let mut manager = manager(&runtime, &config, &host, &probe);

        let outcome = manager
            .shell(
                &request,
                &environment(&config, CredentialSet::None),
                &["zsh".to_string()],
                false,
            )
            .await
            .unwrap();
        assert_eq!(outcome.exit_code, 0);
        assert_eq!(runtime.calls(), vec!["exec devbox zsh"]);
    }

    #[tokio::test]
    async fn test_stop_when_not_running_warns() {
        let config = config_with(&[]);
        let runtime = MockRuntime::new();
        let (host, probe) = (host(), BoundPorts(BTreeSet::new()));
        let mut manager = manager(&runtime, &config, &host, &probe);

        let warnings = manager.stop().await.unwrap();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].step, CleanupStep::StopContainer);
    }

    #[tokio::test]
    async fn test_clean_with_images_on_removed_container_only_warns() {
        let config = config_with(&[]);
        let runtime = MockRuntime::new();
        let (host, probe) = (host(), BoundPorts(BTreeSet::new()));
        let mut manager = manager(&runtime, &config, &host, &probe);

        let warnings = manager.clean(true).await.unwrap();
        let steps: Vec<_> = warnings.iter().map(|w| w.step).collect();
        assert_eq!(steps, vec![CleanupStep::RemoveContainer, CleanupStep::RemoveImage]);
        assert!(warnings.iter().all(|w| !w.remediation().is_empty()));
        assert_eq!(manager.state(), LifecycleState::Unbuilt);
    }

    #[tokio::test]
    async fn test_clean_removes_everything() {
        let config = config_with(&[("NETWORK_ISOLATION", "true")]);
        let runtime = MockRuntime::new()
            .with_image("devbox:aaa")
            .with_image("devbox:bbb")
            .with_container("devbox", "devbox:aaa", true);
        runtime.networks.lock().unwrap().insert("devbox-isolated".to_string());
        let (host, probe) = (host(), BoundPorts(BTreeSet::new()));
        let mut manager = manager(&runtime, &config, &host, &probe);

        let warnings = manager.clean(true).await.unwrap();
        assert!(warnings.is_empty(), "{:?}", warnings);
        assert_eq!(
            runtime.calls(),
            vec![
                "stop devbox",
                "remove devbox",
                "remove-network devbox-isolated",
                "remove-image devbox:aaa",
                "remove-image devbox:bbb",
            ]
        );
    }

    #[test]
    fn test_compose_spec() {
        let config = config_with(&[
            ("HTTP_PROXY", "http://user:pw@proxy.corp:3128"),
            ("NO_PROXY", "localhost"),
            ("GIT_USER_NAME", "Dev Eloper"),
            ("MEMORY_LIMIT_MB", "2048"),
        ]);
        let runtime = MockRuntime::new();
        let (host, probe) = (host(), BoundPorts(BTreeSet::new()));
        let manager = manager(&runtime, &config, &host, &probe);

        let mut environment = environment(
            &config,
            CredentialSet::ExplicitKeys {
                access_key_id: "AKIAEXAMPLE".to_string(),
                secret_access_key: SecretString::from("s3cr3t".to_string()),
                session_token: None,
            },
        );
        environment.ca_bundle = Some(PathBuf::from("/projects/demo/.devbox/certs/ca-bundle.pem"));
        let ports: PortMap = [("http".to_string(), 9080)].into();

        let spec = manager
            .compose_spec("devbox:abc", &ports, &environment, None)
            .unwrap();

        assert_eq!(spec.labels[PROJECT_LABEL], "devbox");
        assert_eq!(spec.labels[MANAGED_LABEL], "true");
        assert_eq!(spec.memory_limit, Some(2048 * 1024 * 1024));
        assert_eq!(spec.ports[0].container_port, 8080);
        assert_eq!(spec.ports[0].host_port, 9080);
        assert!(spec.env_value("HTTP_PROXY").unwrap().is_secret());
        assert!(spec.env_value("http_proxy").unwrap().is_secret());
        assert!(!spec.env_value("NO_PROXY").unwrap().is_secret());
        assert!(spec.env_value("AWS_SECRET_ACCESS_KEY").unwrap().is_secret());
        assert!(spec.env_value("GIT_COMMITTER_NAME").is_some());
        assert!(spec.env_value("SSL_CERT_FILE").is_some());
        assert!(spec.env_value("AWS_REGION").is_some());
        assert!(!format!("{:?}", spec).contains("s3cr3t"));

        let targets: Vec<_> = spec
            .mounts
            .iter()
            .map(|m| (m.target.clone().unwrap(), m.read_only.unwrap()))
            .collect();
        assert!(targets.contains(&("/workspace".to_string(), false)));
        assert!(targets.contains(&("/cache".to_string(), false)));
        assert!(targets.contains(&("/var/log/devbox".to_string(), false)));
        assert!(targets.contains(&(env::container::CERTS.to_string(), true)));
    }

    #[test]
    fn test_compose_spec_mounts_profile_store_read_only() {
        let config = config_with(&[]);
        let runtime = MockRuntime::new();
        let (host, probe) = (host(), BoundPorts(BTreeSet::new()));
        let manager = manager(&runtime, &config, &host, &probe);

        let environment = environment(
            &config,
            CredentialSet::Profile {
                name: "dev".to_string(),
                store_dir: PathBuf::from("/home/dev/.aws"),
            },
        );
        let spec = manager
            .compose_spec("devbox:abc", &PortMap::new(), &environment, None)
            .unwrap();

        let aws = spec
            .mounts
            .iter()
            .find(|m| m.target.as_deref() == Some(env::container::AWS))
            .unwrap();
        assert_eq!(aws.source.as_deref(), Some("/home/dev/.aws"));
        assert_eq!(aws.read_only, Some(true));
        assert!(spec.env_value("SSL_CERT_FILE").is_none());
    }
}
