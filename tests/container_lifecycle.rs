//! Integration tests for the container lifecycle.
//!
//! These tests drive a real Docker/Podman runtime through build, start, stop
//! and clean. They are skipped if no runtime is available or
//! SKIP_CONTAINER_TESTS=1.

use devbox::config::{ConfigResolver, EnvSnapshot, Layer, RawLayer};
use devbox::container::{
    BuildRequest, ContainerLifecycleManager, ContainerRuntime, DockerRuntime, LifecycleContext,
    LifecycleState, RuntimeEnvironment,
};
use devbox::credentials::CredentialSet;
use devbox::executor::{CommandExecutor, HostExecutor};
use devbox::ports::TcpProbe;
use devbox::security::SecurityPolicyBuilder;
use serial_test::serial;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;
use test_tag::tag;

const CONTAINER: &str = "devbox-it-lifecycle";

/// Check if container tests should run.
fn should_run_container_tests() -> bool {
    if let Ok(value) = std::env::var("SKIP_CONTAINER_TESTS") {
        if value == "1" || value.eq_ignore_ascii_case("true") {
            return false;
        }
    }

    ["docker", "podman"].iter().any(|program| {
        std::process::Command::new(program)
            .arg("info")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    })
}

fn project() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("container")).unwrap();
    fs::write(
        dir.path().join("container/Dockerfile"),
        "FROM alpine:latest\nCMD [\"sleep\", \"300\"]\n",
    )
    .unwrap();
    dir
}

#[tokio::test]
#[serial]
#[tag(integration, container)]
async fn test_build_start_stop_clean() {
    if !should_run_container_tests() {
        eprintln!("Skipping container tests (Docker/Podman not available or SKIP_CONTAINER_TESTS=1)");
        return;
    }

    let project = project();
    let cli = RawLayer::with_entries(
        Layer::Cli,
        [
            ("CONTAINER_NAME", CONTAINER),
            ("IMAGE_NAME", CONTAINER),
            ("HTTP_PORT", "18080"),
            ("NOTEBOOK_PORT", "18888"),
            ("DEBUG_PORT", "15678"),
            ("INSTALL_HOST_CERTS", "false"),
        ],
    );
    let config = ConfigResolver::for_project(project.path())
        .load(&EnvSnapshot::default(), cli)
        .expect("configuration resolves")
        .configuration;

    let executor: Arc<dyn CommandExecutor> = Arc::new(HostExecutor::new());
    let runtime = DockerRuntime::connect(None, executor.clone())
        .await
        .expect("Failed to connect");
    let host = devbox::host::detect(None, executor);
    let capabilities = runtime.host_capabilities().await.unwrap_or_default();
    let environment = RuntimeEnvironment {
        credentials: CredentialSet::None,
        policy: SecurityPolicyBuilder::new(&config, &capabilities, project.path())
            .build()
            .unwrap(),
        ca_bundle: None,
    };
    devbox::env::HostLayout::for_project(project.path())
        .ensure()
        .unwrap();

    let probe = TcpProbe;
    let mut manager = ContainerLifecycleManager::new(
        &runtime,
        LifecycleContext {
            config: &config,
            project_root: project.path(),
            host: host.as_ref(),
            probe: &probe,
        },
    );
    let _ = manager.clean(false).await;

    let request = BuildRequest::from_config(&config, project.path()).unwrap();
    let built = manager.build(&request, false).await.expect("build succeeds");
    assert!(built.image.starts_with(CONTAINER));
    let again = manager.build(&request, false).await.unwrap();
    assert!(!again.built, "unchanged inputs must not rebuild");

    let started = manager
        .start(&request, &environment, false)
        .await
        .expect("start succeeds");
    assert_eq!(manager.state(), LifecycleState::Running);
    assert_eq!(started.urls.len(), 3);

    let warnings = manager.stop().await.unwrap();
    assert!(warnings.is_empty(), "{:?}", warnings);
    assert_eq!(manager.state(), LifecycleState::Stopped);

    let warnings = manager.clean(true).await.unwrap();
    assert!(
        warnings.iter().all(|w| !w.reason.contains("conflict")),
        "{:?}",
        warnings
    );
    assert_eq!(manager.state(), LifecycleState::Unbuilt);

    // Everything is gone already: only warnings, no error.
    let warnings = manager.clean(true).await.unwrap();
    assert!(!warnings.is_empty());
}
