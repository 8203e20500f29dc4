//! Integration tests for configuration loading
//!
//! These tests go through the public API the way the command layer does:
//! a project directory with `.devbox/devbox.conf`, an environment snapshot and
//! a command line layer.

use devbox::config::{
    ConfigResolver, ConfigWarning, ConfigurationError, EnvSnapshot, Layer, RawLayer, keys,
    write_template,
};
use devbox::env::config_file_path;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write_config(project: &Path, content: &str) {
    let path = config_file_path(project);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn cli(pairs: &[(&str, &str)]) -> RawLayer {
    RawLayer::with_entries(Layer::Cli, pairs.iter().copied())
}

#[test]
fn test_missing_file_resolves_to_defaults() {
    let project = TempDir::new().unwrap();
    let resolution = ConfigResolver::for_project(project.path())
        .load(&EnvSnapshot::default(), cli(&[]))
        .unwrap();

    assert!(resolution.file.is_none());
    assert!(resolution.warnings.is_empty());
    let config = resolution.configuration;
    assert_eq!(config.port(keys::HTTP_PORT), Some(8080));
    assert!(config.flag(keys::READONLY_ROOTFS));
    assert!(!config.is_set(keys::AWS_PROFILE));
}

#[test]
fn test_all_layers_in_precedence_order() {
    let project = TempDir::new().unwrap();
    write_config(
        project.path(),
        "# project settings\n\
         export CONTAINER_NAME=\"team-box\"\n\
         HTTP_PORT=9001\n\
         NOTEBOOK_PORT=9002 # notebooks\n\
         DEBUG_PORT='9003'\n",
    );
    let env = EnvSnapshot::from_pairs([
        ("DEVBOX_NOTEBOOK_PORT", "9102"),
        ("DEBUG_PORT", "9103"),
        ("https_proxy", "http://proxy.corp:3128"),
    ]);

    let resolution = ConfigResolver::for_project(project.path())
        .load(&env, cli(&[("DEBUG_PORT", "9203")]))
        .unwrap();
    let config = resolution.configuration;

    assert_eq!(resolution.file, Some(config_file_path(project.path())));
    assert_eq!(config.text(keys::CONTAINER_NAME), Some("team-box"));
    assert_eq!(config.port(keys::HTTP_PORT), Some(9001));
    assert_eq!(config.port(keys::NOTEBOOK_PORT), Some(9102));
    assert_eq!(config.origin(keys::NOTEBOOK_PORT), Some(Layer::Environment));
    assert_eq!(config.port(keys::DEBUG_PORT), Some(9203));
    assert_eq!(config.origin(keys::DEBUG_PORT), Some(Layer::Cli));
    assert_eq!(
        config.url(keys::HTTPS_PROXY).map(|u| u.host_str()),
        Some(Some("proxy.corp"))
    );
}

#[test]
fn test_template_loads_back_to_defaults() {
    let project = TempDir::new().unwrap();
    let path = config_file_path(project.path());
    write_template(&path, false).unwrap();

    let from_template = ConfigResolver::for_project(project.path())
        .load(&EnvSnapshot::default(), cli(&[]))
        .unwrap();
    assert!(from_template.warnings.is_empty());

    let defaults = ConfigResolver::for_project(&project.path().join("elsewhere"))
        .load(&EnvSnapshot::default(), cli(&[]))
        .unwrap();
    for (key, entry) in defaults.configuration.iter() {
        assert_eq!(from_template.configuration.get(key), Some(&entry.value), "{}", key);
    }

    assert!(matches!(
        write_template(&path, false),
        Err(ConfigurationError::TemplateExists(_))
    ));
}

#[test]
fn test_unknown_keys_are_reported_not_applied() {
    let project = TempDir::new().unwrap();
    write_config(project.path(), "HTTP_PROT=9000\n");
    let env = EnvSnapshot::from_pairs([("DEVBOX_COLOUR", "blue")]);

    let resolution = ConfigResolver::for_project(project.path())
        .load(&env, cli(&[]))
        .unwrap();

    assert_eq!(resolution.configuration.port(keys::HTTP_PORT), Some(8080));
    assert!(resolution.warnings.contains(&ConfigWarning::UnknownKey {
        key: "HTTP_PROT".to_string(),
        layer: Layer::File,
    }));
    assert_eq!(resolution.warnings.len(), 2);
}

#[test]
fn test_malformed_file_names_the_line() {
    let project = TempDir::new().unwrap();
    write_config(project.path(), "HTTP_PORT=9000\nthis line is wrong\n");

    let err = ConfigResolver::for_project(project.path())
        .load(&EnvSnapshot::default(), cli(&[]))
        .unwrap_err();
    match err {
        ConfigurationError::MalformedLine { line, .. } => assert_eq!(line, 2),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_secret_values_stay_out_of_debug_output() {
    let project = TempDir::new().unwrap();
    let env = EnvSnapshot::from_pairs([
        ("AWS_ACCESS_KEY_ID", "AKIAEXAMPLE"),
        ("AWS_SECRET_ACCESS_KEY", "very-secret-value"),
    ]);

    let config = ConfigResolver::for_project(project.path())
        .load(&env, cli(&[]))
        .unwrap()
        .configuration;

    assert!(config.secret(keys::AWS_SECRET_ACCESS_KEY).is_some());
    assert!(!format!("{:?}", config).contains("very-secret-value"));
}
