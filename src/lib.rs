//! # devbox
//!
//! Turns a declarative configuration (proxy, registry, credential and network
//! settings) into a running, security-hardened development container, and back
//! down again.
//!
//! ## Architecture Overview
//!
//! - **[`config`]**: layered configuration (defaults, file, environment, command line)
//! - **[`credentials`]**: cloud credential resolution through ordered strategies
//! - **[`certs`]**: trust anchor collection and the PEM bundle installed into the container
//! - **[`ports`]**: host port probing and deterministic reassignment
//! - **[`security`]**: the least-privilege container security policy
//! - **[`container`]**: the lifecycle state machine and the Docker/Podman runtime seam
//! - **[`host`]**: per-platform behaviour (trust stores, bind mount paths)
//! - **[`cli`]**: the `devbox` subcommands
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use devbox::config::{ConfigResolver, EnvSnapshot, Layer, RawLayer};
//! use devbox::ports::{PortConflictResolver, TcpProbe, desired_ports};
//! use std::path::Path;
//!
//! fn main() -> anyhow::Result<()> {
//!     let resolution = ConfigResolver::for_project(Path::new("."))
//!         .load(&EnvSnapshot::capture(), RawLayer::new(Layer::Cli))?;
//!     let ports = PortConflictResolver::new(&TcpProbe)
//!         .resolve(&desired_ports(&resolution.configuration))?;
//!     for (service, port) in &ports.ports {
//!         println!("{} -> {}", service, port);
//!     }
//!     Ok(())
//! }
//! ```

/// Layered configuration resolution.
///
/// The only module that reads the process environment; everything else
/// receives the resolved [`config::Configuration`].
pub mod config;

/// Cloud credential provisioning.
pub mod credentials;

/// Trust anchor collection and installation.
pub mod certs;

/// Host port conflict resolution.
pub mod ports;

/// Container security policy.
pub mod security;

/// Platform adapters for Linux, macOS and Windows hosts.
pub mod host;

/// Container lifecycle management and runtime access.
pub mod container;

/// Host command execution.
pub mod executor;

/// Environment constants and path utilities.
///
/// Centralizes all hardcoded paths and directory names used throughout
/// the application for easier maintenance and consistency.
pub mod env;

/// Top-level errors, exit codes and notices.
pub mod error;

// CLI module for command-line interface
pub mod cli;

pub use config::{Configuration, ConfigurationError};
pub use container::{ContainerLifecycleManager, LifecycleState};
pub use error::{DevboxError, Notice};
