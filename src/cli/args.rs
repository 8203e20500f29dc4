//! Command line argument parsing
//!
//! Subcommands:
//! - `config`: write the configuration template
//! - `validate`: resolve configuration and credentials without touching the runtime
//! - `build`: build the project image
//! - `start`: build if needed and start the container
//! - `shell`: run an interactive command in the project image
//! - `stop`: stop the running container
//! - `clean`: remove the container, its network and optionally the images

use crate::config::{Layer, RawLayer, keys};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "devbox")]
#[command(author = "Devbox Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Builds, starts and tears down a security-hardened development container")]
#[command(long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Args {
    /// Project directory (default: current directory)
    #[arg(long = "project-dir", global = true, value_name = "DIR")]
    pub project_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    /// Override a setting (can be used multiple times)
    #[arg(long = "set", global = true, value_name = "KEY=VALUE", value_parser = parse_assignment)]
    pub set: Vec<(String, String)>,

    /// Host port for the http service
    #[arg(long = "http-port", global = true, value_name = "PORT")]
    pub http_port: Option<u16>,

    /// Host port for the notebook service
    #[arg(long = "notebook-port", global = true, value_name = "PORT")]
    pub notebook_port: Option<u16>,

    /// Host port for the debugger
    #[arg(long = "debug-port", global = true, value_name = "PORT")]
    pub debug_port: Option<u16>,

    /// Named cloud credential profile
    #[arg(long = "aws-profile", global = true, value_name = "NAME")]
    pub aws_profile: Option<String>,

    /// Attach the container to an internal network without outbound access
    #[arg(long = "network-isolation", global = true)]
    pub network_isolation: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Commands {
    /// Write the configuration template to .devbox/devbox.conf
    Config {
        /// Overwrite an existing configuration file
        #[arg(long = "force")]
        force: bool,
    },
    /// Check configuration, credentials, ports and the security policy
    Validate {
        /// Print the report as JSON
        #[arg(long = "json")]
        json: bool,
    },
    /// Build the project image
    Build {
        /// Build even if an image for the current inputs exists
        #[arg(long = "rebuild")]
        rebuild: bool,
    },
    /// Build if needed and start the container
    Start {
        /// Rebuild the image and recreate the container
        #[arg(long = "rebuild")]
        rebuild: bool,
    },
    /// Run an interactive command in the project image
    Shell {
        /// Rebuild the image before starting the shell
        #[arg(long = "rebuild")]
        rebuild: bool,
        /// Command to run instead of SHELL_COMMAND
        #[arg(last = true, value_name = "COMMAND")]
        command: Vec<String>,
    },
    /// Stop the running container
    Stop,
    /// Remove the container and the isolated network
    Clean {
        /// Also remove every image built for this project
        #[arg(long = "clean-images")]
        clean_images: bool,
    },
}

fn parse_assignment(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got `{}`", raw)),
    }
}

impl Args {
    pub fn parse() -> Self {
        Parser::parse()
    }

    /// The command line configuration layer. Shortcut flags win over `--set`.
    pub fn to_cli_layer(&self) -> RawLayer {
        let mut layer = RawLayer::new(Layer::Cli);
        for (key, value) in &self.set {
            layer.set(key.clone(), value.clone());
        }
        if let Some(port) = self.http_port {
            layer.set(keys::HTTP_PORT, port.to_string());
        }
        if let Some(port) = self.notebook_port {
            layer.set(keys::NOTEBOOK_PORT, port.to_string());
        }
        if let Some(port) = self.debug_port {
            layer.set(keys::DEBUG_PORT, port.to_string());
        }
        if let Some(profile) = &self.aws_profile {
            layer.set(keys::AWS_PROFILE, profile.clone());
        }
        if self.network_isolation {
            layer.set(keys::NETWORK_ISOLATION, "true");
        }
        layer
    }
}
