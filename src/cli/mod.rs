//! Command surface of the `devbox` binary.
//!
//! [`args`] holds the clap definitions and the command line configuration
//! layer; [`commands`] wires the resolvers and the lifecycle manager together
//! for each subcommand.

pub mod args;
pub mod commands;

pub use args::{Args, Commands};
pub use commands::{CommandContext, ValidationReport, execute};
