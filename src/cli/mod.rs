//! CLI module for odataquery
//!
//! Provides command-line interface for:
//! - serve: Start the HTTP server from a configuration file
//! - explain: Print the parsed query and compiled plan for a URL

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{explain, load_config, run, run_command, serve};
pub use errors::{CliError, CliErrorCode, CliResult};
