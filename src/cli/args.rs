//! CLI argument definitions using clap
//!
//! Commands:
//! - odataquery serve --config <path>
//! - odataquery explain --url <url> [--config <path>] [--entity-set <name>]

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// odataquery - OData v4 query surface over document collections
#[derive(Parser, Debug)]
#[command(name = "odataquery")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the configured entity sets over HTTP
    Serve {
        /// Path to configuration file
        #[arg(long, default_value = "./odataquery.json")]
        config: PathBuf,
    },

    /// Print the parsed query and compiled plan for a request URL
    Explain {
        /// Request URL, e.g. "/odata/Orders?$top=5&$filter=total gt 10"
        #[arg(long)]
        url: String,

        /// Configuration file supplying the entity set's execution settings
        #[arg(long)]
        config: Option<PathBuf>,

        /// Entity set to explain against; defaults to the URL's last path segment
        #[arg(long)]
        entity_set: Option<String>,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_explain() {
        let cli = Cli::parse_from([
            "odataquery",
            "explain",
            "--url",
            "/odata/Orders?$top=1",
            "--entity-set",
            "Orders",
        ]);
        match cli.command {
            Command::Explain { url, config, entity_set } => {
                assert_eq!(url, "/odata/Orders?$top=1");
                assert!(config.is_none());
                assert_eq!(entity_set.as_deref(), Some("Orders"));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_serve_default_config() {
        let cli = Cli::parse_from(["odataquery", "serve"]);
        match cli.command {
            Command::Serve { config } => assert_eq!(config, PathBuf::from("./odataquery.json")),
            other => panic!("unexpected command {:?}", other),
        }
    }
}
