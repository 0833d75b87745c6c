//! CLI command implementations

use std::fs;
use std::path::Path;

use serde_json::json;

use crate::config::{ExecutionConfig, ServerConfig};
use crate::executor::QueryExecutor;
use crate::http::ODataServer;
use crate::observability::init_tracing;
use crate::query::{ODataParser, QueryParser};

use super::args::Command;
use super::errors::{CliError, CliResult};
use super::io::write_json;

/// Load and parse a server configuration file
pub fn load_config(path: &Path) -> CliResult<ServerConfig> {
    let content = fs::read_to_string(path)
        .map_err(|e| CliError::config_error(format!("Failed to read config: {}", e)))?;
    ServerConfig::from_json(&content)
        .map_err(|e| CliError::config_error(format!("Invalid config JSON: {}", e)))
}

/// Main CLI entry point
///
/// Parses arguments and dispatches to the appropriate command.
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Serve { config } => serve(&config),
        Command::Explain {
            url,
            config,
            entity_set,
        } => {
            let config = config.as_deref().map(load_config).transpose()?;
            let report = explain(&url, config.as_ref(), entity_set.as_deref())?;
            write_json(&report)
        }
    }
}

/// Serve the configured entity sets until the process is stopped
pub fn serve(config_path: &Path) -> CliResult<()> {
    let config = load_config(config_path)?;
    init_tracing(&config.log_level, config.log_json);

    let server = ODataServer::from_config(config)?;

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::boot_failed(format!("Failed to create tokio runtime: {}", e)))?;

    rt.block_on(async {
        server
            .start()
            .await
            .map_err(|e| CliError::boot_failed(format!("HTTP server failed: {}", e)))
    })
}

/// Parse and compile a request URL without executing it.
///
/// Execution settings come from the named entity set, or the set matching
/// the URL's last path segment, when a configuration is supplied.
pub fn explain(
    url: &str,
    config: Option<&ServerConfig>,
    entity_set: Option<&str>,
) -> CliResult<serde_json::Value> {
    let set_name = entity_set
        .map(str::to_string)
        .or_else(|| last_path_segment(url));

    let execution = match (config, set_name.as_deref()) {
        (Some(config), Some(name)) => match config.entity_set(name) {
            Some(set) => set.execution_config(None),
            None if entity_set.is_some() => {
                return Err(CliError::config_error(format!("Unknown entity set: {}", name)));
            }
            None => ExecutionConfig::default(),
        },
        _ => ExecutionConfig::default(),
    };

    let query = ODataParser::new().parse(url);
    let plan = QueryExecutor::new().plan(&query, &execution, true)?;

    Ok(json!({
        "entitySet": set_name,
        "query": query,
        "plan": plan.to_document(),
    }))
}

fn last_path_segment(url: &str) -> Option<String> {
    let path = url.split('?').next().unwrap_or_default();
    path.rsplit('/')
        .find(|segment| !segment.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::errors::CliErrorCode;
    use tempfile::TempDir;

    #[test]
    fn test_load_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("odataquery.json");
        fs::write(
            &config_path,
            json!({"port": 9000, "entity_sets": [{"name": "Orders"}]}).to_string(),
        )
        .unwrap();

        let config = load_config(&config_path).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.entity_sets.len(), 1);
    }

    #[test]
    fn test_load_config_errors() {
        let temp_dir = TempDir::new().unwrap();
        let missing = load_config(&temp_dir.path().join("nope.json")).unwrap_err();
        assert_eq!(missing.code(), &CliErrorCode::ConfigError);

        let config_path = temp_dir.path().join("bad.json");
        fs::write(&config_path, "{ not json").unwrap();
        let invalid = load_config(&config_path).unwrap_err();
        assert_eq!(invalid.code(), &CliErrorCode::ConfigError);
    }

    #[test]
    fn test_explain_direct_plan() {
        let report = explain("/odata/Orders?$top=5&$filter=total%20gt%2010", None, None).unwrap();
        assert_eq!(report["entitySet"], json!("Orders"));
        assert_eq!(report["query"]["top"], json!(5));
        assert_eq!(report["plan"]["filter"], json!({"total": {"$gt": 10}}));
    }

    #[test]
    fn test_explain_uses_entity_set_settings() {
        let config = ServerConfig::from_json(
            r#"{"entity_sets": [{"name": "Orders", "search_fields": ["name"]}]}"#,
        )
        .unwrap();
        let report = explain("/odata/Orders?$search=alp", Some(&config), None).unwrap();
        assert!(report["plan"]["pipeline"].is_array());
    }

    #[test]
    fn test_explain_rejects_bad_filter() {
        let err = explain("/odata/Orders?$filter=name%20eq", None, None).unwrap_err();
        assert_eq!(err.code(), &CliErrorCode::InvalidQuery);
    }

    #[test]
    fn test_explain_unknown_entity_set() {
        let config = ServerConfig::default();
        let err = explain("/odata/Orders", Some(&config), Some("Customers")).unwrap_err();
        assert_eq!(err.code(), &CliErrorCode::ConfigError);
    }
}
