//! Server Configuration
//!
//! JSON configuration for the `odataquery serve` binary: bind address,
//! routing prefix, and one entry per exposed entity set.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::execution::{ExecutionConfig, JoinSpec, Limits, SearchConfig, SecurityPolicy};
use crate::coercion::DateCoercion;
use crate::metadata::{infer_properties_from_json_schema, PropertyMetadata};

/// Field written on every insert and update, read by delta resolution
pub const DEFAULT_CHANGE_FIELD: &str = "_updatedAtMs";

/// Storage identity field
pub const IDENTITY_FIELD: &str = "_id";

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to (default: "0.0.0.0")
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind to (default: 8080)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Route prefix for every entity set (default: "/odata")
    #[serde(default = "default_base_path")]
    pub base_path: String,

    /// CORS allowed origins; empty allows any
    #[serde(default)]
    pub cors_origins: Vec<String>,

    #[serde(default)]
    pub metadata: MetadataConfig,

    /// Change-tracking field (default: "_updatedAtMs")
    #[serde(default = "default_change_field")]
    pub change_field: String,

    /// Log level when `ODATA_LOG` is unset (default: "info")
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON log lines
    #[serde(default)]
    pub log_json: bool,

    #[serde(default)]
    pub entity_sets: Vec<EntitySetConfig>,
}

/// Schema naming for the metadata document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataConfig {
    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default = "default_container")]
    pub container: String,
}

/// One exposed entity set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySetConfig {
    /// Name used in URLs
    pub name: String,

    /// Backing collection; defaults to `name`
    #[serde(default)]
    pub collection: Option<String>,

    /// Key property (default: "id", which maps onto `_id`)
    #[serde(default = "default_key")]
    pub key: String,

    /// Entity type name; defaults to `name` without its last character
    #[serde(default)]
    pub entity_type: Option<String>,

    /// Explicit property list for the metadata document
    #[serde(default)]
    pub properties: Option<Vec<PropertyMetadata>>,

    /// JSON schema to infer properties from when no list is given
    #[serde(default)]
    pub json_schema: Option<Value>,

    #[serde(default)]
    pub expand_map: HashMap<String, JoinSpec>,

    #[serde(default)]
    pub limits: Limits,

    #[serde(default)]
    pub security: SecurityPolicy,

    #[serde(default)]
    pub search_fields: Vec<String>,

    /// Normalize date fields in query results
    #[serde(default)]
    pub date_coercion: Option<DateCoercion>,

    /// Documents loaded into the collection at startup
    #[serde(default)]
    pub seed: Vec<Value>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_base_path() -> String {
    "/odata".to_string()
}

fn default_change_field() -> String {
    DEFAULT_CHANGE_FIELD.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_namespace() -> String {
    "Default".to_string()
}

fn default_container() -> String {
    "Container".to_string()
}

fn default_key() -> String {
    "id".to_string()
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            container: default_container(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            base_path: default_base_path(),
            cors_origins: Vec::new(),
            metadata: MetadataConfig::default(),
            change_field: default_change_field(),
            log_level: default_log_level(),
            log_json: false,
            entity_sets: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Parse a JSON configuration document
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Get the socket address string
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Base path without a trailing slash
    pub fn normalized_base(&self) -> &str {
        self.base_path.trim_end_matches('/')
    }

    pub fn entity_set(&self, name: &str) -> Option<&EntitySetConfig> {
        self.entity_sets.iter().find(|set| set.name == name)
    }
}

impl EntitySetConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collection: None,
            key: default_key(),
            entity_type: None,
            properties: None,
            json_schema: None,
            expand_map: HashMap::new(),
            limits: Limits::default(),
            security: SecurityPolicy::default(),
            search_fields: Vec::new(),
            date_coercion: None,
            seed: Vec::new(),
        }
    }

    pub fn collection_name(&self) -> &str {
        self.collection.as_deref().unwrap_or(&self.name)
    }

    pub fn entity_type_name(&self) -> String {
        if let Some(name) = &self.entity_type {
            return name.clone();
        }
        let mut chars = self.name.chars();
        chars.next_back();
        let trimmed = chars.as_str();
        if trimmed.is_empty() {
            "Entity".to_string()
        } else {
            trimmed.to_string()
        }
    }

    /// `id` is exposed to callers in place of the storage identity field
    pub fn field_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        if self.key == "id" {
            map.insert("id".to_string(), IDENTITY_FIELD.to_string());
        }
        map
    }

    /// Explicit properties, else inferred from the schema, else the key alone
    pub fn resolved_properties(&self) -> Vec<PropertyMetadata> {
        self.properties
            .clone()
            .or_else(|| {
                self.json_schema
                    .as_ref()
                    .and_then(infer_properties_from_json_schema)
            })
            .unwrap_or_else(|| vec![PropertyMetadata::required(&self.key, "Edm.String")])
    }

    /// Execution configuration for requests against this set
    pub fn execution_config(&self, base_url: Option<String>) -> ExecutionConfig {
        ExecutionConfig {
            expand_map: self.expand_map.clone(),
            limits: self.limits.clone(),
            security: self.security.clone(),
            field_map: self.field_map(),
            search: SearchConfig {
                fields: self.search_fields.clone(),
            },
            base_url,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.socket_addr(), "0.0.0.0:8080");
        assert_eq!(config.base_path, "/odata");
        assert_eq!(config.change_field, "_updatedAtMs");
        assert_eq!(config.metadata.namespace, "Default");
    }

    #[test]
    fn test_parse_with_defaults() {
        let config = ServerConfig::from_json(
            r#"{
                "base_path": "/api/",
                "entity_sets": [
                    { "name": "Orders", "collection": "orders", "search_fields": ["name"] }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(config.normalized_base(), "/api");
        let set = config.entity_set("Orders").unwrap();
        assert_eq!(set.collection_name(), "orders");
        assert_eq!(set.key, "id");
        assert_eq!(set.entity_type_name(), "Order");
        assert_eq!(set.field_map().get("id").map(String::as_str), Some("_id"));
    }

    #[test]
    fn test_parse_date_coercion() {
        let config = ServerConfig::from_json(
            r#"{
                "entity_sets": [
                    { "name": "Orders", "date_coercion": { "fields": ["shipped"], "formats": ["MM/DD/YYYY"] } },
                    { "name": "Items" }
                ]
            }"#,
        )
        .unwrap();

        let coercion = config.entity_set("Orders").unwrap().date_coercion.as_ref().unwrap();
        assert_eq!(coercion.fields, vec!["shipped"]);
        assert_eq!(coercion.formats, vec![crate::coercion::DateFormat::MonthDayYear]);
        assert!(config.entity_set("Items").unwrap().date_coercion.is_none());
    }

    #[test]
    fn test_execution_config_from_entity_set() {
        let mut set = EntitySetConfig::new("Items");
        set.key = "sku".to_string();
        set.search_fields = vec!["name".to_string()];

        let config = set.execution_config(Some("http://host/odata/Items".to_string()));
        assert!(config.field_map.is_empty());
        assert_eq!(config.search.fields, vec!["name"]);
        assert_eq!(config.base_url.as_deref(), Some("http://host/odata/Items"));
    }

    #[test]
    fn test_properties_fall_back_to_key() {
        let set = EntitySetConfig::new("X");
        assert_eq!(set.entity_type_name(), "Entity");
        let props = set.resolved_properties();
        assert_eq!(props.len(), 1);
        assert_eq!(props[0].name, "id");
        assert!(!props[0].nullable);
    }
}
