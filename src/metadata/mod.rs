//! # Metadata Document
//!
//! Renders the CSDL v4 `$metadata` document for the exposed entity sets,
//! and infers EDM properties from a JSON schema.

use std::collections::HashSet;
use std::fmt::Write;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One EDM property
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyMetadata {
    pub name: String,

    /// EDM type name, e.g. `Edm.String`
    #[serde(rename = "type")]
    pub edm_type: String,

    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

impl PropertyMetadata {
    pub fn new(name: impl Into<String>, edm_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            edm_type: edm_type.into(),
            nullable: true,
        }
    }

    pub fn required(name: impl Into<String>, edm_type: impl Into<String>) -> Self {
        Self {
            nullable: false,
            ..Self::new(name, edm_type)
        }
    }
}

/// Entity type plus the set exposing it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySetMetadata {
    pub entity_set: String,
    pub entity_type: String,
    pub key: String,
    pub properties: Vec<PropertyMetadata>,
}

/// A complete metadata document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataDocument {
    pub namespace: String,
    pub container: String,
    pub entity_sets: Vec<EntitySetMetadata>,
}

impl MetadataDocument {
    pub fn new(namespace: impl Into<String>, container: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            container: container.into(),
            entity_sets: Vec::new(),
        }
    }

    pub fn with_entity_set(mut self, set: EntitySetMetadata) -> Self {
        self.entity_sets.push(set);
        self
    }

    /// Render CSDL XML
    pub fn to_xml(&self) -> String {
        let ns = escape(&self.namespace);
        let mut xml = String::new();

        xml.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
        xml.push_str(
            "<edmx:Edmx Version=\"4.0\" xmlns:edmx=\"http://docs.oasis-open.org/odata/ns/edmx\">\n",
        );
        xml.push_str("  <edmx:DataServices>\n");
        let _ = writeln!(
            xml,
            "    <Schema Namespace=\"{}\" xmlns=\"http://docs.oasis-open.org/odata/ns/edm\">",
            ns
        );

        for set in &self.entity_sets {
            let _ = writeln!(xml, "      <EntityType Name=\"{}\">", escape(&set.entity_type));
            xml.push_str("        <Key>\n");
            let _ = writeln!(xml, "          <PropertyRef Name=\"{}\" />", escape(&set.key));
            xml.push_str("        </Key>\n");
            for prop in &set.properties {
                let _ = writeln!(
                    xml,
                    "        <Property Name=\"{}\" Type=\"{}\"{} />",
                    escape(&prop.name),
                    escape(&prop.edm_type),
                    if prop.nullable { "" } else { " Nullable=\"false\"" }
                );
            }
            xml.push_str("      </EntityType>\n");
        }

        let _ = writeln!(xml, "      <EntityContainer Name=\"{}\">", escape(&self.container));
        for set in &self.entity_sets {
            let _ = writeln!(
                xml,
                "        <EntitySet Name=\"{}\" EntityType=\"{}.{}\" />",
                escape(&set.entity_set),
                ns,
                escape(&set.entity_type)
            );
        }
        xml.push_str("      </EntityContainer>\n");
        xml.push_str("    </Schema>\n");
        xml.push_str("  </edmx:DataServices>\n");
        xml.push_str("</edmx:Edmx>");
        xml
    }
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Map a JSON schema's top-level properties to EDM properties
///
/// Properties with no EDM equivalent are skipped; `None` when nothing maps.
pub fn infer_properties_from_json_schema(schema: &Value) -> Option<Vec<PropertyMetadata>> {
    let properties = schema.get("properties")?.as_object()?;
    let required: HashSet<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let props: Vec<PropertyMetadata> = properties
        .iter()
        .filter_map(|(name, prop)| {
            let edm_type = json_type_to_edm(prop)?;
            Some(PropertyMetadata {
                name: name.clone(),
                edm_type: edm_type.to_string(),
                nullable: !required.contains(name.as_str()),
            })
        })
        .collect();

    (!props.is_empty()).then_some(props)
}

fn json_type_to_edm(prop: &Value) -> Option<&'static str> {
    let ty = match prop.get("type")? {
        Value::Array(types) => types.first()?.as_str()?,
        other => other.as_str()?,
    };
    let format = prop.get("format").and_then(Value::as_str);

    match ty {
        "string" => Some(match format {
            Some("date-time") => "Edm.DateTimeOffset",
            Some("uuid") => "Edm.Guid",
            _ => "Edm.String",
        }),
        "integer" => Some("Edm.Int32"),
        "number" => Some("Edm.Double"),
        "boolean" => Some("Edm.Boolean"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_infer_from_json_schema() {
        let schema = json!({
            "type": "object",
            "required": ["_id", "name"],
            "properties": {
                "_id": { "type": "string", "format": "uuid" },
                "name": { "type": "string" },
                "total": { "type": ["number", "null"] },
                "qty": { "type": "integer" },
                "active": { "type": "boolean" },
                "createdAt": { "type": "string", "format": "date-time" },
                "tags": { "type": "array" }
            }
        });

        let props = infer_properties_from_json_schema(&schema).unwrap();
        let find = |n: &str| props.iter().find(|p| p.name == n).cloned();

        assert_eq!(find("_id"), Some(PropertyMetadata::required("_id", "Edm.Guid")));
        assert_eq!(find("name"), Some(PropertyMetadata::required("name", "Edm.String")));
        assert_eq!(find("total"), Some(PropertyMetadata::new("total", "Edm.Double")));
        assert_eq!(find("qty").unwrap().edm_type, "Edm.Int32");
        assert_eq!(find("active").unwrap().edm_type, "Edm.Boolean");
        assert_eq!(find("createdAt").unwrap().edm_type, "Edm.DateTimeOffset");
        assert!(find("tags").is_none());
    }

    #[test]
    fn test_schema_without_properties() {
        assert!(infer_properties_from_json_schema(&json!({"type": "object"})).is_none());
        assert!(infer_properties_from_json_schema(&json!({"properties": {"x": {"type": "array"}}})).is_none());
    }

    #[test]
    fn test_xml_document() {
        let doc = MetadataDocument::new("Sales", "Main").with_entity_set(EntitySetMetadata {
            entity_set: "Orders".to_string(),
            entity_type: "Order".to_string(),
            key: "id".to_string(),
            properties: vec![
                PropertyMetadata::required("id", "Edm.String"),
                PropertyMetadata::new("total", "Edm.Double"),
            ],
        });

        let xml = doc.to_xml();
        assert!(xml.starts_with("<?xml version=\"1.0\""));
        assert!(xml.contains("<Schema Namespace=\"Sales\""));
        assert!(xml.contains("<PropertyRef Name=\"id\" />"));
        assert!(xml.contains("<Property Name=\"id\" Type=\"Edm.String\" Nullable=\"false\" />"));
        assert!(xml.contains("<Property Name=\"total\" Type=\"Edm.Double\" />"));
        assert!(xml.contains("<EntityContainer Name=\"Main\">"));
        assert!(xml.contains("<EntitySet Name=\"Orders\" EntityType=\"Sales.Order\" />"));
    }
}
