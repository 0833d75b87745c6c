//! Batch wire types

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ODataError;

/// `{ requests: [...] }`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchRequest {
    #[serde(default)]
    pub requests: Vec<BatchOperation>,
}

/// One sub-request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchOperation {
    /// HTTP method; GET when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    #[serde(default)]
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,

    /// Changeset id; operations sharing one are validated together
    #[serde(
        rename = "atomicGroup",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub atomic_group: Option<String>,
}

impl BatchOperation {
    pub fn new(method: &str, url: impl Into<String>) -> Self {
        Self {
            method: Some(method.to_string()),
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.atomic_group = Some(group.into());
        self
    }

    /// Upper-cased method name
    pub fn method_name(&self) -> String {
        self.method
            .as_deref()
            .unwrap_or("GET")
            .to_ascii_uppercase()
    }

    pub fn method(&self) -> Result<Method, ODataError> {
        Method::parse(&self.method_name())
    }

    /// `_id` from the request body, if any
    pub fn body_id(&self, key_field: &str) -> Option<Value> {
        self.body
            .as_ref()
            .and_then(|b| b.get(key_field))
            .filter(|id| !id.is_null())
            .cloned()
    }

    /// The group id, treating an empty string as ungrouped
    pub fn group(&self) -> Option<&str> {
        self.atomic_group.as_deref().filter(|g| !g.is_empty())
    }
}

/// Methods understood inside a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Patch,
    Delete,
}

impl Method {
    pub fn parse(name: &str) -> Result<Self, ODataError> {
        match name {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            other => Err(ODataError::bad_request(format!(
                "Unsupported method {}",
                other
            ))),
        }
    }

    pub fn is_mutation(&self) -> bool {
        !matches!(self, Method::Get)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// `{ responses: [...] }`, one entry per ungrouped operation then one per changeset
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResponse {
    pub responses: Vec<OperationResponse>,
}

/// `{ status, body }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResponse {
    pub status: u16,
    pub body: Value,
}

impl OperationResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    pub fn no_content() -> Self {
        Self::new(204, Value::Null)
    }

    pub fn error(err: &ODataError) -> Self {
        Self::new(err.status_code().as_u16(), err.to_body())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

fn key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?:/([\w-]+)|\(\s*'?([\w-]+)'?\s*\))/?$").expect("static regex")
    })
}

/// Key segment following an entity set path: `/5`, `(5)` or `('abc')`
pub fn key_from_path(rest: &str) -> Option<Value> {
    let path = rest.split('?').next().unwrap_or_default();
    let caps = key_pattern().captures(path)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .map(|m| cast_id(m.as_str()))
}

/// Numeric-looking ids match as numbers, anything else as strings
pub fn cast_id(raw: &str) -> Value {
    if let Ok(n) = raw.parse::<i64>() {
        return Value::from(n);
    }
    match raw.parse::<f64>() {
        Ok(f) if f.is_finite() => Value::from(f),
        _ => Value::String(raw.to_string()),
    }
}
