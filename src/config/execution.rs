//! Execution Configuration
//!
//! Supplied by the caller on every call. The data parts deserialize from
//! JSON; hooks and the filter transform are attached in code.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ODataError;
use crate::query::QueryDescription;

/// Hard page-size ceiling when none is configured
pub const DEFAULT_MAX_TOP: u64 = 1000;

/// One `$expand` target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinSpec {
    /// Source collection to join from
    pub from: String,

    /// Field on this collection (dotted paths reach into earlier joins)
    pub local_field: String,

    /// Field on the source collection
    pub foreign_field: String,

    /// Output field; defaults to `from`
    #[serde(default)]
    pub alias: Option<String>,

    /// Flatten the joined array to a single object (to-one cardinality)
    #[serde(default)]
    pub single: bool,
}

impl JoinSpec {
    pub fn output_field(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.from)
    }
}

/// Page-size limits
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    /// Hard maximum page size (default: 1000)
    #[serde(default)]
    pub max_top: Option<u64>,

    /// Page size when `$top` is absent (default: unlimited)
    #[serde(default)]
    pub default_page_size: Option<u64>,
}

impl Limits {
    pub fn hard_max(&self) -> u64 {
        self.max_top.unwrap_or(DEFAULT_MAX_TOP)
    }
}

/// Filter security policy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityPolicy {
    /// Operator keys a compiled filter may use; `None` allows all
    #[serde(default)]
    pub allowed_operators: Option<Vec<String>>,

    /// Maximum raw `$filter` length in bytes
    #[serde(default)]
    pub max_filter_length: Option<usize>,
}

/// Free-text search configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Fields matched case-insensitively by `$search`
    #[serde(default)]
    pub fields: Vec<String>,
}

/// Passed to the on-executed hook
#[derive(Debug, Clone, Copy)]
pub struct ExecutionInfo<'a> {
    pub query: &'a QueryDescription,
    pub duration_ms: u64,
    pub result_count: usize,
}

pub type ParsedHook = Arc<dyn Fn(&QueryDescription) + Send + Sync>;
pub type ExecutedHook = Arc<dyn Fn(&ExecutionInfo<'_>) + Send + Sync>;
pub type ErrorHook = Arc<dyn Fn(&ODataError) + Send + Sync>;
pub type FilterTransform = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Lifecycle hooks
#[derive(Clone, Default)]
pub struct Hooks {
    pub on_parsed: Option<ParsedHook>,
    pub on_executed: Option<ExecutedHook>,
    pub on_error: Option<ErrorHook>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("on_parsed", &self.on_parsed.is_some())
            .field("on_executed", &self.on_executed.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Per-call execution configuration
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// `$expand` path → join
    #[serde(default)]
    pub expand_map: HashMap<String, JoinSpec>,

    #[serde(default)]
    pub limits: Limits,

    #[serde(default)]
    pub security: SecurityPolicy,

    /// Caller-facing field name → storage field name
    #[serde(default)]
    pub field_map: HashMap<String, String>,

    #[serde(default)]
    pub search: SearchConfig,

    /// Base URL for continuation links
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(skip)]
    pub hooks: Hooks,

    /// Applied to every compiled raw filter, after remapping
    #[serde(skip)]
    pub filter_transform: Option<FilterTransform>,
}

impl ExecutionConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_join(mut self, path: impl Into<String>, join: JoinSpec) -> Self {
        self.expand_map.insert(path.into(), join);
        self
    }

    pub fn with_search_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.search.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }
}

impl fmt::Debug for ExecutionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionConfig")
            .field("expand_map", &self.expand_map)
            .field("limits", &self.limits)
            .field("security", &self.security)
            .field("field_map", &self.field_map)
            .field("search", &self.search)
            .field("base_url", &self.base_url)
            .field("hooks", &self.hooks)
            .field("filter_transform", &self.filter_transform.is_some())
            .finish()
    }
}
