//! # Query Description
//!
//! The structured, typed form of an OData query. Every field is optional;
//! an empty description means "default page, no filter".

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::compute::ComputeClause;

/// Sort direction for `$orderby`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `$orderby` entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderByField {
    pub field: String,
    pub direction: SortDirection,
}

impl OrderByField {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// One `$expand` path, resolved later through the caller's join map
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpandRequest {
    pub path: String,
}

/// Filter as supplied by the caller
///
/// Raw strings come from `$filter` and go through the grammar; trees are
/// pre-built native predicates supplied programmatically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterInput {
    Raw(String),
    Tree(Value),
}

impl FilterInput {
    /// The raw filter text, if this filter came from a query string
    pub fn as_raw(&self) -> Option<&str> {
        match self {
            FilterInput::Raw(s) => Some(s),
            FilterInput::Tree(_) => None,
        }
    }
}

/// Aggregation operators recognized by `$apply`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateOp {
    Sum,
    Avg,
    Min,
    Max,
    Count,
}

impl AggregateOp {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sum" => Some(AggregateOp::Sum),
            "avg" => Some(AggregateOp::Avg),
            "min" => Some(AggregateOp::Min),
            "max" => Some(AggregateOp::Max),
            "count" => Some(AggregateOp::Count),
            _ => None,
        }
    }
}

/// `<source> with <op> as <alias>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregate {
    pub source: String,
    pub op: AggregateOp,
    pub alias: String,
}

/// `groupby((f1,f2),aggregate(...))`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyClause {
    pub group_by: Vec<String>,
    pub aggregates: Vec<Aggregate>,
}

impl ApplyClause {
    /// A clause is usable only with at least one key and one aggregate
    pub fn is_usable(&self) -> bool {
        !self.group_by.is_empty() && !self.aggregates.is_empty()
    }
}

/// Structured query description
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryDescription {
    /// Page size cap as requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top: Option<u64>,

    /// Offset as requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterInput>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order_by: Vec<OrderByField>,

    /// Empty means "select all"
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub select: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expand: Vec<ExpandRequest>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub apply: Option<ApplyClause>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub compute: Vec<ComputeClause>,

    /// Advisory: functions named in `$filter` that are not fully supported
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unimplemented_functions: Vec<String>,
}

impl QueryDescription {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_top(mut self, top: u64) -> Self {
        self.top = Some(top);
        self
    }

    pub fn with_skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(FilterInput::Raw(filter.into()));
        self
    }

    pub fn with_filter_tree(mut self, tree: Value) -> Self {
        self.filter = Some(FilterInput::Tree(tree));
        self
    }

    pub fn with_order_by(mut self, order: OrderByField) -> Self {
        self.order_by.push(order);
        self
    }

    pub fn with_select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_expand(mut self, path: impl Into<String>) -> Self {
        self.expand.push(ExpandRequest { path: path.into() });
        self
    }

    pub fn with_count(mut self, count: bool) -> Self {
        self.count = Some(count);
        self
    }

    pub fn with_search(mut self, term: impl Into<String>) -> Self {
        self.search = Some(term.into());
        self
    }

    /// The raw `$filter` text, if any
    pub fn raw_filter(&self) -> Option<&str> {
        self.filter.as_ref().and_then(FilterInput::as_raw)
    }

    /// The usable `$apply` clause, if any
    pub fn usable_apply(&self) -> Option<&ApplyClause> {
        self.apply.as_ref().filter(|a| a.is_usable())
    }
}
