//! # Query Parser
//!
//! Parses OData system query options into a [`QueryDescription`].
//!
//! Unlike the filter compiler, nothing here can fail: values that do not
//! parse leave their field unset and the feature is skipped downstream.

use std::sync::OnceLock;

use regex::Regex;

use super::compute::ComputeClause;
use super::description::{
    Aggregate, AggregateOp, ApplyClause, ExpandRequest, FilterInput, OrderByField,
    QueryDescription, SortDirection,
};
use super::params::QueryParams;

/// Substrings in `$filter` naming functions the grammar does not fully support.
///
/// Each marker found is reported once, in this order.
pub const UNSUPPORTED_FILTER_MARKERS: &[&str] = &[
    "geo.",
    "startswith(",
    "endswith(",
    "substring(",
    "tolower(",
    "toupper(",
    "round(",
    "floor(",
    "ceiling(",
];

/// Turns a raw request URL into a query description
pub trait QueryParser: Send + Sync {
    fn parse(&self, raw_url: &str) -> QueryDescription;
}

/// Parser for the supported OData v4 subset
#[derive(Debug, Clone, Copy, Default)]
pub struct ODataParser;

impl ODataParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse already-decoded parameters
    pub fn parse_params(&self, params: &QueryParams) -> QueryDescription {
        let raw_filter = params.get_non_empty("$filter").map(str::to_string);
        let unimplemented_functions = raw_filter
            .as_deref()
            .map(scan_unsupported)
            .unwrap_or_default();

        QueryDescription {
            top: params.get("$top").and_then(parse_non_negative),
            skip: params.get("$skip").and_then(parse_non_negative),
            filter: raw_filter.map(FilterInput::Raw),
            order_by: params.get("$orderby").map(parse_order_by).unwrap_or_default(),
            select: params.get("$select").map(parse_list).unwrap_or_default(),
            expand: params
                .get("$expand")
                .map(|v| {
                    parse_list(v)
                        .into_iter()
                        .map(|path| ExpandRequest { path })
                        .collect()
                })
                .unwrap_or_default(),
            count: params.get("$count").and_then(parse_flag),
            search: params.get_non_empty("$search").map(str::to_string),
            apply: params.get("$apply").and_then(parse_apply),
            compute: params
                .get("$compute")
                .map(ComputeClause::parse_list)
                .unwrap_or_default(),
            unimplemented_functions,
        }
    }
}

impl QueryParser for ODataParser {
    fn parse(&self, raw_url: &str) -> QueryDescription {
        self.parse_params(&QueryParams::from_url(raw_url))
    }
}

fn parse_non_negative(value: &str) -> Option<u64> {
    value.trim().parse().ok()
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

/// Comma-separated, trimmed, empty tokens dropped
fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// `field [asc|desc]` entries; direction defaults to ascending
fn parse_order_by(value: &str) -> Vec<OrderByField> {
    value
        .split(',')
        .filter_map(|item| {
            let mut parts = item.split_whitespace();
            let field = parts.next()?;
            let direction = match parts.next() {
                Some(d) if d.eq_ignore_ascii_case("desc") => SortDirection::Desc,
                _ => SortDirection::Asc,
            };
            Some(OrderByField {
                field: field.to_string(),
                direction,
            })
        })
        .collect()
}

fn apply_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)groupby\(\(([^)]+)\),aggregate\(([^)]+)\)\)").expect("static regex")
    })
}

fn aggregate_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)(\w+)\s+with\s+(sum|avg|min|max|count)\s+as\s+(\w+)").expect("static regex")
    })
}

/// `groupby((f1,f2),aggregate(src with op as alias))`; one aggregate clause
fn parse_apply(value: &str) -> Option<ApplyClause> {
    let caps = apply_pattern().captures(value)?;
    let group_by = parse_list(&caps[1]);

    let agg = aggregate_pattern().captures(&caps[2])?;
    let op = AggregateOp::parse(&agg[2])?;

    Some(ApplyClause {
        group_by,
        aggregates: vec![Aggregate {
            source: agg[1].to_string(),
            op,
            alias: agg[3].to_string(),
        }],
    })
}

fn scan_unsupported(filter: &str) -> Vec<String> {
    UNSUPPORTED_FILTER_MARKERS
        .iter()
        .filter(|marker| filter.contains(*marker))
        .map(|marker| marker.to_string())
        .collect()
}
