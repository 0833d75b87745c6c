//! # Filter Compilation
//!
//! Every rejection is a `BadRequest`. An absent filter is the empty
//! predicate, which matches every row.

use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value};

use super::grammar::FilterGrammar;
use crate::config::ExecutionConfig;
use crate::errors::{ODataError, ODataResult};
use crate::query::FilterInput;

/// Prefix marking operator keys in a predicate tree
pub const OPERATOR_SIGIL: char = '$';

/// Compiles filters against one execution config
pub struct FilterCompiler<'a> {
    grammar: &'a dyn FilterGrammar,
    config: &'a ExecutionConfig,
}

impl<'a> FilterCompiler<'a> {
    pub fn new(grammar: &'a dyn FilterGrammar, config: &'a ExecutionConfig) -> Self {
        Self { grammar, config }
    }

    /// Compile a filter into a native predicate.
    ///
    /// Pre-built trees are trusted and returned as supplied.
    pub fn compile(&self, filter: Option<&FilterInput>) -> ODataResult<Value> {
        match filter {
            None => Ok(empty_predicate()),
            Some(FilterInput::Tree(tree)) => Ok(tree.clone()),
            Some(FilterInput::Raw(raw)) if raw.trim().is_empty() => Ok(empty_predicate()),
            Some(FilterInput::Raw(raw)) => self.compile_raw(raw),
        }
    }

    fn compile_raw(&self, raw: &str) -> ODataResult<Value> {
        let security = &self.config.security;

        if let Some(max) = security.max_filter_length {
            if raw.len() > max {
                return Err(ODataError::bad_request(format!(
                    "Invalid $filter: length {} exceeds maximum {}",
                    raw.len(),
                    max
                )));
            }
        }

        let mut tree = self
            .grammar
            .parse(raw)
            .map_err(|e| ODataError::bad_request(format!("Invalid $filter: {}", e)))?;

        if let Some(allowed) = &security.allowed_operators {
            let allowed: HashSet<&str> = allowed.iter().map(String::as_str).collect();
            if let Some(op) = first_disallowed(&tree, &allowed) {
                return Err(ODataError::bad_request(format!(
                    "Invalid $filter: operator {} not allowed",
                    op
                )));
            }
        }

        if !self.config.field_map.is_empty() {
            apply_field_map(&mut tree, &self.config.field_map);
        }

        Ok(match &self.config.filter_transform {
            Some(transform) => transform(tree),
            None => tree,
        })
    }
}

/// The predicate that matches everything
pub fn empty_predicate() -> Value {
    Value::Object(Map::new())
}

/// True when every operator key, at every depth, is in `allowed`
pub fn is_filter_allowed(node: &Value, allowed: &HashSet<&str>) -> bool {
    first_disallowed(node, allowed).is_none()
}

fn first_disallowed(node: &Value, allowed: &HashSet<&str>) -> Option<String> {
    match node {
        Value::Object(map) => map.iter().find_map(|(key, val)| {
            if key.starts_with(OPERATOR_SIGIL) && !allowed.contains(key.as_str()) {
                return Some(key.clone());
            }
            first_disallowed(val, allowed)
        }),
        Value::Array(items) => items.iter().find_map(|v| first_disallowed(v, allowed)),
        _ => None,
    }
}

/// Rename caller-facing field keys to storage names, recursively.
///
/// Operator keys are never renamed but their contents are visited.
pub fn apply_field_map(node: &mut Value, field_map: &HashMap<String, String>) {
    match node {
        Value::Object(map) => {
            let entries = std::mem::take(map);
            for (key, mut val) in entries {
                apply_field_map(&mut val, field_map);
                let key = if key.starts_with(OPERATOR_SIGIL) {
                    key
                } else {
                    field_map.get(&key).cloned().unwrap_or(key)
                };
                map.insert(key, val);
            }
        }
        Value::Array(items) => {
            for item in items {
                apply_field_map(item, field_map);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SecurityPolicy;
    use crate::filter::grammar::ODataFilterGrammar;
    use serde_json::json;
    use std::sync::Arc;

    fn compile(filter: &str, config: &ExecutionConfig) -> ODataResult<Value> {
        FilterCompiler::new(&ODataFilterGrammar, config)
            .compile(Some(&FilterInput::Raw(filter.to_string())))
    }

    fn restricted(ops: &[&str]) -> ExecutionConfig {
        ExecutionConfig {
            security: SecurityPolicy {
                allowed_operators: Some(ops.iter().map(|s| s.to_string()).collect()),
                max_filter_length: None,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_absent_filter_matches_everything() {
        let config = ExecutionConfig::default();
        let compiled = FilterCompiler::new(&ODataFilterGrammar, &config)
            .compile(None)
            .unwrap();
        assert_eq!(compiled, json!({}));
    }

    #[test]
    fn test_too_long_filter_rejected() {
        let config = ExecutionConfig {
            security: SecurityPolicy {
                allowed_operators: None,
                max_filter_length: Some(16),
            },
            ..Default::default()
        };
        let long = format!("contains(name,'{}')", "x".repeat(64));
        let err = compile(&long, &config).unwrap_err();
        assert_eq!(err.code(), "BadRequest");
    }

    #[test]
    fn test_grammar_failure_is_bad_request() {
        let err = compile("name eq", &ExecutionConfig::default()).unwrap_err();
        assert!(matches!(err, ODataError::BadRequest(_)));
    }

    #[test]
    fn test_allow_list_rejects_regex() {
        let config = restricted(&["$and", "$or", "$eq", "$gt"]);
        let err = compile("contains(name,'lp')", &config).unwrap_err();
        assert!(matches!(err, ODataError::BadRequest(_)));
        assert!(compile("price gt 5", &config).is_ok());
    }

    #[test]
    fn test_allow_list_checks_nested_operators() {
        let config = restricted(&["$and", "$or"]);
        assert!(compile("a eq 1 or (b eq 2 and c gt 3)", &config).is_err());
        assert!(compile("a eq 1 or (b eq 2 and c eq 3)", &config).is_ok());
    }

    #[test]
    fn test_field_map_renames_fields_not_operators() {
        let mut config = ExecutionConfig::default();
        config.field_map.insert("id".to_string(), "_id".to_string());
        let compiled = compile("id eq 1 or id gt 5", &config).unwrap();
        assert_eq!(compiled, json!({"$or": [{"_id": 1}, {"_id": {"$gt": 5}}]}));
    }

    #[test]
    fn test_post_transform_applied_last() {
        let config = ExecutionConfig {
            filter_transform: Some(Arc::new(|tree| json!({"$and": [tree, {"tenant": "t1"}]}))),
            ..Default::default()
        };
        let compiled = compile("a eq 1", &config).unwrap();
        assert_eq!(compiled, json!({"$and": [{"a": 1}, {"tenant": "t1"}]}));
    }

    #[test]
    fn test_tree_filter_passes_through() {
        let config = restricted(&[]);
        let tree = json!({"price": {"$gt": 1}});
        let compiled = FilterCompiler::new(&ODataFilterGrammar, &config)
            .compile(Some(&FilterInput::Tree(tree.clone())))
            .unwrap();
        assert_eq!(compiled, tree);
    }
}
