//! Predicate matching
//!
//! Evaluates document-store predicate trees against documents: field
//! equality (arrays match when any element equals), comparison operators,
//! set membership, existence, regular expressions, and the `$and` / `$or`
//! / `$nor` combinators.

use std::cmp::Ordering;

use regex::RegexBuilder;
use serde_json::{Map, Value};

use super::value::{compare_comparable, get_path, values_equal};
use crate::errors::{ODataError, ODataResult};

/// Evaluates predicate trees against documents
pub struct PredicateMatcher;

impl PredicateMatcher {
    /// Checks if a document matches the predicate. `{}` matches everything.
    ///
    /// Fails only on a malformed predicate (unknown operator, bad regex).
    pub fn matches(doc: &Value, predicate: &Value) -> ODataResult<bool> {
        match predicate {
            Value::Object(clauses) => Self::matches_all(doc, clauses),
            Value::Null => Ok(true),
            other => Err(ODataError::server(format!(
                "predicate must be an object, got {}",
                other
            ))),
        }
    }

    fn matches_all(doc: &Value, clauses: &Map<String, Value>) -> ODataResult<bool> {
        for (key, condition) in clauses {
            let matched = match key.as_str() {
                "$and" => Self::combinator(doc, condition)?.iter().all(|m| *m),
                "$or" => Self::combinator(doc, condition)?.iter().any(|m| *m),
                "$nor" => !Self::combinator(doc, condition)?.iter().any(|m| *m),
                op if op.starts_with('$') => {
                    return Err(ODataError::server(format!("unknown top-level operator {}", op)))
                }
                field => Self::matches_field(get_path(doc, field), condition)?,
            };
            if !matched {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn combinator(doc: &Value, terms: &Value) -> ODataResult<Vec<bool>> {
        let terms = terms
            .as_array()
            .ok_or_else(|| ODataError::server("combinator expects an array"))?;
        terms.iter().map(|t| Self::matches(doc, t)).collect()
    }

    fn matches_field(actual: Option<&Value>, condition: &Value) -> ODataResult<bool> {
        match condition {
            Value::Object(ops) if is_operator_object(ops) => {
                for (op, operand) in ops {
                    if !Self::matches_operator(actual, op, operand, ops)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            expected => Ok(equals(actual, expected)),
        }
    }

    fn matches_operator(
        actual: Option<&Value>,
        op: &str,
        operand: &Value,
        siblings: &Map<String, Value>,
    ) -> ODataResult<bool> {
        Ok(match op {
            "$eq" => equals(actual, operand),
            "$ne" => !equals(actual, operand),
            "$gt" => compare(actual, operand, |o| o == Ordering::Greater),
            "$gte" => compare(actual, operand, |o| o != Ordering::Less),
            "$lt" => compare(actual, operand, |o| o == Ordering::Less),
            "$lte" => compare(actual, operand, |o| o != Ordering::Greater),
            "$in" => set_members(operand)?.iter().any(|v| equals(actual, v)),
            "$nin" => !set_members(operand)?.iter().any(|v| equals(actual, v)),
            "$exists" => actual.is_some() == operand.as_bool().unwrap_or(true),
            "$regex" => {
                let options = siblings.get("$options").and_then(Value::as_str).unwrap_or("");
                regex_match(actual, operand, options)?
            }
            // Consumed by $regex
            "$options" => true,
            "$not" => !Self::matches_field(actual, operand)?,
            other => return Err(ODataError::server(format!("unknown operator {}", other))),
        })
    }
}

fn is_operator_object(map: &Map<String, Value>) -> bool {
    !map.is_empty() && map.keys().all(|k| k.starts_with('$'))
}

/// Missing fields equal `null`; arrays match when any element equals
fn equals(actual: Option<&Value>, expected: &Value) -> bool {
    match actual {
        None => expected.is_null(),
        Some(value) => {
            values_equal(value, expected)
                || matches!(value, Value::Array(items) if items.iter().any(|i| values_equal(i, expected)))
        }
    }
}

fn compare(actual: Option<&Value>, bound: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    let Some(value) = actual else {
        return false;
    };
    let check = |v: &Value| compare_comparable(v, bound).is_some_and(&accept);
    match value {
        Value::Array(items) => items.iter().any(check),
        v => check(v),
    }
}

fn set_members(operand: &Value) -> ODataResult<&Vec<Value>> {
    operand
        .as_array()
        .ok_or_else(|| ODataError::server("$in/$nin expects an array"))
}

fn regex_match(actual: Option<&Value>, pattern: &Value, options: &str) -> ODataResult<bool> {
    let pattern = pattern
        .as_str()
        .ok_or_else(|| ODataError::server("$regex expects a string"))?;
    let re = RegexBuilder::new(pattern)
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .build()
        .map_err(|e| ODataError::server(format!("invalid $regex: {}", e)))?;

    Ok(match actual {
        Some(Value::String(s)) => re.is_match(s),
        Some(Value::Array(items)) => items
            .iter()
            .any(|i| i.as_str().is_some_and(|s| re.is_match(s))),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn matches(doc: Value, predicate: Value) -> bool {
        PredicateMatcher::matches(&doc, &predicate).unwrap()
    }

    #[test]
    fn test_empty_predicate_matches_all() {
        assert!(matches(json!({"a": 1}), json!({})));
    }

    #[test]
    fn test_equality_match() {
        let doc = json!({"name": "Alice", "age": 30, "tags": ["x", "y"]});
        assert!(matches(doc.clone(), json!({"name": "Alice"})));
        assert!(!matches(doc.clone(), json!({"name": "Bob"})));
        assert!(matches(doc.clone(), json!({"age": 30.0})));
        assert!(matches(doc.clone(), json!({"tags": "y"})));
        assert!(matches(doc, json!({"missing": null})));
    }

    #[test]
    fn test_no_type_coercion() {
        assert!(!matches(json!({"value": 123}), json!({"value": "123"})));
        assert!(!matches(json!({"value": 123}), json!({"value": {"$gt": "1"}})));
    }

    #[test]
    fn test_range_predicates() {
        let doc = json!({"age": 25});
        assert!(matches(doc.clone(), json!({"age": {"$gte": 18, "$lte": 30}})));
        assert!(!matches(doc.clone(), json!({"age": {"$gt": 25}})));
        assert!(!matches(doc.clone(), json!({"age": {"$lt": 25}})));
        assert!(!matches(doc, json!({"missing": {"$lt": 100}})));
    }

    #[test]
    fn test_set_membership_and_exists() {
        let doc = json!({"status": "open"});
        assert!(matches(doc.clone(), json!({"status": {"$in": ["open", "held"]}})));
        assert!(matches(doc.clone(), json!({"status": {"$nin": ["closed"]}})));
        assert!(matches(doc.clone(), json!({"status": {"$exists": true}})));
        assert!(matches(doc, json!({"other": {"$exists": false}})));
    }

    #[test]
    fn test_combinators() {
        let doc = json!({"a": 1, "b": 2});
        assert!(matches(doc.clone(), json!({"$and": [{"a": 1}, {"b": 2}]})));
        assert!(matches(doc.clone(), json!({"$or": [{"a": 5}, {"b": 2}]})));
        assert!(!matches(doc.clone(), json!({"$nor": [{"a": 1}]})));
        assert!(matches(doc, json!({"a": {"$ne": 2}})));
    }

    #[test]
    fn test_regex_with_options() {
        let doc = json!({"name": "Alpha"});
        assert!(matches(doc.clone(), json!({"name": {"$regex": "^al", "$options": "i"}})));
        assert!(!matches(doc.clone(), json!({"name": {"$regex": "^al"}})));
        assert!(matches(doc, json!({"name": {"$not": {"$regex": "z"}}})));
    }

    #[test]
    fn test_malformed_predicates_fail() {
        let doc = json!({"a": 1});
        assert!(PredicateMatcher::matches(&doc, &json!({"$where": "1"})).is_err());
        assert!(PredicateMatcher::matches(&doc, &json!({"a": {"$near": 1}})).is_err());
        assert!(PredicateMatcher::matches(&doc, &json!({"a": {"$regex": "("}})).is_err());
    }
}
