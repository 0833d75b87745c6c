//! Compute lowering
//!
//! Each compute function maps to one native expression builder. Builders
//! receive already-lowered operands: `"$field"` references, literals, or
//! references to transient fields holding a nested call's result.
//!
//! Nested calls are materialized into `__tmp_N` fields by a preceding
//! `$addFields` stage and removed by an `$unset` right after the clause.

use serde_json::{json, Value};

use super::stage::Stage;
use crate::query::{ComputeClause, ComputeExpr, ComputeFunction};

/// Prefix of transient intermediate fields
pub const TEMP_FIELD_PREFIX: &str = "__tmp_";

type Builder = fn(&[Value]) -> Value;

/// Native expression builder for each compute function
fn builder(function: ComputeFunction) -> Builder {
    match function {
        ComputeFunction::Add => |a| json!({ "$add": [a[0], a[1]] }),
        ComputeFunction::Sub => |a| json!({ "$subtract": [a[0], a[1]] }),
        ComputeFunction::Mul => |a| json!({ "$multiply": [a[0], a[1]] }),
        ComputeFunction::Div => |a| json!({ "$divide": [a[0], a[1]] }),
        ComputeFunction::Concat => |a| json!({ "$concat": a }),
        ComputeFunction::ToLower => |a| json!({ "$toLower": a[0] }),
        ComputeFunction::ToUpper => |a| json!({ "$toUpper": a[0] }),
        ComputeFunction::Substring => substring,
        ComputeFunction::Trim => |a| json!({ "$trim": { "input": a[0] } }),
        ComputeFunction::Length => |a| json!({ "$strLenCP": a[0] }),
        ComputeFunction::IndexOf => |a| json!({ "$indexOfCP": [a[0], a[1]] }),
        ComputeFunction::Replace => {
            |a| json!({ "$replaceOne": { "input": a[0], "find": a[1], "replacement": a[2] } })
        }
        ComputeFunction::ReplaceAll => {
            |a| json!({ "$replaceAll": { "input": a[0], "find": a[1], "replacement": a[2] } })
        }
        ComputeFunction::StartsWith => starts_with,
        ComputeFunction::EndsWith => ends_with,
        ComputeFunction::Year => |a| json!({ "$year": { "$toDate": a[0] } }),
        ComputeFunction::Month => |a| json!({ "$month": { "$toDate": a[0] } }),
        ComputeFunction::Day => |a| json!({ "$dayOfMonth": { "$toDate": a[0] } }),
        ComputeFunction::Round => |a| json!({ "$round": [a[0], 0] }),
        ComputeFunction::Floor => |a| json!({ "$floor": a[0] }),
        ComputeFunction::Ceiling => |a| json!({ "$ceil": a[0] }),
    }
}

fn substring(a: &[Value]) -> Value {
    let len = a.get(2).cloned().unwrap_or_else(|| json!({ "$strLenCP": a[0] }));
    json!({ "$substrCP": [a[0], a[1], len] })
}

fn starts_with(a: &[Value]) -> Value {
    let n = literal_len(&a[1]);
    json!({ "$cond": [{ "$eq": [{ "$substrCP": [a[0], 0, n] }, a[1]] }, true, false] })
}

fn ends_with(a: &[Value]) -> Value {
    let n = literal_len(&a[1]);
    json!({
        "$cond": [
            { "$eq": [
                { "$substrCP": [a[0], { "$subtract": [{ "$strLenCP": a[0] }, n] }, n] },
                a[1]
            ] },
            true,
            false
        ]
    })
}

/// Character length of a lowered string literal
fn literal_len(value: &Value) -> usize {
    let text = match value {
        Value::String(s) => Some(s.as_str()),
        Value::Object(map) => map.get("$literal").and_then(Value::as_str),
        _ => None,
    };
    text.map(|s| s.chars().count()).unwrap_or(0)
}

/// Lowers compute clauses to `$addFields` / `$unset` stages.
///
/// Temporary names are unique across every clause lowered by one instance.
#[derive(Debug, Default)]
pub struct ComputeLowering {
    next_temp: usize,
}

impl ComputeLowering {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages producing `clause.alias`
    pub fn lower_clause(&mut self, clause: &ComputeClause) -> Vec<Stage> {
        let mut stages = Vec::new();
        let mut temps = Vec::new();

        let expr = self.lower(&clause.expression, &mut stages, &mut temps);
        stages.push(Stage::AddFields(vec![(clause.alias.clone(), expr)]));
        if !temps.is_empty() {
            stages.push(Stage::Unset(temps));
        }
        stages
    }

    fn lower(&mut self, expr: &ComputeExpr, stages: &mut Vec<Stage>, temps: &mut Vec<String>) -> Value {
        match expr {
            ComputeExpr::Field(path) => Value::String(format!("${}", path)),
            ComputeExpr::Literal(Value::String(s)) if s.starts_with('$') => json!({ "$literal": s }),
            ComputeExpr::Literal(v) => v.clone(),
            ComputeExpr::Call { function, args } => {
                let operands: Vec<Value> = args
                    .iter()
                    .map(|arg| self.operand(arg, stages, temps))
                    .collect();
                builder(*function)(&operands)
            }
        }
    }

    fn operand(&mut self, arg: &ComputeExpr, stages: &mut Vec<Stage>, temps: &mut Vec<String>) -> Value {
        if !matches!(arg, ComputeExpr::Call { .. }) {
            return self.lower(arg, stages, temps);
        }

        let value = self.lower(arg, stages, temps);
        let name = format!("{}{}", TEMP_FIELD_PREFIX, self.next_temp);
        self.next_temp += 1;
        stages.push(Stage::AddFields(vec![(name.clone(), value)]));
        temps.push(name.clone());
        Value::String(format!("${}", name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::compute::CATALOGUE;

    fn lower(input: &str) -> Vec<Value> {
        let clause = ComputeClause::parse(input).unwrap();
        ComputeLowering::new()
            .lower_clause(&clause)
            .iter()
            .map(Stage::to_document)
            .collect()
    }

    #[test]
    fn test_every_catalogue_arity_builds() {
        for spec in CATALOGUE {
            for arity in spec.min_args..=spec.params.len() {
                let args = vec![json!("$x"); arity];
                assert!(builder(spec.function)(&args).is_object(), "{}", spec.name);
            }
        }
    }

    #[test]
    fn test_multiplication() {
        assert_eq!(
            lower("price mul 2 as doublePrice"),
            vec![json!({"$addFields": {"doublePrice": {"$multiply": ["$price", 2]}}})]
        );
    }

    #[test]
    fn test_concat_protects_dollar_literals() {
        assert_eq!(
            lower("concat(name,'$x') as s"),
            vec![json!({"$addFields": {"s": {"$concat": ["$name", {"$literal": "$x"}]}}})]
        );
    }

    #[test]
    fn test_nested_call_uses_transient_field() {
        assert_eq!(
            lower("tolower(substring(name,0,3)) as lowpre"),
            vec![
                json!({"$addFields": {"__tmp_0": {"$substrCP": ["$name", 0, 3]}}}),
                json!({"$addFields": {"lowpre": {"$toLower": "$__tmp_0"}}}),
                json!({"$unset": "__tmp_0"}),
            ]
        );
    }

    #[test]
    fn test_two_argument_substring_runs_to_end() {
        assert_eq!(
            lower("substring(name,2) as rest"),
            vec![json!({"$addFields": {"rest": {"$substrCP": ["$name", 2, {"$strLenCP": "$name"}]}}})]
        );
    }

    #[test]
    fn test_starts_and_ends_with() {
        assert_eq!(
            lower("startswith(name,'Al') as s"),
            vec![json!({"$addFields": {"s": {"$cond": [
                {"$eq": [{"$substrCP": ["$name", 0, 2]}, "Al"]}, true, false
            ]}}})]
        );
        assert_eq!(
            lower("endswith(name,'ha') as e"),
            vec![json!({"$addFields": {"e": {"$cond": [
                {"$eq": [
                    {"$substrCP": ["$name", {"$subtract": [{"$strLenCP": "$name"}, 2]}, 2]},
                    "ha"
                ]},
                true,
                false
            ]}}})]
        );
    }

    #[test]
    fn test_temp_names_unique_across_clauses() {
        let mut lowering = ComputeLowering::new();
        let a = ComputeClause::parse("tolower(trim(name)) as a").unwrap();
        let b = ComputeClause::parse("toupper(trim(name)) as b").unwrap();
        let first = lowering.lower_clause(&a);
        let second = lowering.lower_clause(&b);
        assert_eq!(first.last(), Some(&Stage::Unset(vec!["__tmp_0".to_string()])));
        assert_eq!(second.last(), Some(&Stage::Unset(vec!["__tmp_1".to_string()])));
    }
}
