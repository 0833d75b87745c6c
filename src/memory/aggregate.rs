//! Aggregation engine
//!
//! Runs compiled [`Stage`] sequences over an in-memory row set.
//!
//! Rows flow through the stages in order; `$lookup` reads sibling
//! collections through a [`LookupSource`].

use std::cmp::Ordering;

use serde_json::{Map, Value};

use super::expr::evaluate;
use super::matcher::PredicateMatcher;
use super::value::{compare_values, get_path, number, remove_path, set_path, values_equal};
use crate::config::IDENTITY_FIELD;
use crate::errors::ODataResult;
use crate::plan::{Accumulator, Projection, ProjectionValue, Stage};
use crate::query::{OrderByField, SortDirection};

/// Supplies the rows of a joined collection
pub trait LookupSource {
    /// Snapshot of the named collection; empty when it does not exist
    fn snapshot(&self, collection: &str) -> ODataResult<Vec<Value>>;
}

/// Run `stages` over `rows`
pub fn run_pipeline(
    mut rows: Vec<Value>,
    stages: &[Stage],
    source: &dyn LookupSource,
) -> ODataResult<Vec<Value>> {
    for stage in stages {
        rows = match stage {
            Stage::Match(predicate) => filter_rows(rows, predicate)?,
            Stage::Group { keys, accumulators } => group(rows, keys, accumulators)?,
            Stage::Project(fields) => rows
                .iter()
                .map(|row| project(row, fields))
                .collect::<ODataResult<_>>()?,
            Stage::AddFields(fields) => {
                for row in rows.iter_mut() {
                    let values = fields
                        .iter()
                        .map(|(name, expr)| Ok((name, evaluate(expr, row)?)))
                        .collect::<ODataResult<Vec<_>>>()?;
                    for (name, value) in values {
                        set_path(row, name, value);
                    }
                }
                rows
            }
            Stage::Unset(fields) => {
                for row in rows.iter_mut() {
                    for field in fields {
                        remove_path(row, field);
                    }
                }
                rows
            }
            Stage::Sort(order) => {
                sort_rows(&mut rows, order);
                rows
            }
            Stage::Skip(n) => rows.into_iter().skip(*n as usize).collect(),
            Stage::Limit(n) => rows.into_iter().take(*n as usize).collect(),
            Stage::Lookup {
                from,
                local_field,
                foreign_field,
                alias,
            } => {
                let foreign = source.snapshot(from)?;
                for row in rows.iter_mut() {
                    let local = get_path(row, local_field).cloned();
                    let joined: Vec<Value> = foreign
                        .iter()
                        .filter(|f| join_matches(local.as_ref(), get_path(f, foreign_field)))
                        .cloned()
                        .collect();
                    set_path(row, alias, Value::Array(joined));
                }
                rows
            }
            Stage::Unwind {
                path,
                preserve_null_and_empty,
            } => unwind(rows, path, *preserve_null_and_empty),
        };
    }
    Ok(rows)
}

/// Rows matching `predicate`, in order
pub fn filter_rows(rows: Vec<Value>, predicate: &Value) -> ODataResult<Vec<Value>> {
    let mut kept = Vec::with_capacity(rows.len());
    for row in rows {
        if PredicateMatcher::matches(&row, predicate)? {
            kept.push(row);
        }
    }
    Ok(kept)
}

/// Stable multi-key sort
pub fn sort_rows(rows: &mut [Value], order: &[OrderByField]) {
    rows.sort_by(|a, b| {
        order
            .iter()
            .map(|key| {
                let ordering = compare_values(get_path(a, &key.field), get_path(b, &key.field));
                match key.direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                }
            })
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });
}

/// Apply a projection to one row.
///
/// Any include or computed field selects inclusion mode, where the
/// identity field is kept unless excluded explicitly.
pub fn project(row: &Value, fields: &Projection) -> ODataResult<Value> {
    let inclusive = fields
        .iter()
        .any(|(_, v)| !matches!(v, ProjectionValue::Exclude));

    if !inclusive {
        let mut out = row.clone();
        for (field, _) in fields {
            remove_path(&mut out, field);
        }
        return Ok(out);
    }

    let mut out = Value::Object(Map::new());
    let id_excluded = fields
        .iter()
        .any(|(f, v)| f == IDENTITY_FIELD && *v == ProjectionValue::Exclude);
    if !id_excluded {
        if let Some(id) = row.get(IDENTITY_FIELD) {
            set_path(&mut out, IDENTITY_FIELD, id.clone());
        }
    }

    for (field, value) in fields {
        match value {
            ProjectionValue::Include => {
                if let Some(v) = get_path(row, field) {
                    set_path(&mut out, field, v.clone());
                }
            }
            ProjectionValue::Expr(expr) => set_path(&mut out, field, evaluate(expr, row)?),
            ProjectionValue::Exclude => {}
        }
    }
    Ok(out)
}

fn group(rows: Vec<Value>, keys: &[String], accumulators: &[Accumulator]) -> ODataResult<Vec<Value>> {
    // Groups in order of first appearance
    let mut groups: Vec<(Value, Vec<Value>)> = Vec::new();
    for row in rows {
        let mut id = Map::new();
        for key in keys {
            id.insert(key.clone(), get_path(&row, key).cloned().unwrap_or(Value::Null));
        }
        let id = Value::Object(id);
        match groups.iter_mut().find(|(existing, _)| values_equal(existing, &id)) {
            Some((_, members)) => members.push(row),
            None => groups.push((id, vec![row])),
        }
    }

    groups
        .into_iter()
        .map(|(id, members)| {
            let mut out = Map::new();
            out.insert(IDENTITY_FIELD.to_string(), id);
            for acc in accumulators {
                let inputs = members
                    .iter()
                    .map(|m| evaluate(&acc.input, m))
                    .collect::<ODataResult<Vec<_>>>()?;
                out.insert(acc.alias.clone(), accumulate(acc.operator, &inputs));
            }
            Ok(Value::Object(out))
        })
        .collect()
}

fn accumulate(operator: &str, inputs: &[Value]) -> Value {
    let numbers: Vec<f64> = inputs.iter().filter_map(Value::as_f64).collect();
    match operator {
        "$sum" => number(numbers.iter().sum()),
        "$avg" if numbers.is_empty() => Value::Null,
        "$avg" => number(numbers.iter().sum::<f64>() / numbers.len() as f64),
        "$min" | "$max" => {
            let present = inputs.iter().filter(|v| !v.is_null());
            let pick = if operator == "$min" {
                present.min_by(|a, b| compare_values(Some(*a), Some(*b)))
            } else {
                present.max_by(|a, b| compare_values(Some(*a), Some(*b)))
            };
            pick.cloned().unwrap_or(Value::Null)
        }
        _ => Value::Null,
    }
}

/// Local values match foreign values by equality; array locals match any element
fn join_matches(local: Option<&Value>, foreign: Option<&Value>) -> bool {
    let foreign = foreign.unwrap_or(&Value::Null);
    match local {
        None | Some(Value::Null) => foreign.is_null(),
        Some(Value::Array(items)) => items.iter().any(|i| values_equal(i, foreign)),
        Some(value) => values_equal(value, foreign),
    }
}

fn unwind(rows: Vec<Value>, path: &str, preserve: bool) -> Vec<Value> {
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        match get_path(&row, path).cloned() {
            Some(Value::Array(items)) if !items.is_empty() => {
                for item in items {
                    let mut copy = row.clone();
                    set_path(&mut copy, path, item);
                    out.push(copy);
                }
            }
            Some(Value::Array(_)) | Some(Value::Null) | None => {
                if preserve {
                    let mut copy = row;
                    remove_path(&mut copy, path);
                    out.push(copy);
                }
            }
            Some(_) => out.push(row),
        }
    }
    out
}
