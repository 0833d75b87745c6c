//! Expression evaluation
//!
//! Evaluates the native expressions emitted for computed fields and group
//! projections. `"$path"` reads a field; `{ "$op": args }` applies an
//! operator; anything else is a literal.

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use serde_json::{Map, Value};

use super::value::{get_path, number, values_equal};
use crate::errors::{ODataError, ODataResult};

/// Evaluate `expr` against `doc`
pub fn evaluate(expr: &Value, doc: &Value) -> ODataResult<Value> {
    match expr {
        Value::String(s) => match s.strip_prefix('$') {
            Some(path) => Ok(get_path(doc, path).cloned().unwrap_or(Value::Null)),
            None => Ok(expr.clone()),
        },
        Value::Array(items) => items
            .iter()
            .map(|item| evaluate(item, doc))
            .collect::<ODataResult<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) => match operator(map) {
            Some((op, args)) => apply(op, args, doc),
            None => {
                let mut out = Map::new();
                for (key, value) in map {
                    out.insert(key.clone(), evaluate(value, doc)?);
                }
                Ok(Value::Object(out))
            }
        },
        literal => Ok(literal.clone()),
    }
}

fn operator(map: &Map<String, Value>) -> Option<(&str, &Value)> {
    if map.len() != 1 {
        return None;
    }
    map.iter()
        .next()
        .filter(|(key, _)| key.starts_with('$'))
        .map(|(key, value)| (key.as_str(), value))
}

fn apply(op: &str, args: &Value, doc: &Value) -> ODataResult<Value> {
    match op {
        "$literal" => Ok(args.clone()),
        "$add" | "$subtract" | "$multiply" | "$divide" => arithmetic(op, &positional(args, doc)?),
        "$concat" => concat(&positional(args, doc)?),
        "$toLower" | "$toUpper" => {
            let value = evaluate(unary(args), doc)?;
            let text = match value {
                Value::Null => String::new(),
                Value::String(s) => s,
                other => other.to_string(),
            };
            Ok(Value::String(if op == "$toLower" {
                text.to_lowercase()
            } else {
                text.to_uppercase()
            }))
        }
        "$substrCP" => {
            let a = positional(args, doc)?;
            let text = string_arg(op, a.first())?;
            let start = index_arg(op, a.get(1))?;
            let len = index_arg(op, a.get(2))?;
            Ok(Value::String(text.chars().skip(start).take(len).collect()))
        }
        "$strLenCP" => {
            let value = evaluate(unary(args), doc)?;
            let text = value
                .as_str()
                .ok_or_else(|| type_error(op, "a string"))?;
            Ok(Value::from(text.chars().count() as u64))
        }
        "$trim" => {
            let input = named(args, "input", doc)?;
            match input {
                Value::Null => Ok(Value::Null),
                Value::String(s) => Ok(Value::String(s.trim().to_string())),
                _ => Err(type_error(op, "a string")),
            }
        }
        "$indexOfCP" => {
            let a = positional(args, doc)?;
            match (a.first(), a.get(1)) {
                (Some(Value::Null) | None, _) => Ok(Value::Null),
                (Some(Value::String(haystack)), Some(Value::String(needle))) => {
                    let index = haystack
                        .find(needle.as_str())
                        .map(|byte| haystack[..byte].chars().count() as i64)
                        .unwrap_or(-1);
                    Ok(Value::from(index))
                }
                _ => Err(type_error(op, "strings")),
            }
        }
        "$replaceOne" | "$replaceAll" => {
            let input = named(args, "input", doc)?;
            let find = named(args, "find", doc)?;
            let replacement = named(args, "replacement", doc)?;
            match (input, find, replacement) {
                (Value::String(s), Value::String(f), Value::String(r)) => Ok(Value::String(
                    if op == "$replaceOne" {
                        s.replacen(&f, &r, 1)
                    } else {
                        s.replace(&f, &r)
                    },
                )),
                (Value::Null, _, _) | (_, Value::Null, _) | (_, _, Value::Null) => Ok(Value::Null),
                _ => Err(type_error(op, "strings")),
            }
        }
        "$cond" => {
            let (cond, then, otherwise) = match args {
                Value::Array(a) if a.len() == 3 => (&a[0], &a[1], &a[2]),
                Value::Object(m) => match (m.get("if"), m.get("then"), m.get("else")) {
                    (Some(c), Some(t), Some(e)) => (c, t, e),
                    _ => return Err(type_error(op, "if/then/else")),
                },
                _ => return Err(type_error(op, "three arguments")),
            };
            if truthy(&evaluate(cond, doc)?) {
                evaluate(then, doc)
            } else {
                evaluate(otherwise, doc)
            }
        }
        "$eq" => {
            let a = positional(args, doc)?;
            match (a.first(), a.get(1)) {
                (Some(x), Some(y)) => Ok(Value::Bool(values_equal(x, y))),
                _ => Err(type_error(op, "two arguments")),
            }
        }
        "$toDate" => {
            let value = evaluate(unary(args), doc)?;
            if value.is_null() {
                return Ok(Value::Null);
            }
            let date = parse_date(&value).ok_or_else(|| type_error(op, "a date"))?;
            Ok(Value::String(date.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)))
        }
        "$year" | "$month" | "$dayOfMonth" => {
            let value = evaluate(unary(args), doc)?;
            if value.is_null() {
                return Ok(Value::Null);
            }
            let date = parse_date(&value).ok_or_else(|| type_error(op, "a date"))?;
            Ok(Value::from(match op {
                "$year" => date.year() as i64,
                "$month" => date.month() as i64,
                _ => date.day() as i64,
            }))
        }
        "$round" => {
            let a = positional(args, doc)?;
            let places = a.get(1).and_then(Value::as_i64).unwrap_or(0);
            numeric_unary(op, a.first(), |n| round_half_even(n, places))
        }
        "$floor" => numeric_unary(op, Some(&evaluate(unary(args), doc)?), f64::floor),
        "$ceil" => numeric_unary(op, Some(&evaluate(unary(args), doc)?), f64::ceil),
        other => Err(ODataError::server(format!("unsupported expression operator {}", other))),
    }
}

/// Single argument, bare or wrapped in a one-element array
fn unary(args: &Value) -> &Value {
    match args {
        Value::Array(a) if a.len() == 1 => &a[0],
        other => other,
    }
}

fn positional(args: &Value, doc: &Value) -> ODataResult<Vec<Value>> {
    match args {
        Value::Array(items) => items.iter().map(|item| evaluate(item, doc)).collect(),
        single => Ok(vec![evaluate(single, doc)?]),
    }
}

fn named(args: &Value, name: &str, doc: &Value) -> ODataResult<Value> {
    match args.get(name) {
        Some(expr) => evaluate(expr, doc),
        None => Ok(Value::Null),
    }
}

fn type_error(op: &str, expected: &str) -> ODataError {
    ODataError::server(format!("{} expects {}", op, expected))
}

fn string_arg<'a>(op: &str, value: Option<&'a Value>) -> ODataResult<&'a str> {
    match value {
        Some(Value::Null) | None => Ok(""),
        Some(Value::String(s)) => Ok(s),
        _ => Err(type_error(op, "a string")),
    }
}

fn index_arg(op: &str, value: Option<&Value>) -> ODataResult<usize> {
    value
        .and_then(Value::as_f64)
        .filter(|n| *n >= 0.0)
        .map(|n| n as usize)
        .ok_or_else(|| type_error(op, "non-negative integer positions"))
}

fn arithmetic(op: &str, args: &[Value]) -> ODataResult<Value> {
    if args.iter().any(Value::is_null) {
        return Ok(Value::Null);
    }
    let nums: Vec<f64> = args
        .iter()
        .map(|v| v.as_f64().ok_or_else(|| type_error(op, "numbers")))
        .collect::<ODataResult<_>>()?;

    let result = match op {
        "$add" => nums.iter().sum(),
        "$multiply" => nums.iter().product(),
        "$subtract" | "$divide" => {
            let &[a, b] = nums.as_slice() else {
                return Err(type_error(op, "two arguments"));
            };
            if op == "$subtract" {
                a - b
            } else if b == 0.0 {
                return Err(ODataError::server("$divide by zero"));
            } else {
                a / b
            }
        }
        _ => return Err(type_error(op, "an arithmetic operator")),
    };
    Ok(number(result))
}

fn concat(args: &[Value]) -> ODataResult<Value> {
    let mut out = String::new();
    for arg in args {
        match arg {
            Value::Null => return Ok(Value::Null),
            Value::String(s) => out.push_str(s),
            _ => return Err(type_error("$concat", "strings")),
        }
    }
    Ok(Value::String(out))
}

fn numeric_unary(op: &str, value: Option<&Value>, f: impl Fn(f64) -> f64) -> ODataResult<Value> {
    match value {
        Some(Value::Null) | None => Ok(Value::Null),
        Some(v) => {
            let n = v.as_f64().ok_or_else(|| type_error(op, "a number"))?;
            Ok(number(f(n)))
        }
    }
}

fn round_half_even(n: f64, places: i64) -> f64 {
    let factor = 10f64.powi(places as i32);
    let scaled = n * factor;
    let rounded = scaled.round();
    let result = if (scaled - scaled.trunc()).abs() == 0.5 {
        2.0 * (scaled / 2.0).round()
    } else {
        rounded
    };
    result / factor
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        _ => true,
    }
}

/// Dates as RFC 3339 strings, `YYYY-MM-DD`, or epoch milliseconds
pub fn parse_date(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|d| d.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .map(|dt| Utc.from_utc_datetime(&dt))
            }),
        Value::Number(n) => n.as_i64().and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}
