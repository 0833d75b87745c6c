//! Document value helpers
//!
//! Dotted-path access and the total ordering used for sorting, grouping,
//! and range comparison.

use std::cmp::Ordering;

use serde_json::{Map, Number, Value};

/// Value at a dotted path; `None` when any segment is missing
pub fn get_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, |node, segment| match node {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Set a dotted path, creating intermediate objects
pub fn set_path(doc: &mut Value, path: &str, value: Value) {
    if !doc.is_object() {
        *doc = Value::Object(Map::new());
    }
    let Value::Object(map) = doc else {
        return;
    };
    match path.split_once('.') {
        None => {
            map.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let child = map
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            set_path(child, rest, value);
        }
    }
}

/// Remove a dotted path; returns the removed value
pub fn remove_path(doc: &mut Value, path: &str) -> Option<Value> {
    match path.rsplit_once('.') {
        None => doc.as_object_mut()?.remove(path),
        Some((parent, last)) => {
            let mut node = doc;
            for segment in parent.split('.') {
                node = node.as_object_mut()?.get_mut(segment)?;
            }
            node.as_object_mut()?.remove(last)
        }
    }
}

/// JSON number from an `f64`; integral values become integers
pub fn number(n: f64) -> Value {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 9.0e15 {
        Value::Number(Number::from(n as i64))
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

/// Equality with numbers compared by value (`10 == 10.0`)
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(xi), Some(yi)) => xi == yi,
            _ => x.as_f64() == y.as_f64(),
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xm), Value::Object(ym)) => {
            xm.len() == ym.len()
                && xm
                    .iter()
                    .all(|(k, x)| ym.get(k).is_some_and(|y| values_equal(x, y)))
        }
        _ => a == b,
    }
}

fn type_rank(v: Option<&Value>) -> u8 {
    match v {
        None => 0,
        Some(Value::Null) => 1,
        Some(Value::Bool(_)) => 2,
        Some(Value::Number(_)) => 3,
        Some(Value::String(_)) => 4,
        Some(Value::Array(_)) => 5,
        Some(Value::Object(_)) => 6,
    }
}

/// Total ordering for sorting.
///
/// Ordering rules:
/// - missing < null < bool < number < string < array < object
/// - For same types, natural ordering
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let rank = type_rank(a).cmp(&type_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }

    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => match (x.as_i64(), y.as_i64()) {
            (Some(xi), Some(yi)) => xi.cmp(&yi),
            _ => {
                let xf = x.as_f64().unwrap_or(0.0);
                let yf = y.as_f64().unwrap_or(0.0);
                xf.partial_cmp(&yf).unwrap_or(Ordering::Equal)
            }
        },
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Array(xs)), Some(Value::Array(ys))) => xs
            .iter()
            .zip(ys)
            .map(|(x, y)| compare_values(Some(x), Some(y)))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or_else(|| xs.len().cmp(&ys.len())),
        _ => Ordering::Equal,
    }
}

/// Ordering only between comparable values (both numbers or both strings)
pub fn compare_comparable(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) | (Value::String(_), Value::String(_)) => {
            Some(compare_values(Some(a), Some(b)))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_nested_path() {
        let doc = json!({"customer": {"address": {"city": "Oslo"}}, "tags": ["a", "b"]});
        assert_eq!(get_path(&doc, "customer.address.city"), Some(&json!("Oslo")));
        assert_eq!(get_path(&doc, "tags.1"), Some(&json!("b")));
        assert_eq!(get_path(&doc, "customer.missing"), None);
    }

    #[test]
    fn test_set_and_remove_path() {
        let mut doc = json!({"a": 1});
        set_path(&mut doc, "b.c", json!(2));
        assert_eq!(doc, json!({"a": 1, "b": {"c": 2}}));

        assert_eq!(remove_path(&mut doc, "b.c"), Some(json!(2)));
        assert_eq!(remove_path(&mut doc, "a"), Some(json!(1)));
        assert_eq!(remove_path(&mut doc, "zzz"), None);
        assert_eq!(doc, json!({"b": {}}));
    }

    #[test]
    fn test_number_normalization() {
        assert_eq!(number(20.0), json!(20));
        assert_eq!(number(2.5), json!(2.5));
        assert_eq!(number(f64::NAN), Value::Null);
    }

    #[test]
    fn test_numeric_equality_across_representations() {
        assert!(values_equal(&json!(10), &json!(10.0)));
        assert!(!values_equal(&json!(10), &json!("10")));
    }

    #[test]
    fn test_type_ordering() {
        let null = json!(null);
        let one = json!(1);
        let text = json!("a");
        assert_eq!(compare_values(None, Some(&null)), Ordering::Less);
        assert_eq!(compare_values(Some(&one), Some(&text)), Ordering::Less);
        assert_eq!(compare_values(Some(&json!(2.5)), Some(&json!(3))), Ordering::Less);
        assert_eq!(compare_comparable(&one, &text), None);
    }
}
