//! Response date coercion
//!
//! Rewrites configured fields of result rows into canonical UTC timestamps
//! (`2024-03-05T00:00:00.000Z`). Strings go through the configured
//! [`DateFormat`] list; numbers are read as epoch values. Values that
//! match no format are left untouched.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::formats::{parse_with_formats, DateFormat, DEFAULT_FORMATS};
use crate::memory::{get_path, set_path};

/// `auto` reads numbers above this as milliseconds, otherwise seconds
pub const AUTO_EPOCH_THRESHOLD: f64 = 1e10;

/// Unit of numeric epoch values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EpochMode {
    #[default]
    Auto,
    Ms,
    S,
}

/// Per-entity-set coercion settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateCoercion {
    /// Dotted field paths to coerce
    #[serde(default)]
    pub fields: Vec<String>,

    /// Formats tried in order; empty uses [`DEFAULT_FORMATS`]
    #[serde(default)]
    pub formats: Vec<DateFormat>,

    #[serde(default)]
    pub numeric_epoch: EpochMode,
}

/// A value that looked coercible but could not be converted
#[derive(Debug, Clone, PartialEq)]
pub struct CoercionFailure {
    pub row_index: usize,
    pub field: String,
    pub value: Value,
    pub error: String,
}

pub type CoercionErrorHook = Arc<dyn Fn(&CoercionFailure) + Send + Sync>;

/// Applies a [`DateCoercion`] to result rows
#[derive(Clone)]
pub struct DateCoercer {
    options: DateCoercion,
    on_error: Option<CoercionErrorHook>,
}

impl fmt::Debug for DateCoercer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DateCoercer")
            .field("options", &self.options)
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

impl DateCoercer {
    pub fn new(options: DateCoercion) -> Self {
        Self {
            options,
            on_error: None,
        }
    }

    pub fn with_on_error(mut self, hook: CoercionErrorHook) -> Self {
        self.on_error = Some(hook);
        self
    }

    fn formats(&self) -> &[DateFormat] {
        if self.options.formats.is_empty() {
            DEFAULT_FORMATS
        } else {
            &self.options.formats
        }
    }

    /// Coerce every configured field in place; returns how many values changed
    pub fn coerce(&self, rows: &mut [Value]) -> usize {
        let mut coerced = 0;
        for (row_index, row) in rows.iter_mut().enumerate() {
            for field in &self.options.fields {
                let Some(value) = get_path(row, field).filter(|v| !v.is_null()) else {
                    continue;
                };
                match self.convert(value) {
                    Ok(Some(date)) => {
                        set_path(row, field, Value::String(canonical(&date)));
                        coerced += 1;
                    }
                    Ok(None) => {}
                    Err(error) => {
                        let failure = CoercionFailure {
                            row_index,
                            field: field.clone(),
                            value: value.clone(),
                            error,
                        };
                        if let Some(hook) = &self.on_error {
                            hook(&failure);
                        }
                    }
                }
            }
        }
        debug!(fields = ?self.options.fields, coerced, "dates coerced");
        coerced
    }

    /// `Ok(None)`: not a date, leave it; `Err`: a date that cannot be represented
    fn convert(&self, value: &Value) -> Result<Option<DateTime<Utc>>, String> {
        match value {
            Value::String(text) => Ok(parse_with_formats(text, self.formats())),
            Value::Number(n) => {
                let raw = n
                    .as_f64()
                    .ok_or_else(|| format!("{} is not a finite number", n))?;
                from_epoch(raw, self.options.numeric_epoch).map(Some)
            }
            _ => Ok(None),
        }
    }
}

/// Epoch number to a UTC timestamp
pub fn from_epoch(raw: f64, mode: EpochMode) -> Result<DateTime<Utc>, String> {
    let millis = match mode {
        EpochMode::Ms => raw,
        EpochMode::S => raw * 1000.0,
        EpochMode::Auto if raw > AUTO_EPOCH_THRESHOLD => raw,
        EpochMode::Auto => raw * 1000.0,
    };
    if !millis.is_finite() || millis.abs() >= i64::MAX as f64 {
        return Err(format!("epoch value {} is out of range", raw));
    }
    Utc.timestamp_millis_opt(millis.round() as i64)
        .single()
        .ok_or_else(|| format!("epoch value {} is out of range", raw))
}

/// `YYYY-MM-DDTHH:mm:ss.SSSZ`
pub fn canonical(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn coercer(fields: &[&str], mode: EpochMode) -> DateCoercer {
        DateCoercer::new(DateCoercion {
            fields: fields.iter().map(|f| f.to_string()).collect(),
            formats: Vec::new(),
            numeric_epoch: mode,
        })
    }

    #[test]
    fn test_string_formats_are_canonicalized() {
        let mut rows = vec![
            json!({"_id": 1, "shipped": "2024-03-05"}),
            json!({"_id": 2, "shipped": "05-Mar-2024"}),
            json!({"_id": 3, "shipped": "03/05/2024"}),
            json!({"_id": 4, "shipped": "soon"}),
            json!({"_id": 5, "shipped": null}),
            json!({"_id": 6}),
        ];
        let count = coercer(&["shipped"], EpochMode::Auto).coerce(&mut rows);

        assert_eq!(count, 3);
        assert_eq!(rows[0]["shipped"], json!("2024-03-05T00:00:00.000Z"));
        assert_eq!(rows[1]["shipped"], json!("2024-03-05T00:00:00.000Z"));
        assert_eq!(rows[2]["shipped"], json!("2024-03-05T00:00:00.000Z"));
        assert_eq!(rows[3]["shipped"], json!("soon"));
        assert_eq!(rows[4]["shipped"], json!(null));
        assert!(rows[5].get("shipped").is_none());
    }

    #[test]
    fn test_configured_formats_replace_defaults() {
        let mut rows = vec![json!({"d": "03/05/2024"}), json!({"d": "2024-03-05"})];
        let coercer = DateCoercer::new(DateCoercion {
            fields: vec!["d".to_string()],
            formats: vec![DateFormat::DayMonthYear],
            numeric_epoch: EpochMode::Auto,
        });
        assert_eq!(coercer.coerce(&mut rows), 1);
        assert_eq!(rows[0]["d"], json!("2024-05-03T00:00:00.000Z"));
        assert_eq!(rows[1]["d"], json!("2024-03-05"));
    }

    #[test]
    fn test_epoch_auto_detects_unit() {
        let mut rows = vec![json!({"t": 1_700_000_000}), json!({"t": 1_700_000_000_000_i64})];
        coercer(&["t"], EpochMode::Auto).coerce(&mut rows);
        assert_eq!(rows[0]["t"], json!("2023-11-14T22:13:20.000Z"));
        assert_eq!(rows[1]["t"], json!("2023-11-14T22:13:20.000Z"));
    }

    #[test]
    fn test_epoch_explicit_units() {
        let mut rows = vec![json!({"t": 1_500})];
        coercer(&["t"], EpochMode::Ms).coerce(&mut rows);
        assert_eq!(rows[0]["t"], json!("1970-01-01T00:00:01.500Z"));

        let mut rows = vec![json!({"t": 1.5})];
        coercer(&["t"], EpochMode::S).coerce(&mut rows);
        assert_eq!(rows[0]["t"], json!("1970-01-01T00:00:01.500Z"));
    }

    #[test]
    fn test_nested_paths() {
        let mut rows = vec![json!({"audit": {"created": "2024/03/05"}})];
        coercer(&["audit.created"], EpochMode::Auto).coerce(&mut rows);
        assert_eq!(rows[0]["audit"]["created"], json!("2024-03-05T00:00:00.000Z"));
    }

    #[test]
    fn test_out_of_range_epoch_reports_failure() {
        let failures = Arc::new(Mutex::new(Vec::new()));
        let sink = failures.clone();
        let coercer = coercer(&["t"], EpochMode::S).with_on_error(Arc::new(
            move |failure: &CoercionFailure| sink.lock().unwrap().push(failure.clone()),
        ));

        let mut rows = vec![json!({"t": 1}), json!({"t": 1e300})];
        assert_eq!(coercer.coerce(&mut rows), 1);

        let failures = failures.lock().unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].row_index, 1);
        assert_eq!(failures[0].field, "t");
        assert_eq!(rows[1]["t"], json!(1e300));
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let parsed: DateCoercion = serde_json::from_value(json!({
            "fields": ["shipped"],
            "numeric_epoch": "ms"
        }))
        .unwrap();
        assert_eq!(parsed.numeric_epoch, EpochMode::Ms);
        assert!(parsed.formats.is_empty());
    }
}
