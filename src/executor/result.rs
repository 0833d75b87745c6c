//! Result envelope

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Rows plus the optional count and continuation link.
///
/// Serializes to the wire shape `{ value, @odata.count?, @odata.nextLink? }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    #[serde(rename = "value")]
    pub rows: Vec<Value>,

    /// Total matching rows, from a separate count query
    #[serde(rename = "@odata.count", default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,

    #[serde(rename = "@odata.nextLink", default, skip_serializing_if = "Option::is_none")]
    pub next_link: Option<String>,
}

impl ResultEnvelope {
    pub fn new(rows: Vec<Value>) -> Self {
        Self {
            rows,
            ..Default::default()
        }
    }

    /// Returns the number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if no rows were returned
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
