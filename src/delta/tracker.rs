//! Delta tracker
//!
//! Two operations: `initiate` mints a checkpoint at the current watermark,
//! `resolve` returns rows whose change-tracking field is strictly newer.
//! A resolve never advances its token; callers re-initiate for a new one.

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

use super::clock::{Clock, SystemClock};
use super::store::{CheckpointStore, DeltaCheckpoint, InMemoryCheckpointStore};
use crate::config::DEFAULT_CHANGE_FIELD;
use crate::errors::{ODataError, ODataResult};
use crate::executor::Collection;
use crate::observability::Event;
use crate::plan::FindOptions;

/// Writes the change-tracking timestamp into documents
#[derive(Clone)]
pub struct ChangeStamp {
    clock: Arc<dyn Clock>,
    field: String,
}

impl ChangeStamp {
    pub fn new(clock: Arc<dyn Clock>, field: impl Into<String>) -> Self {
        Self {
            clock,
            field: field.into(),
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    /// Set the change field to the current clock reading
    pub fn stamp(&self, fields: &mut Map<String, Value>) -> u64 {
        let now = self.clock.now_ms();
        fields.insert(self.field.clone(), json!(now));
        now
    }
}

impl std::fmt::Debug for ChangeStamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeStamp")
            .field("field", &self.field)
            .finish()
    }
}

/// Issues and resolves change-tracking checkpoints
#[derive(Clone)]
pub struct DeltaTracker {
    checkpoints: Arc<dyn CheckpointStore>,
    stamp: ChangeStamp,
}

impl Default for DeltaTracker {
    fn default() -> Self {
        Self::new(
            Arc::new(InMemoryCheckpointStore::new()),
            Arc::new(SystemClock::new()),
        )
    }
}

impl DeltaTracker {
    pub fn new(checkpoints: Arc<dyn CheckpointStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            checkpoints,
            stamp: ChangeStamp::new(clock, DEFAULT_CHANGE_FIELD),
        }
    }

    /// Track changes through a different per-row timestamp field
    pub fn with_change_field(mut self, field: impl Into<String>) -> Self {
        self.stamp.field = field.into();
        self
    }

    /// Stamper sharing this tracker's clock and change field
    pub fn change_stamp(&self) -> &ChangeStamp {
        &self.stamp
    }

    /// Mint a checkpoint bound to the current watermark
    pub async fn initiate(&self, resume_token: Option<Value>) -> ODataResult<DeltaCheckpoint> {
        let checkpoint = DeltaCheckpoint {
            token_id: Uuid::new_v4().to_string(),
            since_ms: self.stamp.clock.now_ms(),
            resume_token,
        };
        self.checkpoints.create(checkpoint.clone()).await?;

        info!(
            event = %Event::DeltaInitiated,
            token = %checkpoint.token_id,
            since_ms = checkpoint.since_ms,
            "delta checkpoint issued"
        );
        Ok(checkpoint)
    }

    /// Rows changed strictly after the checkpoint's watermark
    pub async fn resolve(
        &self,
        token_id: &str,
        collection: &dyn Collection,
    ) -> ODataResult<Vec<Value>> {
        let checkpoint = self
            .checkpoints
            .lookup(token_id)
            .await?
            .ok_or_else(|| {
                debug!(token = token_id, "unknown delta token");
                ODataError::bad_request("Invalid delta token")
            })?;

        let field = self.stamp.field();
        let filter = json!({ field: { "$gt": checkpoint.since_ms } });
        let rows = collection.find(&filter, &FindOptions::default()).await?;

        info!(
            event = %Event::DeltaResolved,
            token = token_id,
            collection = collection.name(),
            changed = rows.len(),
            "delta resolved"
        );
        Ok(rows)
    }
}

/// `{base}?$deltatoken={token}` for the delta-initiation response
pub fn delta_link(base: &str, token_id: &str) -> String {
    format!("{}?$deltatoken={}", base, urlencoding::encode(token_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::ManualClock;
    use crate::memory::MemoryStore;

    fn tracker(clock: Arc<ManualClock>) -> DeltaTracker {
        DeltaTracker::new(Arc::new(InMemoryCheckpointStore::new()), clock)
    }

    #[tokio::test]
    async fn test_resolve_returns_only_newer_rows() {
        let clock = Arc::new(ManualClock::new(1_000));
        let tracker = tracker(clock.clone());
        let orders = MemoryStore::new().collection("orders").unwrap();
        orders
            .insert_many(vec![json!({"_id": 1, "_updatedAtMs": 900})])
            .unwrap();

        let checkpoint = tracker.initiate(None).await.unwrap();
        assert_eq!(checkpoint.since_ms, 1_000);

        clock.advance(1);
        let mut doc = Map::new();
        doc.insert("_id".into(), json!(2));
        tracker.change_stamp().stamp(&mut doc);
        orders.insert_one(Value::Object(doc)).await.unwrap();

        let changed = tracker.resolve(&checkpoint.token_id, &orders).await.unwrap();
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0]["_id"], json!(2));
    }

    #[tokio::test]
    async fn test_resolve_does_not_advance_token() {
        let clock = Arc::new(ManualClock::new(10));
        let tracker = tracker(clock.clone());
        let orders = MemoryStore::new().collection("orders").unwrap();
        let checkpoint = tracker.initiate(None).await.unwrap();

        clock.advance(5);
        orders
            .insert_one(json!({"_id": "a", "_updatedAtMs": clock.now_ms()}))
            .await
            .unwrap();

        for _ in 0..2 {
            let changed = tracker.resolve(&checkpoint.token_id, &orders).await.unwrap();
            assert_eq!(changed.len(), 1);
        }
    }

    #[tokio::test]
    async fn test_unknown_token_is_bad_request() {
        let tracker = DeltaTracker::default();
        let orders = MemoryStore::new().collection("orders").unwrap();
        let err = tracker.resolve("missing", &orders).await.unwrap_err();
        assert_eq!(err, ODataError::bad_request("Invalid delta token"));
    }

    #[tokio::test]
    async fn test_custom_change_field() {
        let clock = Arc::new(ManualClock::new(0));
        let tracker = tracker(clock.clone()).with_change_field("modified");
        let orders = MemoryStore::new().collection("orders").unwrap();
        let checkpoint = tracker.initiate(Some(json!({"cursor": 7}))).await.unwrap();
        assert_eq!(checkpoint.resume_token, Some(json!({"cursor": 7})));

        orders
            .insert_many(vec![json!({"_id": 1, "modified": 3}), json!({"_id": 2, "_updatedAtMs": 3})])
            .unwrap();
        let changed = tracker.resolve(&checkpoint.token_id, &orders).await.unwrap();
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0]["_id"], json!(1));
    }

    #[test]
    fn test_delta_link() {
        assert_eq!(
            delta_link("http://localhost/odata/Orders", "abc-1"),
            "http://localhost/odata/Orders?$deltatoken=abc-1"
        );
    }
}
