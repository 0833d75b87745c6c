//! Checkpoint storage
//!
//! Checkpoints are created once and looked up by token; they are never
//! updated in place. Deployments inject their own keyed store.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{ODataError, ODataResult};
use crate::executor::BoxFuture;

/// "State as of `since_ms`"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaCheckpoint {
    /// Opaque unique token
    pub token_id: String,

    /// Watermark; rows changed strictly after it are returned
    pub since_ms: u64,

    /// Store-specific cursor, carried but not interpreted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_token: Option<Value>,
}

/// Keyed checkpoint registry
pub trait CheckpointStore: Send + Sync {
    /// Persist a new checkpoint; fails if the token already exists
    fn create(&self, checkpoint: DeltaCheckpoint) -> BoxFuture<'_, ODataResult<()>>;

    /// Find a checkpoint by token
    fn lookup<'a>(&'a self, token_id: &'a str) -> BoxFuture<'a, ODataResult<Option<DeltaCheckpoint>>>;
}

/// Process-local checkpoint registry
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: RwLock<HashMap<String, DeltaCheckpoint>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.checkpoints.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn create(&self, checkpoint: DeltaCheckpoint) -> BoxFuture<'_, ODataResult<()>> {
        Box::pin(async move {
            let mut checkpoints = self
                .checkpoints
                .write()
                .map_err(|_| ODataError::server("checkpoint lock poisoned"))?;
            if checkpoints.contains_key(&checkpoint.token_id) {
                return Err(ODataError::server(format!(
                    "checkpoint {} already exists",
                    checkpoint.token_id
                )));
            }
            checkpoints.insert(checkpoint.token_id.clone(), checkpoint);
            Ok(())
        })
    }

    fn lookup<'a>(&'a self, token_id: &'a str) -> BoxFuture<'a, ODataResult<Option<DeltaCheckpoint>>> {
        Box::pin(async move {
            let checkpoints = self
                .checkpoints
                .read()
                .map_err(|_| ODataError::server("checkpoint lock poisoned"))?;
            Ok(checkpoints.get(token_id).cloned())
        })
    }
}
