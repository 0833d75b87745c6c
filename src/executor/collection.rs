//! Collection capability
//!
//! The engine's only view of a document store. Every call is a suspension
//! point; the engine issues them one at a time.

use std::future::Future;
use std::pin::Pin;

use serde_json::{Map, Value};

use crate::errors::{ODataError, ODataResult};
use crate::plan::{FindOptions, Stage};

/// Boxed future returned by collection calls
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A queryable, mutable document collection
pub trait Collection: Send + Sync {
    /// Collection name, used in logs
    fn name(&self) -> &str;

    /// Rows matching `filter`, shaped by `options`
    fn find<'a>(
        &'a self,
        filter: &'a Value,
        options: &'a FindOptions,
    ) -> BoxFuture<'a, ODataResult<Vec<Value>>>;

    /// Number of rows matching `filter`
    fn count_documents<'a>(&'a self, filter: &'a Value) -> BoxFuture<'a, ODataResult<u64>>;

    /// Whether [`Collection::aggregate`] is available
    fn supports_aggregate(&self) -> bool {
        false
    }

    /// Run an aggregation sequence
    fn aggregate<'a>(&'a self, stages: &'a [Stage]) -> BoxFuture<'a, ODataResult<Vec<Value>>> {
        let _ = stages;
        Box::pin(async move {
            Err(ODataError::server(format!(
                "collection {} does not support aggregation",
                self.name()
            )))
        })
    }

    /// Insert one document; returns it as stored
    fn insert_one(&self, doc: Value) -> BoxFuture<'_, ODataResult<Value>>;

    /// `$set` fields on the first row matching `filter`; returns rows matched
    fn update_one<'a>(
        &'a self,
        filter: &'a Value,
        set: Map<String, Value>,
    ) -> BoxFuture<'a, ODataResult<u64>>;

    /// Delete the first row matching `filter`; returns rows deleted
    fn delete_one<'a>(&'a self, filter: &'a Value) -> BoxFuture<'a, ODataResult<u64>>;
}
