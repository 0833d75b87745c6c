//! In-memory document store
//!
//! Collections are shared, lock-protected row vectors. Reads take a
//! snapshot and release the lock before evaluating, so a `$lookup` into
//! another collection (or the same one) never waits on a held lock.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::{Map, Value};
use uuid::Uuid;

use super::aggregate::{filter_rows, run_pipeline, LookupSource};
use super::matcher::PredicateMatcher;
use super::value::{set_path, values_equal};
use crate::config::IDENTITY_FIELD;
use crate::errors::{ODataError, ODataResult};
use crate::executor::{BoxFuture, Collection};
use crate::plan::{FindOptions, Stage};

type Rows = Arc<RwLock<Vec<Value>>>;

fn read(rows: &RwLock<Vec<Value>>) -> ODataResult<RwLockReadGuard<'_, Vec<Value>>> {
    rows.read()
        .map_err(|_| ODataError::server("collection lock poisoned"))
}

fn write(rows: &RwLock<Vec<Value>>) -> ODataResult<RwLockWriteGuard<'_, Vec<Value>>> {
    rows.write()
        .map_err(|_| ODataError::server("collection lock poisoned"))
}

/// A set of named collections
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    collections: Arc<RwLock<HashMap<String, Rows>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to the named collection, created empty on first use
    pub fn collection(&self, name: &str) -> ODataResult<MemoryCollection> {
        let mut collections = self
            .collections
            .write()
            .map_err(|_| ODataError::server("store lock poisoned"))?;
        let rows = collections
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(Vec::new())))
            .clone();

        Ok(MemoryCollection {
            name: name.to_string(),
            rows,
            store: self.clone(),
            aggregate_enabled: true,
        })
    }

    /// Collection names, sorted
    pub fn collection_names(&self) -> ODataResult<Vec<String>> {
        let collections = self
            .collections
            .read()
            .map_err(|_| ODataError::server("store lock poisoned"))?;
        let mut names: Vec<String> = collections.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

impl LookupSource for MemoryStore {
    fn snapshot(&self, collection: &str) -> ODataResult<Vec<Value>> {
        let rows = {
            let collections = self
                .collections
                .read()
                .map_err(|_| ODataError::server("store lock poisoned"))?;
            match collections.get(collection) {
                Some(rows) => rows.clone(),
                None => return Ok(Vec::new()),
            }
        };
        let guard = read(&rows)?;
        Ok(guard.clone())
    }
}

/// One collection in a [`MemoryStore`]
#[derive(Debug, Clone)]
pub struct MemoryCollection {
    name: String,
    rows: Rows,
    store: MemoryStore,
    aggregate_enabled: bool,
}

impl MemoryCollection {
    /// Handle that reports no aggregation capability
    pub fn without_aggregation(mut self) -> Self {
        self.aggregate_enabled = false;
        self
    }

    /// Insert several documents; stops at the first failure
    pub fn insert_many<I>(&self, docs: I) -> ODataResult<usize>
    where
        I: IntoIterator<Item = Value>,
    {
        let mut inserted = 0;
        for doc in docs {
            self.insert_sync(doc)?;
            inserted += 1;
        }
        Ok(inserted)
    }

    /// Every row, in insertion order
    pub fn all(&self) -> ODataResult<Vec<Value>> {
        Ok(read(&self.rows)?.clone())
    }

    pub fn len(&self) -> ODataResult<usize> {
        Ok(read(&self.rows)?.len())
    }

    pub fn is_empty(&self) -> ODataResult<bool> {
        Ok(self.len()? == 0)
    }

    fn insert_sync(&self, doc: Value) -> ODataResult<Value> {
        let Value::Object(mut fields) = doc else {
            return Err(ODataError::bad_request("document must be a JSON object"));
        };
        let id = fields
            .entry(IDENTITY_FIELD.to_string())
            .or_insert_with(|| Value::String(Uuid::new_v4().to_string()))
            .clone();

        let mut rows = write(&self.rows)?;
        if rows
            .iter()
            .any(|row| row.get(IDENTITY_FIELD).is_some_and(|existing| values_equal(existing, &id)))
        {
            return Err(ODataError::bad_request(format!(
                "duplicate key {} in collection {}",
                id, self.name
            )));
        }

        let doc = Value::Object(fields);
        rows.push(doc.clone());
        Ok(doc)
    }

    fn position(rows: &[Value], filter: &Value) -> ODataResult<Option<usize>> {
        for (i, row) in rows.iter().enumerate() {
            if PredicateMatcher::matches(row, filter)? {
                return Ok(Some(i));
            }
        }
        Ok(None)
    }

    fn find_sync(&self, filter: &Value, options: &FindOptions) -> ODataResult<Vec<Value>> {
        let mut stages = vec![Stage::Match(filter.clone())];
        if !options.sort.is_empty() {
            stages.push(Stage::Sort(options.sort.clone()));
        }
        if let Some(skip) = options.skip {
            stages.push(Stage::Skip(skip));
        }
        if let Some(limit) = options.limit {
            stages.push(Stage::Limit(limit));
        }
        if let Some(projection) = &options.projection {
            stages.push(Stage::Project(projection.clone()));
        }
        run_pipeline(self.all()?, &stages, &self.store)
    }
}

impl Collection for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn find<'a>(
        &'a self,
        filter: &'a Value,
        options: &'a FindOptions,
    ) -> BoxFuture<'a, ODataResult<Vec<Value>>> {
        Box::pin(async move { self.find_sync(filter, options) })
    }

    fn count_documents<'a>(&'a self, filter: &'a Value) -> BoxFuture<'a, ODataResult<u64>> {
        Box::pin(async move { Ok(filter_rows(self.all()?, filter)?.len() as u64) })
    }

    fn supports_aggregate(&self) -> bool {
        self.aggregate_enabled
    }

    fn aggregate<'a>(&'a self, stages: &'a [Stage]) -> BoxFuture<'a, ODataResult<Vec<Value>>> {
        Box::pin(async move {
            if !self.aggregate_enabled {
                return Err(ODataError::server(format!(
                    "collection {} does not support aggregation",
                    self.name
                )));
            }
            run_pipeline(self.all()?, stages, &self.store)
        })
    }

    fn insert_one(&self, doc: Value) -> BoxFuture<'_, ODataResult<Value>> {
        Box::pin(async move { self.insert_sync(doc) })
    }

    fn update_one<'a>(
        &'a self,
        filter: &'a Value,
        set: Map<String, Value>,
    ) -> BoxFuture<'a, ODataResult<u64>> {
        Box::pin(async move {
            let mut rows = write(&self.rows)?;
            let Some(index) = Self::position(&rows, filter)? else {
                return Ok(0);
            };
            for (path, value) in set {
                set_path(&mut rows[index], &path, value);
            }
            Ok(1)
        })
    }

    fn delete_one<'a>(&'a self, filter: &'a Value) -> BoxFuture<'a, ODataResult<u64>> {
        Box::pin(async move {
            let mut rows = write(&self.rows)?;
            match Self::position(&rows, filter)? {
                Some(index) => {
                    rows.remove(index);
                    Ok(1)
                }
                None => Ok(0),
            }
        })
    }
}
