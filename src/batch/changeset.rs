//! Changeset state machine
//!
//! `Pending -> Validated -> Applied | Aborted`. Validation checks every
//! precondition before any mutation runs; a failure aborts the whole group
//! with nothing written.
//!
//! This is not a transaction. Another writer can create or remove a row
//! between `validate` and `apply`; the apply pass does not re-check, and a
//! collaborator failure during apply leaves earlier mutations in place.

use std::fmt;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use super::request::OperationResponse;
use crate::config::IDENTITY_FIELD;
use crate::delta::ChangeStamp;
use crate::errors::{ODataError, ODataResult};
use crate::executor::Collection;
use crate::memory::values_equal;

/// What a single changeset operation does
#[derive(Debug, Clone, PartialEq)]
pub enum MutationKind {
    /// Insert; the row must not already exist
    Create(Map<String, Value>),
    /// `$set` on an existing row
    Update { id: Value, set: Map<String, Value> },
    /// Remove an existing row
    Delete { id: Value },
}

/// A mutation bound to its target collection and key field
#[derive(Clone)]
pub struct Mutation {
    pub target: Arc<dyn Collection>,
    pub kind: MutationKind,
    pub key_field: String,
}

impl Mutation {
    /// Mutation keyed on the storage identity field
    pub fn new(target: Arc<dyn Collection>, kind: MutationKind) -> Self {
        Self {
            target,
            kind,
            key_field: IDENTITY_FIELD.to_string(),
        }
    }

    pub fn with_key_field(mut self, key_field: impl Into<String>) -> Self {
        self.key_field = key_field.into();
        self
    }

    /// Identity the precondition is checked against
    pub fn id(&self) -> Option<&Value> {
        match &self.kind {
            MutationKind::Create(doc) => doc.get(&self.key_field).filter(|id| !id.is_null()),
            MutationKind::Update { id, .. } | MutationKind::Delete { id } => Some(id),
        }
    }

    fn key_filter(&self, id: &Value) -> Value {
        let mut filter = Map::new();
        filter.insert(self.key_field.clone(), id.clone());
        Value::Object(filter)
    }
}

impl fmt::Debug for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutation")
            .field("target", &self.target.name())
            .field("kind", &self.kind)
            .field("key_field", &self.key_field)
            .finish()
    }
}

/// Built, not yet checked
#[derive(Debug)]
pub struct Pending;

/// Every precondition held at validation time
#[derive(Debug)]
pub struct Validated;

/// Every mutation written
#[derive(Debug)]
pub struct Applied;

/// Rejected; `applied` is non-zero only when apply failed midway
#[derive(Debug)]
pub struct Aborted {
    reason: ODataError,
    applied: usize,
}

/// A group of mutations sharing one atomic group id
#[derive(Debug)]
pub struct Changeset<S> {
    group_id: String,
    mutations: Vec<Mutation>,
    state: S,
}

impl<S> Changeset<S> {
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    fn into_state<T>(self, state: T) -> Changeset<T> {
        Changeset {
            group_id: self.group_id,
            mutations: self.mutations,
            state,
        }
    }

    fn aborted(self, reason: ODataError, applied: usize) -> Changeset<Aborted> {
        self.into_state(Aborted { reason, applied })
    }
}

/// Rows the changeset itself has created or deleted so far
#[derive(Default)]
struct Overlay {
    created: Vec<(String, Value)>,
    deleted: Vec<(String, Value)>,
}

impl Overlay {
    fn contains(list: &[(String, Value)], target: &str, id: &Value) -> bool {
        list.iter()
            .any(|(t, i)| t == target && values_equal(i, id))
    }

    fn remove(list: &mut Vec<(String, Value)>, target: &str, id: &Value) {
        list.retain(|(t, i)| !(t == target && values_equal(i, id)));
    }

    async fn exists(&self, mutation: &Mutation, id: &Value) -> ODataResult<bool> {
        let target = mutation.target.as_ref();
        let name = target.name();
        if Self::contains(&self.created, name, id) {
            return Ok(true);
        }
        if Self::contains(&self.deleted, name, id) {
            return Ok(false);
        }
        Ok(target.count_documents(&mutation.key_filter(id)).await? > 0)
    }

    fn record_create(&mut self, target: &str, id: &Value) {
        Self::remove(&mut self.deleted, target, id);
        self.created.push((target.to_string(), id.clone()));
    }

    fn record_delete(&mut self, target: &str, id: &Value) {
        Self::remove(&mut self.created, target, id);
        self.deleted.push((target.to_string(), id.clone()));
    }
}

impl Changeset<Pending> {
    pub fn new(group_id: impl Into<String>, mutations: Vec<Mutation>) -> Self {
        Self {
            group_id: group_id.into(),
            mutations,
            state: Pending,
        }
    }

    /// Reject before validation, e.g. for an operation that could not be built
    pub fn abort(self, reason: ODataError) -> Changeset<Aborted> {
        self.aborted(reason, 0)
    }

    /// Check every precondition in input order.
    ///
    /// Earlier operations in the group are taken into account, so a create
    /// followed by an update of the same row validates.
    pub async fn validate(self) -> Result<Changeset<Validated>, Changeset<Aborted>> {
        let checked = check_preconditions(&self.mutations).await;
        match checked {
            Ok(()) => Ok(self.into_state(Validated)),
            Err(reason) => Err(self.aborted(reason, 0)),
        }
    }
}

async fn check_preconditions(mutations: &[Mutation]) -> ODataResult<()> {
    let mut overlay = Overlay::default();

    for mutation in mutations {
        let name = mutation.target.name();
        match &mutation.kind {
            MutationKind::Create(_) => {
                if let Some(id) = mutation.id() {
                    if overlay.exists(mutation, id).await? {
                        return Err(ODataError::bad_request("Duplicate id"));
                    }
                    overlay.record_create(name, id);
                }
            }
            MutationKind::Update { id, .. } => {
                if !overlay.exists(mutation, id).await? {
                    return Err(ODataError::not_found("Missing id"));
                }
            }
            MutationKind::Delete { id } => {
                if !overlay.exists(mutation, id).await? {
                    return Err(ODataError::not_found("Missing id"));
                }
                overlay.record_delete(name, id);
            }
        }
    }
    Ok(())
}

impl Changeset<Validated> {
    /// Write every mutation in input order, stamping the change field
    pub async fn apply(self, stamp: &ChangeStamp) -> Result<Changeset<Applied>, Changeset<Aborted>> {
        let mut applied = 0;
        let mut failure = None;
        for mutation in &self.mutations {
            if let Err(reason) = apply_one(mutation, stamp).await {
                failure = Some(reason);
                break;
            }
            applied += 1;
        }

        match failure {
            None => Ok(self.into_state(Applied)),
            Some(reason) => Err(self.aborted(reason, applied)),
        }
    }
}

async fn apply_one(mutation: &Mutation, stamp: &ChangeStamp) -> ODataResult<()> {
    let target = mutation.target.as_ref();
    match &mutation.kind {
        MutationKind::Create(doc) => {
            let mut doc = doc.clone();
            stamp.stamp(&mut doc);
            target.insert_one(Value::Object(doc)).await?;
        }
        MutationKind::Update { id, set } => {
            let mut set = set.clone();
            stamp.stamp(&mut set);
            target.update_one(&mutation.key_filter(id), set).await?;
        }
        MutationKind::Delete { id } => {
            target.delete_one(&mutation.key_filter(id)).await?;
        }
    }
    Ok(())
}

impl Changeset<Applied> {
    pub fn response(&self) -> OperationResponse {
        OperationResponse::new(
            200,
            json!({ "atomicGroup": self.group_id, "success": true }),
        )
    }
}

impl Changeset<Aborted> {
    pub fn reason(&self) -> &ODataError {
        &self.state.reason
    }

    /// Mutations written before the failure
    pub fn applied(&self) -> usize {
        self.state.applied
    }

    pub fn response(&self) -> OperationResponse {
        let reason = &self.state.reason;
        OperationResponse::new(
            reason.status_code().as_u16(),
            json!({
                "atomicGroup": self.group_id,
                "error": { "code": reason.code(), "message": reason.message() },
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::ManualClock;
    use crate::memory::{MemoryCollection, MemoryStore};

    fn orders() -> Arc<MemoryCollection> {
        let orders = MemoryStore::new().collection("orders").unwrap();
        orders
            .insert_many(vec![json!({"_id": 1, "name": "Alpha"}), json!({"_id": 2, "name": "Beta"})])
            .unwrap();
        Arc::new(orders)
    }

    fn stamp() -> ChangeStamp {
        ChangeStamp::new(Arc::new(ManualClock::new(500)), "_updatedAtMs")
    }

    fn create(target: &Arc<MemoryCollection>, doc: Value) -> Mutation {
        let Value::Object(doc) = doc else { panic!("object expected") };
        Mutation::new(target.clone(), MutationKind::Create(doc))
    }

    fn update(target: &Arc<MemoryCollection>, id: Value, set: Value) -> Mutation {
        let Value::Object(set) = set else { panic!("object expected") };
        Mutation::new(target.clone(), MutationKind::Update { id, set })
    }

    fn delete(target: &Arc<MemoryCollection>, id: Value) -> Mutation {
        Mutation::new(target.clone(), MutationKind::Delete { id })
    }

    #[tokio::test]
    async fn test_validate_then_apply() {
        let orders = orders();
        let changeset = Changeset::new(
            "g1",
            vec![
                create(&orders, json!({"_id": 3, "name": "Gamma"})),
                update(&orders, json!(1), json!({"name": "Alpha2"})),
                delete(&orders, json!(2)),
            ],
        );

        let applied = changeset.validate().await.unwrap().apply(&stamp()).await.unwrap();
        assert_eq!(applied.response().status, 200);
        assert_eq!(
            applied.response().body,
            json!({"atomicGroup": "g1", "success": true})
        );

        let rows = orders.all().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["name"], json!("Alpha2"));
        assert_eq!(rows[0]["_updatedAtMs"], json!(500));
        assert_eq!(rows[1]["_id"], json!(3));
    }

    #[tokio::test]
    async fn test_duplicate_create_aborts_whole_group() {
        let orders = orders();
        let changeset = Changeset::new(
            "g1",
            vec![
                update(&orders, json!(1), json!({"name": "Changed"})),
                create(&orders, json!({"_id": 2, "name": "Dup"})),
            ],
        );

        let aborted = changeset.validate().await.unwrap_err();
        assert_eq!(aborted.reason(), &ODataError::bad_request("Duplicate id"));
        assert_eq!(aborted.applied(), 0);
        assert_eq!(aborted.response().status, 400);
        assert_eq!(aborted.response().body["atomicGroup"], json!("g1"));
        assert_eq!(orders.all().unwrap()[0]["name"], json!("Alpha"));
    }

    #[tokio::test]
    async fn test_missing_row_is_not_found() {
        let orders = orders();
        let aborted = Changeset::new("g", vec![delete(&orders, json!(99))])
            .validate()
            .await
            .unwrap_err();
        assert_eq!(aborted.response().status, 404);
        assert_eq!(orders.len().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_earlier_operations_are_visible_to_validation() {
        let orders = orders();
        let ok = Changeset::new(
            "g",
            vec![
                create(&orders, json!({"_id": 5})),
                update(&orders, json!(5), json!({"name": "Five"})),
            ],
        )
        .validate()
        .await;
        assert!(ok.is_ok());

        let twice = Changeset::new(
            "g",
            vec![
                create(&orders, json!({"_id": 6})),
                create(&orders, json!({"_id": 6})),
            ],
        )
        .validate()
        .await;
        assert!(twice.is_err());

        let after_delete = Changeset::new(
            "g",
            vec![delete(&orders, json!(1)), update(&orders, json!(1), json!({}))],
        )
        .validate()
        .await;
        assert!(after_delete.is_err());
    }

    #[tokio::test]
    async fn test_custom_key_field() {
        let items = Arc::new(MemoryStore::new().collection("items").unwrap());
        items
            .insert_many(vec![json!({"_id": 1, "sku": "A1"}), json!({"_id": 2, "sku": "B2"})])
            .unwrap();
        let keyed = |m: Mutation| m.with_key_field("sku");

        let duplicate = Changeset::new("g", vec![keyed(create(&items, json!({"_id": 9, "sku": "A1"})))])
            .validate()
            .await
            .unwrap_err();
        assert_eq!(duplicate.response().status, 400);

        let missing = Changeset::new("g", vec![keyed(delete(&items, json!(1)))])
            .validate()
            .await
            .unwrap_err();
        assert_eq!(missing.response().status, 404);

        let applied = Changeset::new(
            "g",
            vec![
                keyed(update(&items, json!("A1"), json!({"name": "Anvil"}))),
                keyed(delete(&items, json!("B2"))),
            ],
        )
        .validate()
        .await
        .unwrap()
        .apply(&stamp())
        .await
        .unwrap();
        assert_eq!(applied.len(), 2);

        let rows = items.all().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], json!("Anvil"));
    }

    #[tokio::test]
    async fn test_manual_abort() {
        let orders = orders();
        let aborted = Changeset::new("g", vec![delete(&orders, json!(1))])
            .abort(ODataError::not_found("Unknown URL"));
        assert_eq!(aborted.response().status, 404);
        assert_eq!(aborted.len(), 1);
        assert_eq!(orders.len().unwrap(), 2);
    }
}
