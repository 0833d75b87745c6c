//! Batch coordinator
//!
//! Ungrouped operations run first, strictly in input order, each with its
//! own status. Changesets follow in order of first appearance, one combined
//! response per group.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{info, warn};

use super::changeset::{Changeset, Mutation, MutationKind};
use super::request::{key_from_path, BatchOperation, BatchRequest, BatchResponse, Method, OperationResponse};
use crate::config::{ExecutionConfig, IDENTITY_FIELD};
use crate::delta::ChangeStamp;
use crate::errors::{ODataError, ODataResult};
use crate::executor::{Collection, QueryExecutor};
use crate::observability::{Event, ObservationTimer};
use crate::query::{ODataParser, QueryParser};

/// An entity set reachable from batch URLs
#[derive(Clone)]
pub struct EntityTarget {
    pub name: String,
    pub collection: Arc<dyn Collection>,
    pub config: ExecutionConfig,
    /// Storage field that URL and body keys are matched against
    pub key_field: String,
}

impl EntityTarget {
    pub fn new(
        name: impl Into<String>,
        collection: Arc<dyn Collection>,
        config: ExecutionConfig,
    ) -> Self {
        Self {
            name: name.into(),
            collection,
            config,
            key_field: IDENTITY_FIELD.to_string(),
        }
    }

    pub fn with_key_field(mut self, key_field: impl Into<String>) -> Self {
        self.key_field = key_field.into();
        self
    }

    /// The key of the addressed row: from the URL, else from the body
    fn operation_id(&self, op: &BatchOperation, rest: &str) -> Option<Value> {
        key_from_path(rest).or_else(|| op.body_id(&self.key_field))
    }

    fn key_filter(&self, id: Value) -> Value {
        let mut filter = Map::new();
        filter.insert(self.key_field.clone(), id);
        Value::Object(filter)
    }

    /// Body fields to `$set`, minus the identity and key fields
    fn update_fields(&self, op: &BatchOperation) -> ODataResult<Map<String, Value>> {
        let mut set = body_object(op)?;
        set.remove(IDENTITY_FIELD);
        set.remove(&self.key_field);
        Ok(set)
    }
}

/// Executes `$batch` requests. Holds no state between requests.
#[derive(Clone)]
pub struct BatchCoordinator {
    base_path: String,
    targets: Vec<EntityTarget>,
    executor: QueryExecutor,
    parser: Arc<dyn QueryParser>,
    stamp: ChangeStamp,
}

impl BatchCoordinator {
    pub fn new(base_path: impl Into<String>, stamp: ChangeStamp) -> Self {
        let base_path: String = base_path.into();
        Self {
            base_path: base_path.trim_end_matches('/').to_string(),
            targets: Vec::new(),
            executor: QueryExecutor::new(),
            parser: Arc::new(ODataParser::new()),
            stamp,
        }
    }

    pub fn with_target(mut self, target: EntityTarget) -> Self {
        self.targets.push(target);
        self
    }

    pub fn with_executor(mut self, executor: QueryExecutor) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_parser(mut self, parser: Arc<dyn QueryParser>) -> Self {
        self.parser = parser;
        self
    }

    /// Run every operation and collect one response per operation or group
    pub async fn process(&self, request: BatchRequest) -> BatchResponse {
        let timer = ObservationTimer::start();
        let (singles, groups) = partition(request.requests);
        let mut responses = Vec::with_capacity(singles.len() + groups.len());

        for op in &singles {
            responses.push(self.execute_single(op).await);
        }
        for (group_id, ops) in groups {
            responses.push(self.execute_changeset(group_id, &ops).await);
        }

        info!(
            event = %Event::BatchProcessed,
            operations = singles.len(),
            changesets = responses.len() - singles.len(),
            failed = responses.iter().filter(|r| !r.is_success()).count(),
            duration_ms = timer.elapsed_ms(),
            "batch processed"
        );
        BatchResponse { responses }
    }

    async fn execute_single(&self, op: &BatchOperation) -> OperationResponse {
        let Some((target, rest)) = self.route(&op.url) else {
            return OperationResponse::error(&ODataError::not_found("Unknown URL"));
        };

        let outcome = match op.method() {
            Ok(Method::Get) => self.read(target, op).await,
            Ok(Method::Post) => self.create(target, op).await,
            Ok(Method::Patch) => self.update(target, op, rest).await,
            Ok(Method::Delete) => self.delete(target, op, rest).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(response) => response,
            Err(err) => {
                warn!(url = %op.url, method = %op.method_name(), error = %err, "batch operation failed");
                OperationResponse::error(&err)
            }
        }
    }

    async fn read(&self, target: &EntityTarget, op: &BatchOperation) -> ODataResult<OperationResponse> {
        let query = self.parser.parse(&op.url);
        let base_url = op.url.split('?').next().unwrap_or_default();
        let config = target.config.clone().with_base_url(base_url);

        let envelope = self
            .executor
            .execute(&query, target.collection.as_ref(), &config)
            .await?;
        Ok(OperationResponse::new(200, serde_json::to_value(envelope)?))
    }

    async fn create(&self, target: &EntityTarget, op: &BatchOperation) -> ODataResult<OperationResponse> {
        let mut doc = body_object(op)?;
        self.stamp.stamp(&mut doc);
        let stored = target.collection.insert_one(Value::Object(doc)).await?;
        Ok(OperationResponse::new(201, stored))
    }

    async fn update(
        &self,
        target: &EntityTarget,
        op: &BatchOperation,
        rest: &str,
    ) -> ODataResult<OperationResponse> {
        let id = target
            .operation_id(op, rest)
            .ok_or_else(|| ODataError::bad_request("Missing id for PATCH"))?;
        let mut set = target.update_fields(op)?;
        self.stamp.stamp(&mut set);
        target
            .collection
            .update_one(&target.key_filter(id), set)
            .await?;
        Ok(OperationResponse::no_content())
    }

    async fn delete(
        &self,
        target: &EntityTarget,
        op: &BatchOperation,
        rest: &str,
    ) -> ODataResult<OperationResponse> {
        let id = target
            .operation_id(op, rest)
            .ok_or_else(|| ODataError::bad_request("Missing id for DELETE"))?;
        target.collection.delete_one(&target.key_filter(id)).await?;
        Ok(OperationResponse::no_content())
    }

    async fn execute_changeset(&self, group_id: String, ops: &[BatchOperation]) -> OperationResponse {
        let mutations: ODataResult<Vec<Mutation>> = ops.iter().map(|op| self.mutation(op)).collect();

        let validated = match mutations {
            Ok(mutations) => Changeset::new(group_id, mutations).validate().await,
            Err(reason) => Err(Changeset::new(group_id, Vec::new()).abort(reason)),
        };
        let applied = match validated {
            Ok(changeset) => changeset.apply(&self.stamp).await,
            Err(aborted) => Err(aborted),
        };

        match applied {
            Ok(changeset) => {
                info!(
                    event = %Event::ChangesetApplied,
                    group = changeset.group_id(),
                    operations = changeset.len(),
                    "changeset applied"
                );
                changeset.response()
            }
            Err(aborted) => {
                warn!(
                    event = %Event::ChangesetAborted,
                    group = aborted.group_id(),
                    applied = aborted.applied(),
                    reason = %aborted.reason(),
                    "changeset aborted"
                );
                aborted.response()
            }
        }
    }

    /// Build a changeset mutation from one operation
    fn mutation(&self, op: &BatchOperation) -> ODataResult<Mutation> {
        let method = op.method()?;
        if !method.is_mutation() {
            return Err(ODataError::bad_request("Invalid method in changeset"));
        }
        let (target, rest) = self
            .route(&op.url)
            .ok_or_else(|| ODataError::not_found("Unknown URL"))?;

        let kind = match method {
            Method::Post => MutationKind::Create(body_object(op)?),
            Method::Patch => MutationKind::Update {
                id: target
                    .operation_id(op, rest)
                    .ok_or_else(|| ODataError::not_found("Missing id"))?,
                set: target.update_fields(op)?,
            },
            _ => MutationKind::Delete {
                id: target
                    .operation_id(op, rest)
                    .ok_or_else(|| ODataError::not_found("Missing id"))?,
            },
        };
        Ok(Mutation::new(target.collection.clone(), kind).with_key_field(&target.key_field))
    }

    /// The target whose path prefixes `url`, and the remainder after it
    fn route<'u>(&self, url: &'u str) -> Option<(&EntityTarget, &'u str)> {
        let path = url.strip_prefix(self.base_path.as_str())?.strip_prefix('/')?;
        self.targets
            .iter()
            .filter_map(|target| {
                let rest = path.strip_prefix(target.name.as_str())?;
                let boundary = rest.is_empty() || rest.starts_with(['?', '/', '(']);
                boundary.then_some((target, rest))
            })
            .max_by_key(|(target, _)| target.name.len())
    }
}

/// Split into ungrouped operations and groups in first-appearance order
fn partition(requests: Vec<BatchOperation>) -> (Vec<BatchOperation>, Vec<(String, Vec<BatchOperation>)>) {
    let mut singles = Vec::new();
    let mut groups: Vec<(String, Vec<BatchOperation>)> = Vec::new();

    for op in requests {
        match op.group().map(str::to_string) {
            None => singles.push(op),
            Some(group) => match groups.iter_mut().find(|(id, _)| *id == group) {
                Some((_, ops)) => ops.push(op),
                None => groups.push((group, vec![op])),
            },
        }
    }
    (singles, groups)
}

fn body_object(op: &BatchOperation) -> ODataResult<Map<String, Value>> {
    match &op.body {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(doc)) => Ok(doc.clone()),
        Some(_) => Err(ODataError::bad_request("Request body must be a JSON object")),
    }
}
