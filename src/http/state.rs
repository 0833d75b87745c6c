//! Shared handler state

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::batch::{BatchCoordinator, EntityTarget};
use crate::coercion::{CoercionFailure, DateCoercer};
use crate::config::{EntitySetConfig, ServerConfig};
use crate::delta::DeltaTracker;
use crate::errors::{ODataError, ODataResult};
use crate::executor::{Collection, QueryExecutor};
use crate::memory::MemoryStore;
use crate::metadata::{EntitySetMetadata, MetadataDocument};
use crate::observability::Event;
use crate::query::ODataParser;

/// One routable entity set
#[derive(Clone)]
pub struct EntitySetState {
    pub config: EntitySetConfig,
    pub collection: Arc<dyn Collection>,
}

impl EntitySetState {
    /// Storage field a URL key is matched against
    pub fn key_field(&self) -> String {
        self.config
            .field_map()
            .remove(&self.config.key)
            .unwrap_or_else(|| self.config.key.clone())
    }

    /// Result date coercion, when configured; failures are logged
    pub fn date_coercer(&self) -> Option<DateCoercer> {
        let options = self.config.date_coercion.clone()?;
        let set = self.config.name.clone();
        Some(DateCoercer::new(options).with_on_error(Arc::new(
            move |failure: &CoercionFailure| {
                warn!(
                    event = %Event::DateCoercionFailed,
                    entity_set = %set,
                    row = failure.row_index,
                    field = %failure.field,
                    error = %failure.error,
                    "date coercion failed"
                );
            },
        )))
    }
}

/// State shared by every OData handler
#[derive(Clone)]
pub struct ODataState {
    pub base_path: String,
    pub sets: HashMap<String, EntitySetState>,
    pub executor: QueryExecutor,
    pub parser: ODataParser,
    pub delta: DeltaTracker,
    pub batch: BatchCoordinator,
    pub metadata: MetadataDocument,
}

impl ODataState {
    pub fn new(base_path: &str, delta: DeltaTracker) -> Self {
        let base_path = base_path.trim_end_matches('/').to_string();
        let batch = BatchCoordinator::new(base_path.clone(), delta.change_stamp().clone());
        Self {
            base_path,
            sets: HashMap::new(),
            executor: QueryExecutor::new(),
            parser: ODataParser::new(),
            delta,
            batch,
            metadata: MetadataDocument::new("Default", "Container"),
        }
    }

    pub fn with_metadata_names(mut self, namespace: &str, container: &str) -> Self {
        self.metadata.namespace = namespace.to_string();
        self.metadata.container = container.to_string();
        self
    }

    /// Expose a collection as an entity set
    pub fn with_entity_set(mut self, config: EntitySetConfig, collection: Arc<dyn Collection>) -> Self {
        self.metadata = self.metadata.with_entity_set(EntitySetMetadata {
            entity_set: config.name.clone(),
            entity_type: config.entity_type_name(),
            key: config.key.clone(),
            properties: config.resolved_properties(),
        });
        let entity = EntitySetState { config, collection };
        self.batch = self.batch.with_target(
            EntityTarget::new(
                entity.config.name.clone(),
                entity.collection.clone(),
                entity.config.execution_config(None),
            )
            .with_key_field(entity.key_field()),
        );
        self.sets.insert(entity.config.name.clone(), entity);
        self
    }

    /// Build from server configuration, backing every set with `store`.
    ///
    /// Seed documents are inserted before the state is returned.
    pub fn from_config(config: &ServerConfig, store: &MemoryStore) -> ODataResult<Self> {
        let delta = DeltaTracker::default().with_change_field(&config.change_field);
        let mut state = Self::new(config.normalized_base(), delta)
            .with_metadata_names(&config.metadata.namespace, &config.metadata.container);

        for set in &config.entity_sets {
            let collection = store.collection(set.collection_name())?;
            if !set.seed.is_empty() {
                collection.insert_many(set.seed.iter().cloned())?;
            }
            state = state.with_entity_set(set.clone(), Arc::new(collection));
        }
        Ok(state)
    }

    pub fn entity_set(&self, name: &str) -> ODataResult<&EntitySetState> {
        self.sets
            .get(name)
            .ok_or_else(|| ODataError::not_found(format!("Unknown entity set {}", name)))
    }
}
