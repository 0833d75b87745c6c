//! Query executor
//!
//! Execution flow:
//! 1. Invoke the on-parsed hook
//! 2. Compile the plan (direct or pipeline, per collection capability)
//! 3. Run it
//! 4. Issue the count query when `$count=true`
//! 5. Build the continuation link
//! 6. Invoke the on-executed hook

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::collection::Collection;
use super::result::ResultEnvelope;
use crate::config::{ExecutionConfig, ExecutionInfo};
use crate::errors::{ODataError, ODataResult};
use crate::filter::{FilterGrammar, ODataFilterGrammar};
use crate::observability::{Event, ObservationTimer};
use crate::plan::{next_link, CompiledPlan, PipelineCompiler, PlanForm};
use crate::query::QueryDescription;

/// Executes query descriptions against collections.
///
/// Holds no per-request state; one instance serves every request.
#[derive(Clone)]
pub struct QueryExecutor {
    grammar: Arc<dyn FilterGrammar>,
}

impl Default for QueryExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryExecutor {
    /// Executor using the built-in filter grammar
    pub fn new() -> Self {
        Self {
            grammar: Arc::new(ODataFilterGrammar),
        }
    }

    /// Executor using a caller-supplied filter grammar
    pub fn with_grammar(grammar: Arc<dyn FilterGrammar>) -> Self {
        Self { grammar }
    }

    /// Compile without executing
    pub fn plan(
        &self,
        query: &QueryDescription,
        config: &ExecutionConfig,
        aggregate_supported: bool,
    ) -> ODataResult<CompiledPlan> {
        PipelineCompiler::new(self.grammar.as_ref(), config)
            .with_aggregate_support(aggregate_supported)
            .compile(query)
    }

    /// Execute a query and assemble the result envelope.
    ///
    /// Filter failures invoke the on-error hook and surface as `BadRequest`.
    /// Failures from the collection calls surface as `ServerError`.
    pub async fn execute(
        &self,
        query: &QueryDescription,
        collection: &dyn Collection,
        config: &ExecutionConfig,
    ) -> ODataResult<ResultEnvelope> {
        let timer = ObservationTimer::start();

        debug!(event = %Event::QueryParsed, collection = collection.name(), query = ?query, "query parsed");
        if let Some(hook) = &config.hooks.on_parsed {
            hook(query);
        }

        let plan = match self.plan(query, config, collection.supports_aggregate()) {
            Ok(plan) => plan,
            Err(err) => {
                warn!(
                    event = %Event::FilterRejected,
                    collection = collection.name(),
                    error = %err,
                    "filter rejected"
                );
                if let Some(hook) = &config.hooks.on_error {
                    hook(&err);
                }
                return Err(err);
            }
        };

        let rows = match &plan.form {
            PlanForm::Direct(options) => collection.find(&plan.filter, options).await,
            PlanForm::Pipeline(stages) => collection.aggregate(stages).await,
        }
        .map_err(|e| execution_failure(collection.name(), e))?;

        // Never derived from the page: rows may be truncated
        let count = if query.count == Some(true) {
            let total = collection
                .count_documents(&plan.count_filter)
                .await
                .map_err(|e| execution_failure(collection.name(), e))?;
            Some(total)
        } else {
            None
        };

        let next_link = next_link(query, config.base_url.as_deref(), rows.len());

        let duration_ms = timer.elapsed_ms();
        if let Some(hook) = &config.hooks.on_executed {
            hook(&ExecutionInfo {
                query,
                duration_ms,
                result_count: rows.len(),
            });
        }
        info!(
            event = %Event::QueryExecuted,
            collection = collection.name(),
            rows = rows.len(),
            pipeline = plan.is_pipeline(),
            duration_ms,
            "query executed"
        );

        Ok(ResultEnvelope {
            rows,
            count,
            next_link,
        })
    }
}

/// Collection failures are opaque to the caller
fn execution_failure(collection: &str, err: ODataError) -> ODataError {
    warn!(collection, error = %err, "query execution failed");
    match err {
        ODataError::ServerError(_) => err,
        other => ODataError::server(other.to_string()),
    }
}
