//! Observable events
//!
//! Events are explicit and typed so log consumers can key on a stable name.

use std::fmt;

/// Observable events in the query engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Query path
    /// Raw query string turned into a query description
    QueryParsed,
    /// Plan executed and envelope assembled
    QueryExecuted,
    /// Filter rejected by length, grammar, or operator allow-list
    FilterRejected,
    /// Collection cannot aggregate; pipeline form degraded to a direct query
    AggregateFallback,
    /// A configured date field held a value that could not be converted
    DateCoercionFailed,

    // Delta sync
    /// Checkpoint minted
    DeltaInitiated,
    /// Changes since a checkpoint returned
    DeltaResolved,

    // Batch
    /// Batch request fully processed
    BatchProcessed,
    /// Changeset validated and applied
    ChangesetApplied,
    /// Changeset rejected during validation
    ChangesetAborted,

    // Lifecycle
    /// HTTP server bound and serving
    ServerStarted,
}

impl Event {
    /// Returns the stable event name
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::QueryParsed => "query_parsed",
            Event::QueryExecuted => "query_executed",
            Event::FilterRejected => "filter_rejected",
            Event::AggregateFallback => "aggregate_fallback",
            Event::DateCoercionFailed => "date_coercion_failed",
            Event::DeltaInitiated => "delta_initiated",
            Event::DeltaResolved => "delta_resolved",
            Event::BatchProcessed => "batch_processed",
            Event::ChangesetApplied => "changeset_applied",
            Event::ChangesetAborted => "changeset_aborted",
            Event::ServerStarted => "server_started",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
