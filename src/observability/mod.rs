//! # Observability
//!
//! Structured logging for the query engine.
//!
//! Every lifecycle point emits a `tracing` event named by [`Event`], with
//! typed key/value fields. The engine never writes to stdout directly.
//!
//! ```ignore
//! use odataquery::observability::{init_tracing, Event};
//!
//! init_tracing("info", false);
//! tracing::info!(event = %Event::QueryExecuted, rows = 42, "query executed");
//! ```

mod events;
mod logger;
mod scope;

pub use events::Event;
pub use logger::init_tracing;
pub use scope::ObservationTimer;
