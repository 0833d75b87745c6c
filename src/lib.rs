//! odataquery - OData v4 query surface over document collections
//!
//! Turns OData system query options into native document-store plans and
//! runs them against a [`executor::Collection`]:
//!
//! - [`query`]: raw URL to [`query::QueryDescription`]
//! - [`filter`]: `$filter` to a native predicate tree
//! - [`plan`]: description to a direct query or aggregation sequence
//! - [`executor`]: plan execution and the result envelope
//! - [`delta`]: change-tracking checkpoints
//! - [`batch`]: JSON `$batch` with validate-then-apply changesets
//! - [`coercion`]: optional date normalization of result rows
//!
//! [`memory`] provides an in-process collection and [`http`] the axum
//! bindings used by the `odataquery` binary.

pub mod batch;
pub mod cli;
pub mod coercion;
pub mod config;
pub mod delta;
pub mod errors;
pub mod executor;
pub mod filter;
pub mod http;
pub mod memory;
pub mod metadata;
pub mod observability;
pub mod plan;
pub mod query;

pub use errors::{ODataError, ODataResult};
