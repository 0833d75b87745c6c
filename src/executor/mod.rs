//! # Executor
//!
//! Runs compiled plans against a [`Collection`] and assembles the
//! [`ResultEnvelope`].
//!
//! The count is always a separate query; it is never derived from the
//! returned page.

mod collection;
mod executor;
mod result;

pub use collection::{BoxFuture, Collection};
pub use executor::QueryExecutor;
pub use result::ResultEnvelope;
