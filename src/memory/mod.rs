//! # In-Memory Store
//!
//! A document store implementing the [`Collection`](crate::executor::Collection)
//! capability: predicate matching, sorting, projection, and an aggregation
//! engine covering every stage and expression the plan compiler emits.
//!
//! Backs the `odataquery serve` binary and the test suites.

mod aggregate;
mod expr;
mod matcher;
mod store;
mod value;

pub use aggregate::{run_pipeline, LookupSource};
pub use expr::{evaluate, parse_date};
pub use matcher::PredicateMatcher;
pub use store::{MemoryCollection, MemoryStore};
pub use value::{compare_values, get_path, set_path, values_equal};
