//! # Query Plans
//!
//! Compilation of a query description into the stages executed against a
//! collection, plus the pagination policy shared with the executor.

pub mod catalogue;
pub mod compiler;
pub mod paging;
pub mod stage;

pub use catalogue::{ComputeLowering, TEMP_FIELD_PREFIX};
pub use compiler::{build_projection, CompiledPlan, FindOptions, PipelineCompiler, PlanForm};
pub use paging::{effective_limit, effective_skip, next_link};
pub use stage::{Accumulator, Projection, ProjectionValue, Stage};
