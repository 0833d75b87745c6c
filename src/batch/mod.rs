//! # Batch
//!
//! JSON `$batch` processing: ungrouped operations execute independently,
//! operations sharing an `atomicGroup` form a changeset that is validated
//! as a unit before any of its mutations are applied.

mod changeset;
mod coordinator;
mod request;

pub use changeset::{Aborted, Applied, Changeset, Mutation, MutationKind, Pending, Validated};
pub use coordinator::{BatchCoordinator, EntityTarget};
pub use request::{cast_id, key_from_path, BatchOperation, BatchRequest, BatchResponse, Method, OperationResponse};
