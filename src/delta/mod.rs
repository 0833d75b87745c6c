//! # Delta Sync
//!
//! Change tracking through opaque checkpoints. The tracker keeps only
//! watermarks; row-level change detection relies on a per-row timestamp
//! field maintained by every write path through [`ChangeStamp`].

mod clock;
mod store;
mod tracker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use store::{CheckpointStore, DeltaCheckpoint, InMemoryCheckpointStore};
pub use tracker::{delta_link, ChangeStamp, DeltaTracker};
