//! # Configuration
//!
//! Per-call execution configuration and the server's file-based
//! configuration. Neither is ever mutated by the engine.

pub mod execution;
pub mod server;

pub use execution::{
    ErrorHook, ExecutedHook, ExecutionConfig, ExecutionInfo, FilterTransform, Hooks, JoinSpec,
    Limits, ParsedHook, SearchConfig, SecurityPolicy, DEFAULT_MAX_TOP,
};
pub use server::{
    EntitySetConfig, MetadataConfig, ServerConfig, DEFAULT_CHANGE_FIELD, IDENTITY_FIELD,
};
