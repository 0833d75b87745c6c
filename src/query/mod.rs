//! # Query Parser
//!
//! Turns a raw OData query string into a [`QueryDescription`].
//!
//! Parsing is pure and never fails: malformed parameters are dropped and
//! the raw `$filter` is passed through for the filter compiler to judge.

pub mod compute;
pub mod description;
pub mod params;
pub mod parser;

pub use compute::{
    ArgKind, ComputeClause, ComputeExpr, ComputeFunction, FunctionSpec, MAX_CALL_DEPTH,
};
pub use description::{
    Aggregate, AggregateOp, ApplyClause, ExpandRequest, FilterInput, OrderByField,
    QueryDescription, SortDirection,
};
pub use params::QueryParams;
pub use parser::{ODataParser, QueryParser, UNSUPPORTED_FILTER_MARKERS};
