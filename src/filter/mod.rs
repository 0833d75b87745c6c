//! # Filter Compiler
//!
//! Raw `$filter` text or a pre-built tree → native predicate.
//!
//! The grammar produces the tree; this module adds the local passes:
//! length limit, operator allow-list, field-name remapping, and the
//! caller's post-transform.

pub mod compiler;
pub mod grammar;

pub use compiler::{apply_field_map, is_filter_allowed, FilterCompiler};
pub use grammar::{FilterGrammar, GrammarError, ODataFilterGrammar};
