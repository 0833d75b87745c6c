//! # Date Coercion
//!
//! Optional post-processing of result rows: configured fields holding
//! dates in assorted textual or epoch forms are rewritten as canonical
//! UTC timestamps before the envelope is serialized.

mod coercer;
mod formats;

pub use coercer::{
    canonical, from_epoch, CoercionErrorHook, CoercionFailure, DateCoercer, DateCoercion,
    EpochMode, AUTO_EPOCH_THRESHOLD,
};
pub use formats::{parse_with_formats, DateFormat, DEFAULT_FORMATS};
