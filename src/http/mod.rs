//! # HTTP Surface
//!
//! axum bindings for entity set queries, delta sync, writes, the metadata
//! document and `$batch`. Every response carries `OData-Version: 4.0`.

mod response;
mod routes;
mod server;
mod state;

pub use response::{ODATA_UNIMPLEMENTED, ODATA_VERSION};
pub use routes::odata_routes;
pub use server::{build_router, ODataServer};
pub use state::{EntitySetState, ODataState};
