//! # OData Server
//!
//! Builds the router from a [`ServerConfig`] and serves it.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{middleware, Router};
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use super::response::{unmatched_route, with_odata_version};
use super::routes::odata_routes;
use super::state::ODataState;
use crate::config::ServerConfig;
use crate::errors::{ODataError, ODataResult};
use crate::memory::MemoryStore;
use crate::observability::Event;

/// HTTP server exposing the configured entity sets
pub struct ODataServer {
    config: ServerConfig,
    router: Router,
}

impl ODataServer {
    /// Build the server over a fresh in-memory store
    pub fn from_config(config: ServerConfig) -> ODataResult<Self> {
        Self::with_store(config, &MemoryStore::new())
    }

    /// Build the server over an existing store
    pub fn with_store(config: ServerConfig, store: &MemoryStore) -> ODataResult<Self> {
        let state = ODataState::from_config(&config, store)?;
        let router = build_router(state, &config.cors_origins);
        Ok(Self { config, router })
    }

    pub fn socket_addr(&self) -> String {
        self.config.socket_addr()
    }

    /// Get the router (for testing)
    pub fn router(self) -> Router {
        self.router
    }

    /// Bind and serve until the process exits
    pub async fn start(self) -> ODataResult<()> {
        let addr: SocketAddr = self
            .config
            .socket_addr()
            .parse()
            .map_err(|e| ODataError::server(format!("invalid socket address: {}", e)))?;

        let listener = TcpListener::bind(addr).await?;
        info!(
            event = %Event::ServerStarted,
            addr = %addr,
            base_path = self.config.normalized_base(),
            entity_sets = self.config.entity_sets.len(),
            "odata server listening"
        );
        axum::serve(listener, self.router).await?;
        Ok(())
    }
}

/// Router with CORS, request tracing and the `OData-Version` header applied
pub fn build_router(state: ODataState, cors_origins: &[String]) -> Router {
    let cors = if cors_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = cors_origins
            .iter()
            .filter_map(|s| s.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    };

    let base_path = state.base_path.clone();
    let routes = odata_routes(Arc::new(state));
    let router = if base_path.is_empty() {
        Router::new().merge(routes)
    } else {
        Router::new().nest(&base_path, routes)
    };

    router
        .fallback(unmatched_route)
        .layer(middleware::map_response(with_odata_version))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
