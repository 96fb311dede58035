pub mod backend;
pub mod config;
pub mod error;
pub mod gateway;
pub mod models;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use backend::ChatBackend;
use config::Config;
use gateway::handler::EventRouter;
use gateway::registry::Registry;

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Registry,
    pub router: EventRouter,
}

impl AppState {
    /// Build the state and start the registry control loop. Must be called
    /// from within a Tokio runtime.
    pub fn new(config: Config, backend: Arc<dyn ChatBackend>) -> Self {
        let registry = Registry::spawn(backend.clone());
        let router = EventRouter::new(registry.clone(), backend);
        Self {
            config: Arc::new(config),
            registry,
            router,
        }
    }
}

/// The full HTTP application: routes plus CORS and request tracing.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(routes::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
