//! Axum application setup
//!
//! Creates and configures the Axum application with routes and middleware.

use crate::{config::Settings, provider::TokenProvider};
use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Token provider serving all acquisition requests
    pub provider: Arc<TokenProvider>,
    /// Application settings
    pub settings: Arc<Settings>,
    /// Server start time for uptime calculation
    pub start_time: std::time::Instant,
}

/// Create the main Axum application with routes and middleware
pub fn create_app(settings: Settings, provider: Arc<TokenProvider>) -> Router {
    let enable_cors = settings.server.enable_cors;

    let state = AppState {
        provider,
        settings: Arc::new(settings),
        start_time: std::time::Instant::now(),
    };

    let router = Router::new()
        .route("/get_pot", post(super::handlers::get_pot))
        .route("/ping", get(super::handlers::ping))
        .route(
            "/invalidate_caches",
            post(super::handlers::invalidate_caches),
        )
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    let router = if enable_cors {
        router.layer(CorsLayer::permissive())
    } else {
        router
    };

    router.with_state(state)
}
