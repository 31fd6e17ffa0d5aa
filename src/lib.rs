use std::sync::Arc;

use axum::{Router, body::Body, extract::DefaultBodyLimit, extract::State, http::Request};
use config::Config;
use session::SessionStore;
use sqlx::SqlitePool;
use tower::ServiceBuilder;
use tower_http::{services::ServeDir, trace::TraceLayer};

pub mod config;
pub mod database;
pub mod error;
pub mod imaging;
pub mod middleware;
pub mod result;
pub mod routes;
pub mod session;
pub mod utils;
pub mod views;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub config: Arc<Config>,
    pub sessions: SessionStore,
}

/// Assembles the application: static assets, the route table as fallback, and the
/// session, error-logging and tracing layers.
pub fn build_app(state: AppState) -> Router {
    let table = Arc::new(routes::route_table());
    let assets_dir = state.config.public_dir.join("assets");
    let assets_mount = state.config.url("/assets");

    Router::new()
        .nest_service(&assets_mount, ServeDir::new(assets_dir))
        .fallback(move |State(state): State<AppState>, req: Request<Body>| {
            let table = table.clone();
            async move { table.dispatch(state, req).await }
        })
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(axum::middleware::from_fn(middleware::log_errors))
                .layer(DefaultBodyLimit::max(state.config.max_upload_bytes))
                .layer(axum::middleware::from_fn_with_state(
                    state.clone(),
                    middleware::session_layer,
                )),
        )
        .with_state(state)
}
