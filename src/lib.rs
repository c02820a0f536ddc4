pub mod auth;
pub mod catalog;
pub mod config;
pub mod database;
pub mod error;
pub mod fingerprint;
pub mod handlers;
pub mod locks;
pub mod models;
pub mod registry;
pub mod service;
pub mod state;
pub mod storage;
pub mod thumbnail;
pub mod utils;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{handlers::*, state::AppState};

/// Builds the HTTP router over `state`.
pub fn create_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/images", get(list_images))
        // Upload forms are streamed with per-file caps instead of a whole-body limit
        .route(
            "/api/images/upload",
            post(upload_image).layer(DefaultBodyLimit::disable()),
        )
        .route(
            "/api/images/batch",
            post(upload_batch).layer(DefaultBodyLimit::disable()),
        )
        .route("/api/images/stats", get(get_stats))
        .route("/api/images/status", get(get_status))
        .route(
            "/api/images/{id}",
            get(get_image).patch(update_description).delete(delete_image),
        )
        .route("/api/images/{id}/download", get(download_image))
        .route("/api/types", get(list_types).post(register_type))
        .route(
            "/api/types/{type_id}",
            get(get_type).put(rename_type).delete(remove_type),
        )
        .route("/images/thumbnails/{filename}", get(get_thumbnail))
        .route("/images/{*path}", get(get_raw_image))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
