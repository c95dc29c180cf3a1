//! Civic issue prediction server.
//!
//! One model is loaded at startup and shared by every request. `POST
//! /predict` takes a multipart `file` field and answers with
//! `{"class": .., "confidence": ..}`.

pub mod classifier;
pub mod routes;
pub mod state;
pub mod upload;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use classifier::{ImageClassifier, ModelClassifier};
pub use state::{AppState, ServerConfig, SharedState};

/// Build the application router.
pub fn build_router(state: SharedState) -> Router {
    let body_limit = state.config.max_upload_bytes;

    Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/predict", post(routes::predict::predict))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}
