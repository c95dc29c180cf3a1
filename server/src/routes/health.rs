//! `GET /health`

use axum::{extract::State, Json};
use civic_core::CLASS_NAMES;
use serde::Serialize;

use crate::state::SharedState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_seconds: u64,
    pub version: &'static str,
    /// Artifact stem the classifier was loaded from
    pub model: String,
    pub classes: &'static [&'static str],
}

pub async fn health_check(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_seconds: state.uptime_seconds(),
        version: env!("CARGO_PKG_VERSION"),
        model: state.config.model_stem.display().to_string(),
        classes: &CLASS_NAMES,
    })
}
