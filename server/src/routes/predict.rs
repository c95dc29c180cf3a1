//! `POST /predict` - classify one uploaded image

use std::sync::Arc;

use axum::{
    extract::{multipart::{MultipartError, MultipartRejection}, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use civic_core::Prediction;
use civic_dataset::preprocess::load_image;
use serde_json::json;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::state::SharedState;
use crate::upload::ScopedUpload;

/// Multipart field carrying the image
pub const FILE_FIELD: &str = "file";

#[derive(Debug)]
pub enum PredictError {
    /// No `file` field, or the body is not multipart
    NoFile,
    PayloadTooLarge(String),
    Internal(String),
}

impl PredictError {
    fn from_multipart(err: MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Self::PayloadTooLarge(err.body_text())
        } else {
            debug!("Unreadable multipart body: {}", err);
            Self::NoFile
        }
    }
}

impl IntoResponse for PredictError {
    fn into_response(self) -> Response {
        match self {
            Self::NoFile => (StatusCode::BAD_REQUEST, Json(json!({ "error": "No file" }))).into_response(),
            Self::PayloadTooLarge(message) => (StatusCode::PAYLOAD_TOO_LARGE, message).into_response(),
            Self::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, message).into_response(),
        }
    }
}

pub async fn predict(
    State(state): State<SharedState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<Prediction>, PredictError> {
    let mut multipart = multipart.map_err(|rejection| {
        debug!("Rejected non-multipart request: {}", rejection);
        PredictError::NoFile
    })?;

    let bytes = loop {
        match multipart.next_field().await {
            Ok(Some(field)) if field.name() == Some(FILE_FIELD) => {
                break field.bytes().await.map_err(PredictError::from_multipart)?;
            }
            Ok(Some(_)) => continue,
            Ok(None) => return Err(PredictError::NoFile),
            Err(e) => return Err(PredictError::from_multipart(e)),
        }
    };

    let request_id = Uuid::new_v4();
    let temp_dir = state.config.temp_dir.clone();
    let classifier = Arc::clone(&state.classifier);
    debug!("Request {}: {} bytes uploaded", request_id, bytes.len());

    // The upload lives only inside the closure and is removed when it returns
    // or unwinds.
    let outcome = tokio::task::spawn_blocking(move || {
        let upload = ScopedUpload::write(&temp_dir, request_id, &bytes)?;
        let image = load_image(upload.path())?;
        classifier.classify(&image)
    })
    .await;

    match outcome {
        Ok(Ok(prediction)) => {
            info!(
                "Request {}: {} ({:.3})",
                request_id, prediction.class, prediction.confidence
            );
            Ok(Json(prediction))
        }
        Ok(Err(e)) => {
            error!("Request {} failed: {}", request_id, e);
            Err(PredictError::Internal(e.to_string()))
        }
        Err(e) => {
            error!("Request {} prediction task aborted: {}", request_id, e);
            Err(PredictError::Internal("Prediction failed".to_string()))
        }
    }
}
