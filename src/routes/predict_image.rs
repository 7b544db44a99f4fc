use crate::classifier::Prediction;
use crate::server::SharedState;
use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use std::time::Instant;
use thiserror::Error;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Unsupported type '{0}'.")]
    UnsupportedType(String),
    #[error("File too large.")]
    TooLarge,
    #[error("No file uploaded.")]
    MissingFile,
    #[error("Malformed multipart body: {0}")]
    Multipart(String),
    #[error("{0}")]
    Classification(String),
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

#[derive(Serialize)]
pub struct PredictionResponse {
    filename: String,
    predictions: Vec<Prediction>,
}

/// Single-shot prediction: validate the uploaded file, classify, respond
/// once. Validation failures never reach the classifier.
#[instrument(skip(state, multipart))]
pub async fn predict_image(
    State(state): State<SharedState>,
    mut multipart: Multipart,
) -> Result<Json<PredictionResponse>, UploadError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| UploadError::Multipart(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field.file_name().unwrap_or("upload").to_string();
        let content_type = field.content_type().unwrap_or("").to_string();
        if !state.limits.is_allowed_mime(&content_type) {
            return Err(UploadError::UnsupportedType(content_type));
        }

        let contents = field
            .bytes()
            .await
            .map_err(|e| UploadError::Multipart(e.to_string()))?;
        if contents.len() > state.limits.max_upload_bytes {
            return Err(UploadError::TooLarge);
        }

        let started = Instant::now();
        let predictions = state.classifier.classify(contents).await.map_err(|e| {
            tracing::error!("predict_image error: {}", e);
            UploadError::Classification(e.to_string())
        })?;
        state
            .metrics
            .record_prediction(started.elapsed().as_millis() as u64, "predict_image");

        return Ok(Json(PredictionResponse {
            filename,
            predictions,
        }));
    }

    Err(UploadError::MissingFile)
}
