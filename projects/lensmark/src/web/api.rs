use crate::artifacts::upload_name;
use crate::error::PipelineError;
use crate::pipeline::orchestrator::MediaPipeline;
use crate::pipeline::types::{Analysis, MediaKind};
use axum::{
    extract::{multipart::MultipartError, Multipart, Path, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use tower::ServiceExt;
use tower_http::services::ServeFile;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<MediaPipeline>,
}

#[derive(Serialize, Debug)]
pub struct UploadResponse {
    pub success: bool,
    #[serde(rename = "type")]
    pub kind: MediaKind,
    pub filename: String,
    pub analysis: Analysis,
}

/// Error body returned to clients: `{"error": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    fn bad_request(message: &str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.to_string(),
        }
    }

    fn internal(message: impl std::fmt::Display) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.to_string(),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        let status = if err.is_decode() {
            StatusCode::UNPROCESSABLE_ENTITY
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        // Carries 413 when the body limit was hit
        Self {
            status: err.status(),
            message: err.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!("Request failed: {}", self.message);
        } else {
            tracing::warn!("Request rejected ({}): {}", self.status, self.message);
        }
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

pub async fn upload_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut upload = None;

    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }

        let original = field.file_name().unwrap_or_default().to_string();
        let filename = upload_name(&original)
            .ok_or_else(|| ApiError::bad_request("No selected file"))?
            .to_string();
        let path = state
            .pipeline
            .store()
            .incoming_path(&filename)
            .ok_or_else(|| ApiError::bad_request("No selected file"))?;

        let data = field.bytes().await?;
        if data.is_empty() {
            return Err(ApiError::bad_request("No selected file"));
        }

        tokio::fs::write(&path, &data)
            .await
            .map_err(|e| ApiError::internal(format!("Failed to store upload: {e}")))?;
        tracing::info!("Stored upload {:?} ({} bytes)", path, data.len());
        upload = Some((filename, path));
        break;
    }

    let (filename, path) = upload.ok_or_else(|| ApiError::bad_request("No file part"))?;
    let kind = MediaKind::from_path(&path);

    let pipeline = state.pipeline.clone();
    let analysis = tokio::task::spawn_blocking(move || {
        let result = pipeline.run(&path, kind);
        discard_upload(&path);
        result
    })
    .await
    .map_err(|e| ApiError::internal(format!("Pipeline task failed: {e}")))??;

    Ok(Json(UploadResponse {
        success: true,
        kind: analysis.kind(),
        filename,
        analysis,
    }))
}

/// Uploaded inputs only live for the request that analyzed them.
fn discard_upload(path: &std::path::Path) {
    if let Err(e) = std::fs::remove_file(path) {
        tracing::warn!("Failed to remove upload {:?}: {}", path, e);
    }
}

/// Serves a stored artifact by bare name, with range and conditional request
/// support so browsers can seek in result videos.
pub async fn artifact_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    request: Request,
) -> Result<Response, StatusCode> {
    let path = state
        .pipeline
        .store()
        .resolve(&name)
        .ok_or(StatusCode::NOT_FOUND)?;

    match ServeFile::new(path).oneshot(request).await {
        Ok(response) => Ok(response.into_response()),
        Err(never) => match never {},
    }
}
