use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use dog_media::MediaError;
use serde_json::json;
use tracing::error;

/// `MediaError` as an HTTP response.
///
/// Client errors keep their message; server errors are logged and answered
/// with a generic one so staging paths never reach the client. `416` has an
/// empty body and a `Content-Range: bytes */size` header.
#[derive(Debug)]
pub struct MediaHttpError(pub MediaError);

impl From<MediaError> for MediaHttpError {
    fn from(e: MediaError) -> Self {
        Self(e)
    }
}

impl MediaHttpError {
    fn kind(&self) -> (StatusCode, &'static str, &'static str) {
        match &self.0 {
            MediaError::Invalid { .. } => (StatusCode::BAD_REQUEST, "BadRequest", "bad-request"),
            MediaError::SessionNotFound { .. }
            | MediaError::ItemNotFound { .. }
            | MediaError::NoPreviewAvailable { .. } => (StatusCode::NOT_FOUND, "NotFound", "not-found"),
            MediaError::CapacityExceeded { .. } => {
                (StatusCode::PAYLOAD_TOO_LARGE, "PayloadTooLarge", "payload-too-large")
            }
            MediaError::RangeNotSatisfiable { .. } => (
                StatusCode::RANGE_NOT_SATISFIABLE,
                "RangeNotSatisfiable",
                "range-not-satisfiable",
            ),
            MediaError::Metadata { .. } => (StatusCode::BAD_GATEWAY, "BadGateway", "bad-gateway"),
            MediaError::StagingWriteFailed { .. }
            | MediaError::PlacementFailed { .. }
            | MediaError::ArtifactGenerationFailed { .. }
            | MediaError::Io { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "GeneralError", "general-error"),
        }
    }
}

impl IntoResponse for MediaHttpError {
    fn into_response(self) -> Response {
        if let MediaError::RangeNotSatisfiable { total_size } = &self.0 {
            return (
                StatusCode::RANGE_NOT_SATISFIABLE,
                [
                    (header::CONTENT_RANGE, format!("bytes */{}", total_size)),
                    (header::ACCEPT_RANGES, "bytes".to_string()),
                ],
            )
                .into_response();
        }

        let (status, name, class_name) = self.kind();
        let message = if status.is_server_error() {
            error!(error = %self.0, "Media request failed");
            match &self.0 {
                MediaError::StagingWriteFailed { .. } => "Upload failed; restart the transfer".to_string(),
                _ => "Internal server error".to_string(),
            }
        } else {
            self.0.to_string()
        };

        let body = json!({
            "name": name,
            "message": message,
            "code": status.as_u16(),
            "className": class_name,
        });
        (status, Json(body)).into_response()
    }
}
