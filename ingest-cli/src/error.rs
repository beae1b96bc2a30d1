use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use cmaf_ingest_engine::{IngestError, SourceError};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Asset catalogue error: {0}")]
    Assets(#[from] SourceError),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Initialization failed: {0}")]
    Initialization(String),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Ingest(e) => match e {
                IngestError::UnknownSession(_) => StatusCode::NOT_FOUND,
                IngestError::AlreadyStarted(_) => StatusCode::CONFLICT,
                IngestError::NotRunning => StatusCode::SERVICE_UNAVAILABLE,
                IngestError::ConfigResolution(_)
                | IngestError::UnknownAsset(_)
                | IngestError::UnsupportedContentType(_)
                | IngestError::DuplicateRepresentation(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::ParseError(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = %status, error = %self, "Error in API handler");
        }
        (status, axum::Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let status = |e: IngestError| AppError::from(e).into_response().status();
        assert_eq!(status(IngestError::UnknownSession(3)), StatusCode::NOT_FOUND);
        assert_eq!(status(IngestError::NotRunning), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            status(IngestError::UnknownAsset("x/Manifest.mpd".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(IngestError::Production("boom".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
