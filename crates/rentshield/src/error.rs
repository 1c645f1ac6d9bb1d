use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::config::ConfigError;
use crate::engine::evidence::ValidationError;
use crate::engine::reports::ReportError;
use crate::telemetry::TelemetryError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("server error: {0}")]
    Server(#[from] axum::Error),
    #[error("invalid submission: {0}")]
    Validation(#[from] ValidationError),
    #[error("report error: {0}")]
    Report(#[from] ReportError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Report(err) => match err {
                ReportError::NotFound => StatusCode::NOT_FOUND,
                ReportError::DuplicateVote => StatusCode::CONFLICT,
                ReportError::MissingField(_) | ReportError::UnknownKind(_) => {
                    StatusCode::BAD_REQUEST
                }
            },
            AppError::Config(_) | AppError::Telemetry(_) | AppError::Io(_)
            | AppError::Server(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
