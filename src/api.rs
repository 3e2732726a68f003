//! JSON shapes of the HTTP surface and the mapping from failures to status
//! codes.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use uade_pipeline::ErrorKind as PipelineErrorKind;

/// Browsers that play FLAC natively, matched as substrings of the
/// lower-cased `User-Agent`.
const FLAC_BROWSERS: &[&str] = &["chrome", "chromium", "edge", "firefox", "safari"];

pub fn supports_flac(user_agent: &str) -> bool {
    let ua = user_agent.to_ascii_lowercase();
    FLAC_BROWSERS.iter().any(|browser| ua.contains(browser))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionResponse {
    pub success: bool,
    pub file_id: String,
    pub filename: String,
    pub player_format: String,
    pub audio_format: String,
    pub play_url: String,
    pub download_url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConvertUrlRequest {
    pub url: Option<String>,
    /// Companion sample of a two-part module.
    pub sample_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConvertPairRequest {
    pub mdat_url: Option<String>,
    pub smpl_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub timestamp: String,
    pub uade_available: bool,
}

/// A failed request, rendered as `{"error": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn input(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<uade_pipeline::Error> for ApiError {
    fn from(err: uade_pipeline::Error) -> Self {
        let kind: &PipelineErrorKind = &err;
        match kind.is_input_error() {
            true => {
                tracing::info!(error = %kind, "Rejected request");
                Self::input(kind.to_string())
            },
            false => {
                tracing::error!(error = ?err, "Conversion failed");
                Self::internal(kind.to_string())
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({ "error": self.message }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
