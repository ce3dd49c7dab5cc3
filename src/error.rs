use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum CastorError {
    #[error("Upstream error with status: {0}")]
    UpstreamStatus(StatusCode),

    #[error("HTTP request error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("URL parse error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("No available token")]
    NoAvailableToken,

    #[error("Daily quota exceeded: {bucket}")]
    DailyQuotaExceeded { bucket: String },

    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Unexpected error: {0}")]
    UnexpectedError(String),

    #[error("Ractor error: {0}")]
    RactorError(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

impl IntoResponse for CastorError {
    fn into_response(self) -> axum::response::Response {
        let (status, error_body) = match self {
            CastorError::DatabaseError(_)
            | CastorError::RactorError(_)
            | CastorError::UnexpectedError(_)
            | CastorError::IoError(_) => {
                let status = StatusCode::INTERNAL_SERVER_ERROR;
                let body = ApiErrorObject {
                    code: "INTERNAL_ERROR".to_string(),
                    message: "An internal server error occurred.".to_string(),
                    details: None,
                };
                (status, body)
            }

            CastorError::JsonError(_) => {
                let status = StatusCode::BAD_GATEWAY;
                let body = ApiErrorObject {
                    code: "BAD_UPSTREAM_PAYLOAD".to_string(),
                    message: "Failed to parse upstream response.".to_string(),
                    details: None,
                };
                (status, body)
            }

            CastorError::ReqwestError(_) | CastorError::UrlError(_) => {
                let status = StatusCode::BAD_GATEWAY;
                let body = ApiErrorObject {
                    code: "UPSTREAM_ERROR".to_string(),
                    message: "Upstream service error.".to_string(),
                    details: None,
                };
                (status, body)
            }

            CastorError::BadRequest(message) => {
                let status = StatusCode::BAD_REQUEST;
                let body = ApiErrorObject {
                    code: "bad_request".to_string(),
                    message,
                    details: None,
                };
                (status, body)
            }

            // Selection exhaustion is a retryable rate-limit condition for the
            // caller, never a fatal error.
            CastorError::NoAvailableToken => {
                let status = StatusCode::TOO_MANY_REQUESTS;
                let body = ApiErrorObject {
                    code: "rate_limit_exceeded".to_string(),
                    message: "No available tokens. Please try again later.".to_string(),
                    details: None,
                };
                (status, body)
            }

            CastorError::DailyQuotaExceeded { bucket } => {
                let status = StatusCode::TOO_MANY_REQUESTS;
                let body = ApiErrorObject {
                    code: "daily_quota_exceeded".to_string(),
                    message: format!("Daily quota exceeded: {bucket}"),
                    details: None,
                };
                (status, body)
            }

            CastorError::UnknownModel(model) => {
                let status = StatusCode::NOT_FOUND;
                let body = ApiErrorObject {
                    code: "model_not_found".to_string(),
                    message: format!("The model '{model}' does not exist."),
                    details: None,
                };
                (status, body)
            }

            CastorError::UpstreamStatus(code) => {
                let (err_code, msg) = match code {
                    StatusCode::TOO_MANY_REQUESTS => ("RATE_LIMIT", "Upstream rate limit exceeded."),
                    StatusCode::UNAUTHORIZED => ("UNAUTHORIZED", "Upstream authentication failed."),
                    StatusCode::FORBIDDEN => ("FORBIDDEN", "Upstream permission denied."),
                    StatusCode::NOT_FOUND => ("NOT_FOUND", "Upstream resource not found."),
                    _ => ("UPSTREAM_ERROR", "An upstream error occurred."),
                };
                (
                    code,
                    ApiErrorObject {
                        code: err_code.to_string(),
                        message: msg.to_string(),
                        details: None,
                    },
                )
            }
        };
        (status, Json(ApiErrorBody { inner: error_body })).into_response()
    }
}

/// Standardized API error response payload.
#[derive(Serialize)]
pub struct ApiErrorObject {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Serialize)]
pub struct ApiErrorBody {
    #[serde(rename = "error")]
    pub inner: ApiErrorObject,
}
