use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(anyhow::Error),

    #[error("Invalid request payload: {0}")]
    PayloadError(#[from] validator::ValidationErrors),

    #[error("Bad request: {0}")]
    BadRequest(anyhow::Error),

    #[error("Not found: {0}")]
    NotFound(anyhow::Error),

    #[error("Unauthorized: {0}")]
    AuthError(anyhow::Error),

    #[error("Configuration error: {0}")]
    ConfigurationError(anyhow::Error),

    #[error("Certificate error: {0}")]
    CertificateError(anyhow::Error),

    #[error("Transmission error ({endpoint}): {detail}")]
    TransmissionError { endpoint: String, detail: String },

    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),

    #[error("Database error: {0}")]
    DatabaseError(anyhow::Error),

    #[error("Service configuration error: {0}")]
    ConfigError(anyhow::Error),
}

impl AppError {
    /// Configuration error with a preformatted message.
    pub fn configuration(msg: impl Into<String>) -> Self {
        AppError::ConfigurationError(anyhow::anyhow!(msg.into()))
    }

    /// Certificate error with a preformatted message.
    pub fn certificate(msg: impl Into<String>) -> Self {
        AppError::CertificateError(anyhow::anyhow!(msg.into()))
    }

    /// Business validation error with a preformatted message.
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::ValidationError(anyhow::anyhow!(msg.into()))
    }

    /// Transmission error enriched with the endpoint that was being called.
    pub fn transmission(endpoint: impl Into<String>, detail: impl Into<String>) -> Self {
        AppError::TransmissionError {
            endpoint: endpoint.into(),
            detail: detail.into(),
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(anyhow::Error::new(err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

impl From<mongodb::error::Error> for AppError {
    fn from(err: mongodb::error::Error) -> Self {
        AppError::DatabaseError(anyhow::Error::new(err))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: String,
            #[serde(skip_serializing_if = "Option::is_none")]
            details: Option<String>,
        }

        let (status, error_message, details) = match self {
            AppError::ValidationError(err) => (StatusCode::BAD_REQUEST, err.to_string(), None),
            AppError::PayloadError(err) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "Invalid request payload".to_string(),
                Some(err.to_string()),
            ),
            AppError::BadRequest(err) => (StatusCode::BAD_REQUEST, err.to_string(), None),
            AppError::NotFound(err) => (StatusCode::NOT_FOUND, err.to_string(), None),
            AppError::AuthError(err) => (StatusCode::UNAUTHORIZED, err.to_string(), None),
            AppError::ConfigurationError(err) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "Fiscal configuration error".to_string(),
                Some(err.to_string()),
            ),
            AppError::CertificateError(err) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "Certificate error".to_string(),
                Some(err.to_string()),
            ),
            AppError::TransmissionError { endpoint, detail } => (
                StatusCode::BAD_GATEWAY,
                format!("Transmission to {} failed", endpoint),
                Some(detail),
            ),
            AppError::InternalError(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
                Some(format!("{:#?}", err)),
            ),
            AppError::DatabaseError(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Database error".to_string(),
                Some(err.to_string()),
            ),
            AppError::ConfigError(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Service configuration error".to_string(),
                Some(err.to_string()),
            ),
        };

        (
            status,
            Json(ErrorResponse {
                error: error_message,
                details,
            }),
        )
            .into_response()
    }
}
