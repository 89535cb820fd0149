//! Error handling for the checkpoint controller
//!
//! Variants map onto the fault taxonomy: sensor, store and hardware faults are
//! distinct so each lane can apply its own recovery policy.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Frame source is down or returned nothing usable
    #[error("Sensor unavailable: {0}")]
    SensorUnavailable(String),

    /// Authorization/session store timed out or failed
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Actuation did not reach the confirmed state in time
    #[error("Hardware fault on {line}: {message}")]
    HardwareFault { line: String, message: String },

    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Conflict (duplicate claim, duplicate row)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Config error
    #[error("Config error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// SQLx database error
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable taxonomy code used in logs and API bodies
    pub fn code(&self) -> &'static str {
        match self {
            Error::SensorUnavailable(_) => "SENSOR_UNAVAILABLE",
            Error::StoreUnavailable(_) | Error::Sqlx(_) => "STORE_UNAVAILABLE",
            Error::HardwareFault { .. } => "HARDWARE_FAULT",
            Error::NotFound(_) => "NOT_FOUND",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::Conflict(_) => "CONFLICT",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Serialization(_) => "SERIALIZATION_ERROR",
            Error::Http(_) => "HTTP_ERROR",
            Error::Io(_) => "IO_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Shorthand for a hardware fault on a logical output line
    pub fn hardware(line: impl std::fmt::Display, message: impl Into<String>) -> Self {
        Error::HardwareFault {
            line: line.to_string(),
            message: message.into(),
        }
    }

    /// True for store faults that a retry may clear
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Error::StoreUnavailable(_) | Error::Sqlx(_))
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::SensorUnavailable(_) | Error::StoreUnavailable(_) | Error::Sqlx(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Error::Http(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let error_code = self.code();
        let message = self.to_string();

        tracing::error!(
            status = %status,
            error_code = %error_code,
            message = %message,
            "Request error"
        );

        let body = Json(json!({
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}
