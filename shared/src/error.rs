//! Error taxonomy shared by the gateway and billing processes

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub code: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Missing credential: {message}")]
    MissingCredential { message: String },

    #[error("Invalid credential")]
    InvalidCredential,

    #[error("Quota exhausted, resets at {reset_at}")]
    QuotaExceeded {
        remaining: u64,
        reset_at: chrono::DateTime<chrono::Utc>,
    },

    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Bad request: {message}")]
    BadRequest { message: String },

    #[error("Duplicate invoice for this billing period")]
    DuplicateInvoice,

    #[error("Upstream error: {status}")]
    UpstreamError { status: StatusCode, body: String },

    #[error("Upstream unavailable")]
    UpstreamUnavailable,

    #[error("Service unavailable: {service}")]
    ServiceUnavailable { service: String },

    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),
}

impl AppError {
    pub fn missing_credential(message: impl Into<String>) -> Self {
        Self::MissingCredential {
            message: message.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    pub fn service_unavailable(service: impl Into<String>) -> Self {
        Self::ServiceUnavailable {
            service: service.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::MissingCredential { .. } => StatusCode::UNAUTHORIZED,
            AppError::InvalidCredential => StatusCode::UNAUTHORIZED,
            AppError::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            AppError::DuplicateInvoice => StatusCode::BAD_REQUEST,
            AppError::UpstreamError { status, .. } => *status,
            AppError::UpstreamUnavailable => StatusCode::BAD_GATEWAY,
            AppError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Redis(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::HttpClient(_) => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::MissingCredential { .. } => "MISSING_CREDENTIAL",
            AppError::InvalidCredential => "INVALID_CREDENTIAL",
            AppError::QuotaExceeded { .. } => "QUOTA_EXCEEDED",
            AppError::NotFound { .. } => "NOT_FOUND",
            AppError::BadRequest { .. } => "BAD_REQUEST",
            AppError::DuplicateInvoice => "DUPLICATE_INVOICE",
            AppError::UpstreamError { .. } => "UPSTREAM_ERROR",
            AppError::UpstreamUnavailable => "UPSTREAM_UNAVAILABLE",
            AppError::ServiceUnavailable { .. } => "SERVICE_UNAVAILABLE",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Redis(_) => "CACHE_ERROR",
            AppError::Internal { .. } => "INTERNAL_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::HttpClient(_) => "HTTP_CLIENT_ERROR",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!("{} - {}", self.error_code(), self);
        } else {
            tracing::warn!("{} - {}", self.error_code(), self);
        }

        let mut response = (
            status,
            Json(ErrorResponse {
                error: self.error_code().to_string(),
                message: self.to_string(),
                code: status.as_u16().to_string(),
            }),
        )
            .into_response();

        if let AppError::UpstreamError { body, .. } = &self {
            *response.body_mut() = axum::body::Body::from(body.clone());
        }

        response
    }
}
