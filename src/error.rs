//! The uniform error taxonomy. Every handler failure becomes a `KredoError`,
//! which maps to one HTTP status and a `{error, message, details?}` body.
//! The server never responds `200` with an embedded error.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum KredoError {
    #[error("request is malformed or fails validation: {0}")]
    ValidationError(String),

    #[error("signature verification failed: {0}")]
    SignatureInvalid(String),

    #[error("referenced resource was not found: {0}")]
    NotFound(String),

    #[error("resource already exists: {0}")]
    Conflict(String),

    #[error("caller is not permitted to perform this action: {0}")]
    PermissionError(String),

    #[error("rate limit exceeded for this endpoint")]
    RateLimited { retry_after_seconds: u64 },

    #[error("evidence does not meet the minimum quality bar: {0}")]
    EvidenceInsufficient(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl KredoError {
    pub fn kind(&self) -> &'static str {
        match self {
            KredoError::ValidationError(_) => "validation_error",
            KredoError::SignatureInvalid(_) => "signature_invalid",
            KredoError::NotFound(_) => "not_found",
            KredoError::Conflict(_) => "conflict",
            KredoError::PermissionError(_) => "permission_error",
            KredoError::RateLimited { .. } => "rate_limited",
            KredoError::EvidenceInsufficient(_) => "evidence_insufficient",
            KredoError::Internal(_) => "server_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            KredoError::ValidationError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            KredoError::SignatureInvalid(_) => StatusCode::BAD_REQUEST,
            KredoError::NotFound(_) => StatusCode::NOT_FOUND,
            KredoError::Conflict(_) => StatusCode::CONFLICT,
            KredoError::PermissionError(_) => StatusCode::FORBIDDEN,
            KredoError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            KredoError::EvidenceInsufficient(_) => StatusCode::UNPROCESSABLE_ENTITY,
            KredoError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for KredoError {
    fn into_response(self) -> Response {
        if matches!(self, KredoError::Internal(_)) {
            tracing::error!(error = %self, "internal error");
        }
        let mut body = json!({
            "error": self.kind(),
            "message": self.to_string(),
        });
        if let KredoError::RateLimited { retry_after_seconds } = &self {
            body["retry_after_seconds"] = json!(retry_after_seconds);
        }
        (self.status_code(), Json(body)).into_response()
    }
}

impl From<crate::domain::KeyFormatError> for KredoError {
    fn from(e: crate::domain::KeyFormatError) -> Self {
        KredoError::ValidationError(e.to_string())
    }
}

impl From<crate::store::StoreError> for KredoError {
    fn from(e: crate::store::StoreError) -> Self {
        match e {
            crate::store::StoreError::NotFound(what) => KredoError::NotFound(what),
            crate::store::StoreError::Conflict(what) => KredoError::Conflict(what),
            other => KredoError::Internal(other.to_string()),
        }
    }
}

impl From<crate::signature::VerifyFailure> for KredoError {
    fn from(e: crate::signature::VerifyFailure) -> Self {
        KredoError::SignatureInvalid(e.reason().to_string())
    }
}

impl From<crate::codec::CodecError> for KredoError {
    fn from(e: crate::codec::CodecError) -> Self {
        KredoError::ValidationError(e.to_string())
    }
}

pub type KredoResult<T> = Result<T, KredoError>;
