//! Structured error handling, following the teacher's `error.rs`
//! conventions: a single `ApiError` carrying a stable `error` tag, a
//! human-readable message, and the HTTP status to respond with.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct ApiError {
    pub error: String,
    pub message: String,
    #[serde(skip)]
    pub status_code: StatusCode,
    #[serde(skip)]
    pub retry_after_secs: Option<u64>,
}

impl ApiError {
    pub fn new(error: impl Into<String>, message: impl Into<String>, status_code: StatusCode) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status_code,
            retry_after_secs: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new("bad_request", message, StatusCode::BAD_REQUEST)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("unauthorized", message, StatusCode::UNAUTHORIZED)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new("forbidden", message, StatusCode::FORBIDDEN)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message, StatusCode::NOT_FOUND)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new("conflict", message, StatusCode::CONFLICT)
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new("validation_error", message, StatusCode::UNPROCESSABLE_ENTITY)
    }

    /// 429, never accompanied by any token-revoking side effect (spec §4.6
    /// rate-limit semantics: ceiling violations degrade service, not trust).
    pub fn rate_limited(message: impl Into<String>, retry_after_secs: u64) -> Self {
        Self {
            retry_after_secs: Some(retry_after_secs),
            ..Self::new("rate_limited", message, StatusCode::TOO_MANY_REQUESTS)
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new("internal_error", message, StatusCode::INTERNAL_SERVER_ERROR)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new("service_unavailable", message, StatusCode::SERVICE_UNAVAILABLE)
    }

    /// Additional to the teacher's taxonomy: signer/store contention the
    /// caller may retry (spec §7's `Transient`), surfaced as a 5xx carrying
    /// `Retry-After` rather than the teacher's bare `internal_error`.
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            retry_after_secs: Some(5),
            ..Self::new("transient", message, StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code;
        let retry_after = self.retry_after_secs;
        let mut response = (status, Json(self)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

impl From<meshctl_store::Error> for ApiError {
    fn from(err: meshctl_store::Error) -> Self {
        match err {
            meshctl_store::Error::NotFound(msg) => ApiError::not_found(msg),
            meshctl_store::Error::Conflict(msg) => ApiError::conflict(msg),
            meshctl_store::Error::Validation(msg) => ApiError::validation_error(msg),
            meshctl_store::Error::Forbidden(msg) => ApiError::forbidden(msg),
            meshctl_store::Error::ServiceUnavailable => {
                ApiError::service_unavailable("no signing CA is configured")
            }
            meshctl_store::Error::Transient(msg) => ApiError::transient(msg),
            meshctl_store::Error::Database(err) => {
                tracing::error!(%err, "database error");
                ApiError::transient("a database error occurred, retry may succeed")
            }
            meshctl_store::Error::Pki(err) => ApiError::transient(err.to_string()),
            meshctl_store::Error::Ipam(err) => ApiError::conflict(err.to_string()),
        }
    }
}

impl From<meshctl_assembler::Error> for ApiError {
    fn from(err: meshctl_assembler::Error) -> Self {
        match err {
            meshctl_assembler::Error::Forbidden => ApiError::forbidden("client is blocked"),
            meshctl_assembler::Error::Conflict => {
                ApiError::conflict("client has no primary IP assignment")
            }
            meshctl_assembler::Error::ServiceUnavailable => {
                ApiError::service_unavailable("no signing CA is configured")
            }
            meshctl_assembler::Error::Transient(msg) => ApiError::transient(msg),
            meshctl_assembler::Error::Store(inner) => inner.into(),
            meshctl_assembler::Error::Serialize(err) => {
                tracing::error!(%err, "failed to serialize config bundle");
                ApiError::internal_error("failed to serialize config bundle")
            }
        }
    }
}

impl From<meshctl_pki::Error> for ApiError {
    fn from(err: meshctl_pki::Error) -> Self {
        ApiError::transient(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for ApiError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        tracing::warn!(%err, "jwt error");
        match err.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                ApiError::unauthorized("admin session has expired")
            }
            _ => ApiError::unauthorized("invalid admin authentication token"),
        }
    }
}
