//! Centralises the client/resource/transient/configuration/fatal fault
//! taxonomy at a single `IntoResponse` boundary, so every handler just
//! returns `Result<_, ApiError>` and the error-code mapping stays in one
//! place.

use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Request};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;

use mesh_security::{RateLimitError, VerifyError};
use mesh_store::StoreError;

/// `axum::Json` wrapper that reports a parse failure through `ApiError`
/// instead of axum's default rejection body, so every 4xx a handler can
/// produce — including a malformed request body — carries the same
/// `{error, message, timestamp}` shape.
pub struct MeshJson<T>(pub T);

impl<S, T> FromRequest<S> for MeshJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(MeshJson(value)),
            Err(rejection) => Err(match rejection {
                JsonRejection::JsonDataError(e) => ApiError::Malformed(e.body_text()),
                JsonRejection::JsonSyntaxError(e) => ApiError::Malformed(e.body_text()),
                JsonRejection::BytesRejection(_) => ApiError::PayloadTooLarge,
                other => ApiError::Malformed(other.body_text()),
            }),
        }
    }
}

#[derive(Debug)]
pub enum ApiError {
    Malformed(String),
    InvalidSignature(String),
    StaleTimestamp,
    RateLimited,
    MissingField(&'static str),
    LimitOutOfRange(String),
    InvalidEmbedding(String),
    InvalidTransition,
    NotFound,
    NoResults,
    ServiceUnavailable(String),
    Timeout,
    InvalidApiKey,
    StoreMisconfigured(String),
    PayloadTooLarge,
    Internal(String),
}

impl ApiError {
    fn code_and_status(&self) -> (&'static str, StatusCode) {
        match self {
            ApiError::Malformed(_) => ("malformed", StatusCode::BAD_REQUEST),
            ApiError::InvalidSignature(_) => ("invalid_signature", StatusCode::UNAUTHORIZED),
            ApiError::StaleTimestamp => ("stale_timestamp", StatusCode::UNAUTHORIZED),
            ApiError::RateLimited => ("rate_limit_exceeded", StatusCode::TOO_MANY_REQUESTS),
            ApiError::MissingField("asn") => ("missing_asn", StatusCode::BAD_REQUEST),
            ApiError::MissingField("location") => ("missing_location", StatusCode::BAD_REQUEST),
            ApiError::MissingField("cve") => ("missing_cve", StatusCode::BAD_REQUEST),
            ApiError::MissingField("service") => ("missing_service", StatusCode::BAD_REQUEST),
            ApiError::MissingField(_) => ("missing_field", StatusCode::BAD_REQUEST),
            ApiError::LimitOutOfRange(_) => ("limit_out_of_range", StatusCode::BAD_REQUEST),
            ApiError::InvalidEmbedding(_) => ("invalid_embedding", StatusCode::BAD_REQUEST),
            ApiError::InvalidTransition => ("invalid_transition", StatusCode::CONFLICT),
            ApiError::NotFound => ("not_found", StatusCode::NOT_FOUND),
            ApiError::NoResults => ("no_results", StatusCode::NOT_FOUND),
            ApiError::ServiceUnavailable(_) => ("service_unavailable", StatusCode::SERVICE_UNAVAILABLE),
            ApiError::Timeout => ("timeout", StatusCode::REQUEST_TIMEOUT),
            ApiError::InvalidApiKey => ("invalid_api_key", StatusCode::INTERNAL_SERVER_ERROR),
            ApiError::StoreMisconfigured(_) => ("store_misconfigured", StatusCode::INTERNAL_SERVER_ERROR),
            ApiError::PayloadTooLarge => ("payload_too_large", StatusCode::PAYLOAD_TOO_LARGE),
            ApiError::Internal(_) => ("internal_error", StatusCode::INTERNAL_SERVER_ERROR),
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Malformed(m) => m.clone(),
            ApiError::InvalidSignature(m) => m.clone(),
            ApiError::StaleTimestamp => "envelope timestamp is outside the allowed freshness window".into(),
            ApiError::RateLimited => "rate limit exceeded".into(),
            ApiError::MissingField(field) => format!("required field `{field}` is missing"),
            ApiError::LimitOutOfRange(m) => m.clone(),
            ApiError::InvalidEmbedding(m) => m.clone(),
            ApiError::InvalidTransition => "requested job state transition is not permitted".into(),
            ApiError::NotFound => "resource not found".into(),
            ApiError::NoResults => "vector index is empty".into(),
            ApiError::ServiceUnavailable(m) => m.clone(),
            ApiError::Timeout => "request deadline expired".into(),
            ApiError::InvalidApiKey => "embedding provider rejected the configured api key".into(),
            ApiError::StoreMisconfigured(m) => m.clone(),
            ApiError::PayloadTooLarge => "request body exceeds the maximum size".into(),
            ApiError::Internal(m) => m.clone(),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    timestamp: i64,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (code, status) = self.code_and_status();
        let body = ErrorBody {
            error: code,
            message: self.message(),
            timestamp: Utc::now().timestamp(),
        };
        (status, Json(json!(body))).into_response()
    }
}

impl From<VerifyError> for ApiError {
    fn from(err: VerifyError) -> Self {
        match err {
            VerifyError::StaleTimestamp => ApiError::StaleTimestamp,
            VerifyError::BadKey | VerifyError::BadSignature => ApiError::InvalidSignature(err.to_string()),
            VerifyError::Malformed(m) => ApiError::Malformed(m),
        }
    }
}

impl From<RateLimitError> for ApiError {
    fn from(_: RateLimitError) -> Self {
        ApiError::RateLimited
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ApiError::NotFound,
            StoreError::InvalidTransition => ApiError::InvalidTransition,
            StoreError::InvalidEmbeddingDimension { expected, actual } => {
                ApiError::InvalidEmbedding(format!("embedding has {actual} dimensions, expected {expected}"))
            }
            StoreError::EmptyIndex => ApiError::NoResults,
            StoreError::Connection(m) => ApiError::StoreMisconfigured(m),
            StoreError::Query(m) => ApiError::Internal(m),
        }
    }
}
