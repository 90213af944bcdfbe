use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use pkg_auth::AuthError;
use pkg_cluster::ClusterError;
use pkg_constants::server::STATUS_CLIENT_CLOSED_REQUEST;
use pkg_fleet::{AggregateError, ErrorKind};
use serde_json::json;
use thiserror::Error;
use tracing::warn;

/// Every error a handler can return, mapped onto an HTTP status.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Upstream(String),
    #[error("request cancelled")]
    Cancelled,
    #[error("request timed out")]
    Timeout,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Cancelled => StatusCode::from_u16(STATUS_CLIENT_CLOSED_REQUEST)
                .unwrap_or(StatusCode::BAD_REQUEST),
            ApiError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    pub fn missing(param: &str) -> Self {
        ApiError::InvalidInput(format!("missing parameter {param}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(status = status.as_u16(), error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<ClusterError> for ApiError {
    fn from(e: ClusterError) -> Self {
        match e {
            e if e.is_not_found() => ApiError::NotFound(e.to_string()),
            ClusterError::UnknownCluster(_) | ClusterError::InvalidInput(_) | ClusterError::Filter(_) => {
                ApiError::InvalidInput(e.to_string())
            }
            e => ApiError::Upstream(e.to_string()),
        }
    }
}

impl From<AggregateError> for ApiError {
    fn from(e: AggregateError) -> Self {
        match e {
            AggregateError::Cluster(e) => e.into(),
            e if e.is_timeout() => ApiError::Timeout,
            AggregateError::UpstreamFailure(errors)
                if errors.iter().all(|e| e.kind == ErrorKind::Cancelled) && !errors.is_empty() =>
            {
                ApiError::Cancelled
            }
            e => ApiError::Upstream(e.to_string()),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Unauthorized(msg) => ApiError::Unauthorized(msg),
            AuthError::Forbidden(msg) => ApiError::Forbidden(msg),
        }
    }
}
