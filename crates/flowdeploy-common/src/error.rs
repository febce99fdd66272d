use axum::http;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Coarse status class of a failed operation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    ParamInvalid,
    Failed,
    Unsupported,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeployError {
    /// Malformed or missing input: model, device id string, unknown model/node id.
    #[error("invalid parameter: {0}")]
    ParamInvalid(String),

    /// Resource mismatch, unresolved rank/host, dispatch failure.
    #[error("operation failed: {0}")]
    Failed(String),

    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl DeployError {
    pub fn param_invalid(msg: impl Into<String>) -> Self {
        DeployError::ParamInvalid(msg.into())
    }

    pub fn failed(msg: impl Into<String>) -> Self {
        DeployError::Failed(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        DeployError::Unsupported(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            DeployError::ParamInvalid(_) => StatusCode::ParamInvalid,
            DeployError::Failed(_) => StatusCode::Failed,
            DeployError::Unsupported(_) => StatusCode::Unsupported,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            DeployError::ParamInvalid(m) | DeployError::Failed(m) | DeployError::Unsupported(m) => m,
        }
    }
}

/// JSON error body returned by the HTTP APIs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorDetail {
    pub code: StatusCode,
    pub message: String,
    pub request_id: String,
}

impl ErrorBody {
    pub fn from_error(err: &DeployError) -> Self {
        Self {
            error: ErrorDetail {
                code: err.status(),
                message: err.message().to_string(),
                request_id: format!("req_{}", Uuid::new_v4()),
            },
        }
    }

    pub fn into_error(self) -> DeployError {
        match self.error.code {
            StatusCode::ParamInvalid => DeployError::ParamInvalid(self.error.message),
            StatusCode::Failed => DeployError::Failed(self.error.message),
            StatusCode::Unsupported => DeployError::Unsupported(self.error.message),
        }
    }
}

impl DeployError {
    pub fn http_status(&self) -> http::StatusCode {
        match self {
            DeployError::ParamInvalid(_) => http::StatusCode::BAD_REQUEST,
            DeployError::Failed(_) => http::StatusCode::INTERNAL_SERVER_ERROR,
            DeployError::Unsupported(_) => http::StatusCode::UNPROCESSABLE_ENTITY,
        }
    }
}

impl IntoResponse for DeployError {
    fn into_response(self) -> Response {
        (self.http_status(), Json(ErrorBody::from_error(&self))).into_response()
    }
}

impl From<anyhow::Error> for DeployError {
    fn from(err: anyhow::Error) -> Self {
        DeployError::Failed(format!("{err:#}"))
    }
}

pub type Result<T> = std::result::Result<T, DeployError>;
