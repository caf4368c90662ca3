//! Error types.

use std::path::PathBuf;

use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} has an invalid value: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Error)]
pub enum ModelConfigError {
    #[error("failed to read model config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("model config is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported model config: {0}")]
    Unsupported(String),
}

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("could not decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("image is empty")]
    Empty,
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("failed to read model {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("tensorflow: {0}")]
    Tensorflow(#[from] tensorflow::Status),

    #[error("operation {0:?} not found in graph")]
    OperationNotFound(String),

    #[error("signature {0:?} has no {1} tensor")]
    Signature(String, &'static str),

    #[error("model produced {got} scores but {expected} classes are configured")]
    OutputMismatch { expected: usize, got: usize },

    #[error("model produced no scores")]
    EmptyOutput,

    #[error("label catalog is empty")]
    NoLabels,

    #[error("failed to read class list {path}: {source}")]
    ClassList {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ModelConfigError),
}

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("{0} does not exist and no download URL is configured")]
    Missing(PathBuf),

    #[error("download of {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("download of {url} returned {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum PredictionError {
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),

    #[error(transparent)]
    Model(#[from] ModelError),
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    /// Upload rejected while reading the request body.
    #[error("{1}")]
    Upload(StatusCode, String),

    #[error(transparent)]
    Prediction(#[from] PredictionError),

    #[error("{0}")]
    Internal(String),

    #[error("An internal error occurred")]
    Redacted,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn upload(err: MultipartError, context: &str) -> Self {
        Self::Upload(err.status(), format!("{context}: {err}"))
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Upload(status, _) => *status,
            ApiError::Prediction(PredictionError::Preprocess(_)) => StatusCode::BAD_REQUEST,
            ApiError::Prediction(PredictionError::Model(_))
            | ApiError::Internal(_)
            | ApiError::Redacted => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// In production, server errors lose their details before reaching the
    /// client. The full error is logged here.
    pub fn redact(self, production: bool) -> Self {
        if production && self.status_code().is_server_error() {
            tracing::error!(error = %self, "request failed");
            ApiError::Redacted
        } else {
            self
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() && !matches!(self, ApiError::Redacted) {
            tracing::error!(error = %self, "request failed");
        }

        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
