use std::error::Error;
use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tally_metrics::{DecodeError, MetricType, ValidationError};
use tally_store::StoreError;

/// An error response from an api.
#[derive(Serialize, Deserialize, Default, Debug)]
pub struct ApiErrorResponse {
    #[serde(default)]
    detail: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    causes: Vec<String>,
}

impl ApiErrorResponse {
    /// Creates an error response with a detail message.
    pub fn with_detail<S: AsRef<str>>(s: S) -> ApiErrorResponse {
        ApiErrorResponse {
            detail: Some(s.as_ref().to_owned()),
            causes: Vec::new(),
        }
    }

    /// Creates an error response from an error and its chain of sources.
    pub fn from_error<E: Error + ?Sized>(error: &E) -> ApiErrorResponse {
        let detail = Some(error.to_string());

        let mut causes = Vec::new();
        let mut source = error.source();
        while let Some(s) = source {
            let message = s.to_string();
            if !causes.contains(&message) {
                causes.push(message);
            }
            source = s.source();
        }

        ApiErrorResponse { detail, causes }
    }
}

impl fmt::Display for ApiErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.detail {
            Some(ref detail) => f.write_str(detail),
            None => f.write_str("no error details"),
        }
    }
}

impl IntoResponse for ApiErrorResponse {
    fn into_response(self) -> Response {
        axum::Json(self).into_response()
    }
}

/// An error returned by request handlers and middlewares.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The submitted metric could not be decoded.
    #[error("invalid metric")]
    Decode(#[from] DecodeError),

    /// The submitted metric is incomplete.
    #[error("invalid metric")]
    Validation(#[from] ValidationError),

    /// The request body has an unsupported content type.
    #[error("unsupported content type")]
    UnsupportedMediaType,

    /// The payload signature does not match the body.
    #[error("invalid payload signature")]
    SignatureMismatch,

    /// The body could not be read, for example due to invalid compression.
    #[error("could not read request body")]
    InvalidBody(#[source] axum::Error),

    /// The store failed or the requested metric does not exist.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApiError {
    /// Returns the HTTP status code for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Decode(_) | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::SignatureMismatch | Self::InvalidBody(_) => StatusCode::BAD_REQUEST,
            Self::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::Store(StoreError::NotFound { .. }) => StatusCode::NOT_FOUND,
            Self::Store(error) if error.is_unique_violation() => StatusCode::CONFLICT,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            tally_log::error!(error = &self as &dyn Error, "request failed");
        } else {
            tally_log::debug!(error = &self as &dyn Error, "rejecting request");
        }

        (status, ApiErrorResponse::from_error(&self)).into_response()
    }
}
