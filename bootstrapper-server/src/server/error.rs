use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use bootstrapper_core::error::AppError;

/// A result type used to work seamlessly with axum.
pub type ServerResult<T> = std::result::Result<T, ServerError>;

/// A newtype to make anyhow errors work with axum, tagged with the failed operation.
#[derive(Debug)]
pub struct ServerError {
    operation: &'static str,
    err: anyhow::Error,
}

/// The body of an error response.
#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
    operation: &'static str,
    code: &'static str,
    /// The full error chain.
    details: String,
}

/// An extension for tagging errors with the operation which failed.
pub trait OperationExt<T> {
    fn op(self, operation: &'static str) -> ServerResult<T>;
}

impl<T, E> OperationExt<T> for std::result::Result<T, E>
where
    E: Into<anyhow::Error>,
{
    fn op(self, operation: &'static str) -> ServerResult<T> {
        self.map_err(|err| ServerError { operation, err: err.into() })
    }
}

impl ServerError {
    fn status(&self) -> (StatusCode, &'static str) {
        match self.err.downcast_ref::<AppError>() {
            Some(err @ AppError::InvalidInput(_)) => (StatusCode::BAD_REQUEST, err.code()),
            Some(err @ AppError::ResourceNotFound(_)) => (StatusCode::NOT_FOUND, err.code()),
            Some(err @ AppError::Timeout(_)) => (StatusCode::GATEWAY_TIMEOUT, err.code()),
            Some(err @ AppError::Ise(_)) => (StatusCode::INTERNAL_SERVER_ERROR, err.code()),
            None => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, code) = self.status();
        if status.is_server_error() {
            tracing::error!(error = ?self.err, operation = self.operation, "error handling request");
        } else {
            tracing::debug!(error = ?self.err, operation = self.operation, "request rejected");
        }
        let message = match self.err.downcast_ref::<AppError>() {
            Some(err) => err.to_string(),
            None => self.err.to_string(),
        };
        let body = ErrorBody {
            message,
            operation: self.operation,
            code,
            details: format!("{:#}", self.err),
        };
        (status, Json(body)).into_response()
    }
}
