use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::handlers::orders::ErrorBody;
use crate::services::OrderServiceError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Text sent to clients. Internal details stay in the logs.
    fn public_message(&self) -> String {
        match self {
            AppError::NotFound(what) => format!("{} not found", what),
            AppError::Internal(_) => "internal server error".to_string(),
        }
    }
}

impl From<OrderServiceError> for AppError {
    fn from(e: OrderServiceError) -> Self {
        match e {
            OrderServiceError::NotFound(uid) => AppError::NotFound(format!("order {}", uid)),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if let AppError::Internal(detail) = &self {
            tracing::error!(error = %detail, "Request failed");
        }

        let body = Json(ErrorBody {
            error: self.public_message(),
            status: status.as_u16(),
        });

        (status, body).into_response()
    }
}
