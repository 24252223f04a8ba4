use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt::Display;
use tracing::error;

use crate::engine::EngineError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation", message)
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", "unauthorized")
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", "resource not found")
    }

    pub fn internal<E: Display>(error: E) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal",
            error.to_string(),
        )
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.code, self.status, self.message)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = Json(ErrorResponse {
            error: self.message,
            code: self.code,
        });
        (status, body).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
}

fn engine_status(err: &EngineError) -> StatusCode {
    match err {
        EngineError::NotFound => StatusCode::NOT_FOUND,
        EngineError::InvalidState(_)
        | EngineError::AlreadyResolved
        | EngineError::DelegationCycle
        | EngineError::ConcurrentVersionConflict
        | EngineError::Locked => StatusCode::CONFLICT,
        EngineError::NotApprover | EngineError::Forbidden => StatusCode::FORBIDDEN,
        EngineError::InvalidWorkflow(_) => StatusCode::UNPROCESSABLE_ENTITY,
        EngineError::Validation(_) => StatusCode::BAD_REQUEST,
        EngineError::RecallWindowExpired => StatusCode::GONE,
        EngineError::PaymentRequired => StatusCode::PAYMENT_REQUIRED,
        EngineError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<EngineError> for AppError {
    fn from(value: EngineError) -> Self {
        let status = engine_status(&value);
        if let EngineError::Database(err) = &value {
            error!(error = %err, "database error");
            return AppError::new(status, value.code(), "internal database error");
        }
        AppError::new(status, value.code(), value.to_string())
    }
}

impl From<diesel::result::Error> for AppError {
    fn from(value: diesel::result::Error) -> Self {
        EngineError::from(value).into()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        AppError::internal(value)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        AppError::bad_request(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_engine_errors_to_statuses() {
        let cases = [
            (EngineError::NotFound, StatusCode::NOT_FOUND),
            (EngineError::Locked, StatusCode::CONFLICT),
            (EngineError::AlreadyResolved, StatusCode::CONFLICT),
            (EngineError::DelegationCycle, StatusCode::CONFLICT),
            (EngineError::NotApprover, StatusCode::FORBIDDEN),
            (
                EngineError::invalid_workflow("gap"),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (EngineError::validation("bad"), StatusCode::BAD_REQUEST),
            (EngineError::RecallWindowExpired, StatusCode::GONE),
            (EngineError::PaymentRequired, StatusCode::PAYMENT_REQUIRED),
        ];
        for (err, status) in cases {
            let code = err.code();
            let app: AppError = err.into();
            assert_eq!(app.status(), status);
            assert_eq!(app.code(), code);
        }
    }

    #[test]
    fn diesel_not_found_becomes_404() {
        let app: AppError = diesel::result::Error::NotFound.into();
        assert_eq!(app.status(), StatusCode::NOT_FOUND);
        assert_eq!(app.code(), "not_found");
    }
}
