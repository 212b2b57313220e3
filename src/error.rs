use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    /// A required setting is missing; carries the variable name.
    #[error("{0} not set")]
    Config(&'static str),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("telephony gateway error: {0}")]
    Gateway(String),

    #[error("text generation error: {0}")]
    Generation(String),

    #[error("speech synthesis error: {0}")]
    Synthesis(String),

    #[error("record store error: {0}")]
    Store(String),
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::Store(e.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        AppError::Store(e.to_string())
    }
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "status": "error",
            "message": self.to_string(),
        });
        (self.status_code(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_names_the_variable() {
        let e = AppError::Config("BASE_URL");
        assert_eq!(e.to_string(), "BASE_URL not set");
        assert_eq!(e.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn bad_request_maps_to_400() {
        let e = AppError::BadRequest("Phone number is required".to_string());
        assert_eq!(e.status_code(), StatusCode::BAD_REQUEST);
    }
}
