use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::api::dto::ErrorResponse;
use crate::orchestrator::ChatError;

const TURN_FAILED: &str = "Failed to get AI response";

impl ChatError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ChatError::Validation(_) | ChatError::Identity(_) => StatusCode::BAD_REQUEST,
            ChatError::NotFound(_) => StatusCode::NOT_FOUND,
            ChatError::Configuration(_)
            | ChatError::Provider(_)
            | ChatError::Storage(_)
            | ChatError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
            ErrorResponse::new(TURN_FAILED).with_details(self.to_string())
        } else {
            ErrorResponse::new(self.to_string())
        };
        (status, Json(body)).into_response()
    }
}
