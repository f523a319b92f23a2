use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::application::usecases::payments::PaymentError;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
}

pub fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    let body = Json(ErrorBody {
        error: ErrorDetails {
            code: status.as_u16().to_string(),
            message: message.into(),
        },
    });

    (status, body).into_response()
}

impl IntoResponse for PaymentError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if status.is_server_error() {
            // Don't leak internal error detail to client
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        error_response(status, message)
    }
}
