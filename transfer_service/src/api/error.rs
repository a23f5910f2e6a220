use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::domain::error::TransferError;

// Error unificado para la API del servicio de transferencias.
pub struct ApiError(pub TransferError);

// Permitimos convertir errores de dominio al ApiError implícitamente
impl From<TransferError> for ApiError {
    fn from(err: TransferError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self.0 {
            TransferError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, self.0.to_string()),
            TransferError::CurrencyMismatch => (StatusCode::BAD_REQUEST, self.0.to_string()),
            TransferError::InsufficientBalance(_) => (StatusCode::BAD_REQUEST, self.0.to_string()),
            TransferError::LimitExceeded(_) => (StatusCode::BAD_REQUEST, self.0.to_string()),
            TransferError::NotFound(_) => (StatusCode::NOT_FOUND, self.0.to_string()),
            TransferError::Conflict(_) => (StatusCode::CONFLICT, self.0.to_string()),
            TransferError::LockTimeout(_) => {
                tracing::warn!("Lock timeout surfaced to caller: {}", self.0);
                (StatusCode::SERVICE_UNAVAILABLE, self.0.to_string())
            }
            TransferError::Cache(ref e) | TransferError::Store(ref e) => {
                tracing::error!("Infrastructure error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            TransferError::CompensationFailure(ref e) => {
                tracing::error!("Compensation failure: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "status": "error",
            "message": error_message,
            "code": self.0.error_code(),
        }));

        (status, body).into_response()
    }
}
