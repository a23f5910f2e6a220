use crate::domain::types::UserId;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use uuid::Uuid;

/// Identidad autenticada del caller, extraída del bearer token.
///
/// La emisión y firma del token es responsabilidad del servicio de
/// autenticación externo; el core solo consume el `user_id` embebido.
pub struct AuthenticatedUser(pub UserId);

/// Rechazo de autenticación: siempre 401.
pub struct AuthRejection;

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "status": "error",
            "message": "Missing or invalid bearer token",
        }));
        (StatusCode::UNAUTHORIZED, body).into_response()
    }
}

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(AuthRejection)?;

        let token = header.strip_prefix("Bearer ").ok_or(AuthRejection)?;
        let user_id = Uuid::parse_str(token.trim()).map_err(|_| AuthRejection)?;

        Ok(AuthenticatedUser(UserId(user_id)))
    }
}
