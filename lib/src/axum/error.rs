use axum::response::{IntoResponse, Response};
use axum::Json;
use http::StatusCode;

use crate::{Error, ErrorKind};

/// Implements conversion into a json response for all possible error
/// variants. The body is always `{"error": "<message>"}`.
///
/// # Error message stripping in production
///
/// When compiled with optimizations ("release mode"), messages of internal
/// failures are replaced with a generic one.
///
/// Backtrace and the owner the request was scoped to are never part of the
/// response and always only available through the application logs.
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, message) = match &self.kind {
            ErrorKind::BadInput(msg) => {
                tracing::debug!("{}", self);
                (StatusCode::BAD_REQUEST, msg.clone())
            }
            ErrorKind::NotFound(_) => {
                tracing::debug!("{}", self);
                (StatusCode::NOT_FOUND, "Not found".to_string())
            }
            ErrorKind::AuthFailed(_) => {
                tracing::debug!("{}", self);
                let msg = if cfg!(debug_assertions) {
                    self.kind.to_string()
                } else {
                    "Unauthorized".to_string()
                };
                (StatusCode::UNAUTHORIZED, msg)
            }
            ErrorKind::DispatchConflict(msg) => {
                tracing::debug!("{}", self);
                (StatusCode::CONFLICT, msg.clone())
            }
            _ => {
                tracing::error!("{}", self);
                let msg = if cfg!(debug_assertions) {
                    self.kind.to_string()
                } else {
                    "Internal server error".to_string()
                };
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_status_codes() {
        let cases = [
            (ErrorKind::BadInput("x".to_string()), StatusCode::BAD_REQUEST),
            (ErrorKind::NotFound("x".to_string()), StatusCode::NOT_FOUND),
            (ErrorKind::AuthFailed("x".to_string()), StatusCode::UNAUTHORIZED),
            (ErrorKind::DispatchConflict("x".to_string()), StatusCode::CONFLICT),
            (ErrorKind::Misconfigured("x".to_string()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (kind, status) in cases {
            assert_eq!(Error::new(kind).into_response().status(), status);
        }
    }
}
