use crate::error::NotifyError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

impl NotifyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            NotifyError::Validation(_) => StatusCode::BAD_REQUEST,
            NotifyError::NotFound(_) => StatusCode::NOT_FOUND,
            NotifyError::DuplicateId(_) | NotifyError::AlreadyTerminal(_) => StatusCode::CONFLICT,
            NotifyError::Signature(_) => StatusCode::UNAUTHORIZED,
            NotifyError::Gateway(_) | NotifyError::Network(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            NotifyError::Validation(_) => "validation",
            NotifyError::NotFound(_) => "not_found",
            NotifyError::DuplicateId(_) => "duplicate_id",
            NotifyError::AlreadyTerminal(_) => "already_terminal",
            NotifyError::Signature(_) => "signature",
            NotifyError::Gateway(_) => "gateway",
            NotifyError::Network(_) => "network",
            _ => "internal",
        }
    }
}

impl IntoResponse for NotifyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if status.is_server_error() && !matches!(self, NotifyError::Gateway(_)) {
            tracing::error!(error = %self, "Request failed");
            "Internal error".to_string()
        } else {
            tracing::warn!(error = %self, "Request rejected");
            self.to_string()
        };
        let body = json!({
            "success": false,
            "error": self.kind(),
            "message": message,
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            NotifyError::Validation("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            NotifyError::AlreadyTerminal("EC1".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            NotifyError::Signature("x".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            NotifyError::Persistence("disk".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
