use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use wolf_keys::KeyRegistryError;
use wolf_store::StoreError;

/// Error envelope rendered as `{"error": {"code", "message"}}`.
#[derive(Debug)]
pub(crate) struct ApiError {
    pub(crate) status: StatusCode,
    pub(crate) code: &'static str,
    pub(crate) message: String,
}

impl ApiError {
    pub(crate) fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub(crate) fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, code, message)
    }

    pub(crate) fn unprocessable(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, code, message)
    }

    pub(crate) fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, code, message)
    }

    pub(crate) fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "store_unavailable", message)
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({
                "error": {
                    "code": self.code,
                    "message": self.message,
                }
            })),
        )
            .into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        if error.is_unavailable() {
            tracing::warn!(error = %error, "store request failed");
            return Self::unavailable(error.to_string());
        }
        match error {
            StoreError::NotFound(id) => {
                Self::not_found("record_not_found", format!("record '{id}' was not found"))
            }
            StoreError::AlreadyExists(_) => Self::conflict("record_exists", error.to_string()),
            StoreError::InvalidTransition { .. } => {
                Self::conflict("invalid_transition", error.to_string())
            }
            StoreError::InvalidRecord(message) => Self::unprocessable("invalid_record", message),
            other => {
                tracing::error!(error = %other, "store request failed");
                Self::internal(other.to_string())
            }
        }
    }
}

impl From<KeyRegistryError> for ApiError {
    fn from(error: KeyRegistryError) -> Self {
        let code = match error {
            KeyRegistryError::UnrecognizedKey(_) => "unrecognized_key",
            KeyRegistryError::EmptyValue(_) => "empty_key_value",
        };
        Self::unprocessable(code, error.to_string())
    }
}
