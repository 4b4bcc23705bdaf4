use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Error taxonomy shared by every inbound route and background task.
///
/// Notification routes do not let most of these escape to `IntoResponse` —
/// they are caught in `api::notifications` and folded into a 200 response
/// with the error logged, per spec: providers must not be given a reason to
/// enter a retry storm. `SignatureInvalid` is the one variant that is
/// allowed to surface honestly, so a misconfigured integration is visible
/// to the provider's webhook dashboard.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("signature invalid: {0}")]
    SignatureInvalid(String),

    #[error("tenant is missing provider configuration: {0}")]
    ConfigurationMissing(String),

    #[error("receipt invalid: {0}")]
    ReceiptInvalid(String),

    #[error("notification already processed")]
    DuplicateNotification,

    #[error("no subscription event to process: {0}")]
    AcknowledgedNoEvent(String),

    #[error("upstream provider error: {0}")]
    TransientUpstream(String),

    #[error("webhook delivery failed: {0}")]
    WebhookDeliveryFailed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Stable machine-readable code for the `{error: {code, message}}` body.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::DatabaseError(_) => "internal_error",
            AppError::NotFound(_) => "not_found",
            AppError::BadRequest(_) => "bad_request",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::ValidationError(_) => "validation_error",
            AppError::SignatureInvalid(_) => "signature_invalid",
            AppError::ConfigurationMissing(_) => "configuration_missing",
            AppError::ReceiptInvalid(_) => "receipt_invalid",
            AppError::DuplicateNotification => "duplicate_notification",
            AppError::AcknowledgedNoEvent(_) => "acknowledged",
            AppError::TransientUpstream(_) => "transient_upstream",
            AppError::WebhookDeliveryFailed(_) => "webhook_delivery_failed",
            AppError::Other(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::ValidationError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::SignatureInvalid(_) => StatusCode::BAD_REQUEST,
            AppError::ConfigurationMissing(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::ReceiptInvalid(_) => StatusCode::BAD_REQUEST,
            AppError::DuplicateNotification => StatusCode::OK,
            AppError::AcknowledgedNoEvent(_) => StatusCode::OK,
            AppError::TransientUpstream(_) => StatusCode::BAD_GATEWAY,
            AppError::WebhookDeliveryFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
