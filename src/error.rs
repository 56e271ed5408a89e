//! Error types and Axum response conversions.

use crate::auth::nonce::IssueError;
use crate::auth::verifier::VerifyError;
use crate::storage::StoreError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Application error types.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// A well-formed sign-in attempt that failed a check.
    #[error("Unprocessable: {0}")]
    Unprocessable(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Internal(msg) => {
                // Log detailed error server-side, return generic message to client
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            AppError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
        };

        let body = Json(json!({
            "ok": false,
            "message": message
        }));

        (status, body).into_response()
    }
}

impl From<IssueError> for AppError {
    fn from(err: IssueError) -> Self {
        AppError::Internal(format!("Failed to issue nonce: {}", err))
    }
}

/// Nonce-missing and nonce-mismatch share one message so a client cannot
/// tell which check failed.
impl From<VerifyError> for AppError {
    fn from(err: VerifyError) -> Self {
        match err {
            VerifyError::MalformedMessage(e) => {
                AppError::BadRequest(format!("Malformed sign-in message: {}", e))
            }
            VerifyError::NoOutstandingNonce | VerifyError::NonceMismatch => {
                AppError::Unprocessable("Invalid or expired nonce.".to_string())
            }
            VerifyError::SignatureInvalid(_) => {
                AppError::Unprocessable("Invalid signature.".to_string())
            }
            VerifyError::MessageExpired => {
                AppError::Unprocessable("Sign-in message has expired.".to_string())
            }
            VerifyError::MessageNotYetValid => {
                AppError::Unprocessable("Sign-in message is not yet valid.".to_string())
            }
            VerifyError::DomainMismatch { .. } => {
                AppError::Unprocessable("Sign-in message domain does not match.".to_string())
            }
            VerifyError::Store(e) => AppError::from(e),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::Internal(format!("Nonce store error: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(format!("JSON error: {}", err))
    }
}
