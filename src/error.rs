use crate::types::ErrorBody;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};

/// Message shown to buyers when a payment outcome could not be established.
pub const PAYMENT_UNCONFIRMED: &str =
    "payment could not be confirmed, please retry or contact support";

/// Application-specific error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Authentication required")]
    AuthenticationRequired,

    #[error("Access denied: {0}")]
    AuthorizationDenied(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Invalid webhook signature: {0}")]
    SignatureInvalid(String),

    #[error("{0} has expired")]
    AlreadyExpired(String),

    #[error("Download limit reached")]
    LimitExceeded,

    #[error("{} ({})", PAYMENT_UNCONFIRMED, .0)]
    ProviderUnavailable(String),

    #[error("Database operation failed: {0}")]
    StoreWriteFailed(String),

    #[error("Database connection failed")]
    DatabaseConnection,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

impl AppError {
    /// Get the appropriate HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::AuthenticationRequired => StatusCode::UNAUTHORIZED,

            AppError::AuthorizationDenied(_)
            | AppError::AlreadyExpired(_)
            | AppError::LimitExceeded => StatusCode::FORBIDDEN,

            AppError::NotFound(_) => StatusCode::NOT_FOUND,

            AppError::SignatureInvalid(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,

            AppError::ProviderUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,

            AppError::StoreWriteFailed(_)
            | AppError::DatabaseConnection
            | AppError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether re-delivering the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::ProviderUnavailable(_)
                | AppError::StoreWriteFailed(_)
                | AppError::DatabaseConnection
        )
    }

    /// Status code for provider webhook deliveries: 400 for payloads that will
    /// never be accepted, 404 for unknown references, 500 (retry) otherwise.
    pub fn webhook_status_code(&self) -> StatusCode {
        match self {
            AppError::SignatureInvalid(_)
            | AppError::BadRequest(_)
            | AppError::AuthorizationDenied(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status_code = self.status_code();
        if status_code.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        (status_code, Json(ErrorBody::new(self.to_string()))).into_response()
    }
}

/// Result type for application operations
pub type AppResult<T> = Result<T, AppError>;

impl From<diesel::result::Error> for AppError {
    fn from(err: diesel::result::Error) -> Self {
        AppError::StoreWriteFailed(err.to_string())
    }
}

impl From<diesel::r2d2::PoolError> for AppError {
    fn from(err: diesel::r2d2::PoolError) -> Self {
        tracing::error!(error = %err, "failed to check out database connection");
        AppError::DatabaseConnection
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::ProviderUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_status_codes() {
        assert_eq!(
            AppError::AuthenticationRequired.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(AppError::LimitExceeded.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            AppError::AlreadyExpired("access".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AppError::NotFound("token".into()).status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn webhook_codes() {
        assert_eq!(
            AppError::SignatureInvalid("x".into()).webhook_status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::ProviderUnavailable("timeout".into()).webhook_status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert!(AppError::StoreWriteFailed("busy".into()).is_retryable());
        assert!(!AppError::SignatureInvalid("x".into()).is_retryable());
    }

    #[test]
    fn provider_errors_carry_generic_message() {
        let message = AppError::ProviderUnavailable("timeout".into()).to_string();
        assert!(message.starts_with(PAYMENT_UNCONFIRMED));
    }
}
