use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::sanitize::{sanitize_error, sanitize_value};

/// The application's error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// Invalid startup configuration (missing active key, unreadable key file).
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// The external identity token could not be verified.
    #[error("Identity verification failed: {0}")]
    IdentityInvalid(String),

    /// A token failed signature, key id, claim or format checks.
    #[error("Invalid token: {0}")]
    TokenInvalid(String),

    /// A token is past its expiry.
    #[error("Token expired")]
    TokenExpired,

    /// The refresh token hash has no live session entry.
    #[error("Refresh token revoked or expired")]
    TokenRevoked,

    /// The user already holds the maximum number of sessions.
    #[error("Login max devices reached: {max}")]
    SessionLimitExceeded { max: usize },

    /// The token subject no longer resolves to a user.
    #[error("User not found: {0}")]
    UserNotFound(i64),

    /// Generic user-facing login failure.
    #[error("Login failed")]
    LoginFailed,

    /// Generic user-facing authorization failure.
    #[error("Unauthorized")]
    Unauthorized,

    /// A session store (Redis) error.
    #[error("Session store error: {0}")]
    SessionStore(#[from] redis::RedisError),

    /// A session store call exceeded its deadline.
    #[error("Session store timed out")]
    SessionStoreTimeout,

    /// A database error.
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// A connection pool error.
    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// The system clock went backwards while generating ids.
    #[error("Clock moved backwards. Refusing to generate id for {millis} ms")]
    ClockMovedBackwards { millis: i64 },

    /// An internal server error.
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// A `Result` type that uses `AppError` as the error type.
pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Whether the session store failed or timed out, so the caller may retry.
    ///
    /// User directory failures are not included; auth flows report those
    /// with their generic failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::SessionStore(_) | AppError::SessionStoreTimeout)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::LoginFailed | AppError::IdentityInvalid(_) => {
                tracing::warn!("Login failed");
                (StatusCode::UNAUTHORIZED, "Login failed".to_string())
            }

            AppError::TokenInvalid(_)
            | AppError::TokenExpired
            | AppError::TokenRevoked
            | AppError::UserNotFound(_)
            | AppError::Unauthorized => {
                tracing::warn!("Authorization failed");
                (StatusCode::UNAUTHORIZED, "Unauthorized".to_string())
            }

            AppError::SessionLimitExceeded { max } => {
                tracing::warn!("Session limit reached ({})", max);
                (
                    StatusCode::UNAUTHORIZED,
                    format!("Login max devices reached: {}", max),
                )
            }

            AppError::SessionStore(ref e) => {
                tracing::error!("Session store error: {}", sanitize_error(e));
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Session store unavailable".to_string(),
                )
            }

            AppError::SessionStoreTimeout => {
                tracing::error!("Session store timed out");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Session store unavailable".to_string(),
                )
            }

            AppError::Pool(ref e) => {
                tracing::error!("Pool error: {}", sanitize_error(e));
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Service unavailable".to_string(),
                )
            }

            AppError::Database(ref e) => {
                tracing::error!("Database error: {}", sanitize_error(e));
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }

            AppError::ConfigInvalid(ref msg) | AppError::Internal(ref msg) => {
                tracing::error!("Internal error: {}", sanitize_value(msg));
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }

            AppError::ClockMovedBackwards { millis } => {
                tracing::error!("Clock moved backwards by {} ms", millis);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = sonic_rs::to_string(&sonic_rs::json!({
            "error": message
        }))
        .unwrap_or_else(|_| r#"{"error":"Internal server error"}"#.to_string());

        (status, [(http::header::CONTENT_TYPE, "application/json")], body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_of(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn credential_failures_collapse_to_unauthorized() {
        for err in [
            AppError::TokenInvalid("bad signature".into()),
            AppError::TokenExpired,
            AppError::TokenRevoked,
            AppError::UserNotFound(42),
        ] {
            let response = err.into_response();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(body_of(response).await, r#"{"error":"Unauthorized"}"#);
        }
    }

    #[tokio::test]
    async fn session_limit_reaches_the_caller() {
        let response = AppError::SessionLimitExceeded { max: 5 }.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            body_of(response).await,
            r#"{"error":"Login max devices reached: 5"}"#
        );
    }

    #[tokio::test]
    async fn internal_detail_is_not_echoed() {
        let response =
            AppError::Internal("secret=hunter2 while signing".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_of(response).await;
        assert!(!body.contains("hunter2"));
    }

    #[test]
    fn store_failures_are_retryable() {
        assert!(AppError::SessionStoreTimeout.is_retryable());
        assert!(!AppError::TokenRevoked.is_retryable());
        assert!(!AppError::Pool(deadpool_postgres::PoolError::Closed).is_retryable());
    }
}
