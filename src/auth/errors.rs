//! The authentication error taxonomy and its HTTP mapping.
//!
//! Clients see a stable JSON shape with a message they can act on; storage
//! and crypto details are logged server-side and never leak into responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::jwt::JwtError;
use crate::password::PasswordError;

#[derive(Debug)]
pub enum AuthError {
    /// Malformed or missing input (400)
    Validation(String),
    /// Duplicate identity on registration (409)
    Conflict(String),
    /// Known identity, wrong password (401)
    InvalidCredentials,
    /// Unknown identity at login (404); deliberate asymmetry with
    /// InvalidCredentials so clients can offer sign-up
    UnknownIdentity,
    /// Lockout hit at the login door (429)
    AccountLocked,
    /// Lockout discovered mid-session by an authenticated request (423)
    SessionLocked,
    /// No token where one is required (401)
    TokenMissing,
    /// Bad signature, structure, issuer or audience (401)
    TokenInvalid,
    /// Well-formed token past its expiry (401, distinct message so clients
    /// know to refresh rather than re-authenticate)
    TokenExpired,
    /// Right token, wrong type slot (401)
    TokenTypeMismatch,
    /// Token known and already revoked, e.g. a replayed refresh token (401)
    TokenRevoked,
    /// Authenticated but not allowed (403)
    Forbidden,
    /// Referenced record does not exist (404)
    NotFound(String),
    /// Storage failure (500)
    Storage(sqlx::Error),
    /// Anything else that is our fault (500)
    Internal(String),
}

impl AuthError {
    fn status(&self) -> StatusCode {
        match self {
            AuthError::Validation(_) => StatusCode::BAD_REQUEST,
            AuthError::Conflict(_) => StatusCode::CONFLICT,
            AuthError::InvalidCredentials
            | AuthError::TokenMissing
            | AuthError::TokenInvalid
            | AuthError::TokenExpired
            | AuthError::TokenTypeMismatch
            | AuthError::TokenRevoked => StatusCode::UNAUTHORIZED,
            AuthError::UnknownIdentity | AuthError::NotFound(_) => StatusCode::NOT_FOUND,
            AuthError::AccountLocked => StatusCode::TOO_MANY_REQUESTS,
            AuthError::SessionLocked => StatusCode::LOCKED,
            AuthError::Forbidden => StatusCode::FORBIDDEN,
            AuthError::Storage(_) | AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            AuthError::Validation(msg) => msg.clone(),
            AuthError::Conflict(msg) => msg.clone(),
            AuthError::InvalidCredentials => "Invalid credentials".to_string(),
            AuthError::UnknownIdentity => "Account not found".to_string(),
            AuthError::AccountLocked => {
                "Account temporarily locked due to repeated failed logins".to_string()
            }
            AuthError::SessionLocked => "Account is locked".to_string(),
            AuthError::TokenMissing => "Authentication required".to_string(),
            AuthError::TokenInvalid => "Invalid token".to_string(),
            AuthError::TokenExpired => "Token expired".to_string(),
            AuthError::TokenTypeMismatch => "Wrong token type".to_string(),
            AuthError::TokenRevoked => "Token has been revoked".to_string(),
            AuthError::Forbidden => "Forbidden".to_string(),
            AuthError::NotFound(msg) => msg.clone(),
            AuthError::Storage(_) | AuthError::Internal(_) => "Internal server error".to_string(),
        }
    }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::Storage(e) => write!(f, "storage error: {}", e),
            AuthError::Internal(msg) => write!(f, "internal error: {}", msg),
            other => write!(f, "{}", other.message()),
        }
    }
}

impl std::error::Error for AuthError {}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        match &self {
            AuthError::Storage(e) => {
                tracing::error!(error = %e, "storage error during authentication");
            }
            AuthError::Internal(msg) => {
                tracing::error!(error = %msg, "internal error during authentication");
            }
            _ => {}
        }

        let status = self.status();
        (status, Json(json!({ "error": self.message() }))).into_response()
    }
}

impl From<sqlx::Error> for AuthError {
    fn from(e: sqlx::Error) -> Self {
        AuthError::Storage(e)
    }
}

impl From<JwtError> for AuthError {
    fn from(e: JwtError) -> Self {
        match e {
            JwtError::Expired => AuthError::TokenExpired,
            JwtError::TypeMismatch => AuthError::TokenTypeMismatch,
            JwtError::Invalid(_) => AuthError::TokenInvalid,
            JwtError::Encoding(err) => AuthError::Internal(format!("token encoding: {}", err)),
            JwtError::TimeError => AuthError::Internal("system clock unavailable".to_string()),
        }
    }
}

impl From<PasswordError> for AuthError {
    fn from(e: PasswordError) -> Self {
        AuthError::Internal(format!("password hashing: {}", e))
    }
}
