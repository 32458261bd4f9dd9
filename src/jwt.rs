//! JWT token generation and validation.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::db::Role;

/// Token type for distinguishing the three token categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    /// Short-lived access token (15 minutes)
    Access,
    /// Long-lived refresh token (7 days, 30 with remember-me), tracked with JTI
    Refresh,
    /// Single-purpose password-reset token (5 minutes)
    PasswordReset,
}

/// Canonical claim shape shared by all token types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (account ID as string)
    pub sub: String,
    /// External account id
    pub uid: String,
    /// Account email
    pub email: String,
    /// Account role
    pub role: Role,
    pub first_name: String,
    pub last_name: String,
    /// Session correlating access and refresh tokens of one device
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// JWT ID (unique identifier for revocation tracking)
    pub jti: String,
    /// Token type
    #[serde(rename = "typ")]
    pub token_type: TokenType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remember_me: Option<bool>,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
    pub iss: String,
    pub aud: String,
}

/// Access token duration: 15 minutes
pub const ACCESS_TOKEN_DURATION_SECS: u64 = 15 * 60;

/// Refresh token duration: 7 days
pub const REFRESH_TOKEN_DURATION_SECS: u64 = 7 * 24 * 60 * 60;

/// Refresh token duration with remember-me: 30 days
pub const REMEMBER_ME_REFRESH_DURATION_SECS: u64 = 30 * 24 * 60 * 60;

/// Password-reset token duration: 5 minutes
pub const PASSWORD_RESET_DURATION_SECS: u64 = 5 * 60;

/// Key class used to sign and verify a token. Admin tokens use a distinct
/// secret so admin credentials can be rotated independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyScope {
    User,
    Admin,
}

impl KeyScope {
    pub fn for_role(role: Role) -> Self {
        match role {
            Role::Admin => KeyScope::Admin,
            _ => KeyScope::User,
        }
    }
}

/// Identity fields embedded into every issued token.
#[derive(Debug, Clone)]
pub struct TokenIdentity<'a> {
    pub account_id: i64,
    pub uid: &'a str,
    pub email: &'a str,
    pub role: Role,
    pub first_name: &'a str,
    pub last_name: &'a str,
}

/// Configuration for JWT operations, constructed once at startup and injected.
#[derive(Clone)]
pub struct JwtConfig {
    user_encoding: EncodingKey,
    user_decoding: DecodingKey,
    admin_encoding: EncodingKey,
    admin_decoding: DecodingKey,
    issuer: String,
    audience: String,
}

/// Result of issuing a single token.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    /// The JWT token string
    pub token: String,
    /// JWT ID
    pub jti: String,
    /// Issued at timestamp (Unix seconds)
    pub issued_at: u64,
    /// Expiration timestamp (Unix seconds)
    pub expires_at: u64,
    /// Token duration in seconds
    pub duration: u64,
}

/// Result of issuing an access/refresh pair sharing one session id.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access: IssuedToken,
    pub refresh: IssuedToken,
    /// Access token duration in seconds (client-facing expiresIn)
    pub expires_in: u64,
}

impl JwtConfig {
    /// Create a new JWT configuration. The user secret signs access, refresh
    /// and password-reset tokens for non-admin principals; the admin secret
    /// signs tokens for admin principals.
    pub fn new(user_secret: &[u8], admin_secret: &[u8], issuer: &str, audience: &str) -> Self {
        Self {
            user_encoding: EncodingKey::from_secret(user_secret),
            user_decoding: DecodingKey::from_secret(user_secret),
            admin_encoding: EncodingKey::from_secret(admin_secret),
            admin_decoding: DecodingKey::from_secret(admin_secret),
            issuer: issuer.to_string(),
            audience: audience.to_string(),
        }
    }

    /// Issue a single token of the given type with a fresh JTI.
    pub fn issue(
        &self,
        identity: &TokenIdentity,
        token_type: TokenType,
        duration: u64,
        session_id: Option<&str>,
        remember_me: bool,
    ) -> Result<IssuedToken, JwtError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|_| JwtError::TimeError)?
            .as_secs();

        let jti = uuid::Uuid::new_v4().to_string();
        let exp = now + duration;

        let claims = Claims {
            sub: identity.account_id.to_string(),
            uid: identity.uid.to_string(),
            email: identity.email.to_string(),
            role: identity.role,
            first_name: identity.first_name.to_string(),
            last_name: identity.last_name.to_string(),
            session_id: session_id.map(str::to_string),
            jti: jti.clone(),
            token_type,
            remember_me: remember_me.then_some(true),
            iat: now,
            exp,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };

        let key = match KeyScope::for_role(identity.role) {
            KeyScope::User => &self.user_encoding,
            KeyScope::Admin => &self.admin_encoding,
        };

        let token =
            jsonwebtoken::encode(&Header::default(), &claims, key).map_err(JwtError::Encoding)?;

        Ok(IssuedToken {
            token,
            jti,
            issued_at: now,
            expires_at: exp,
            duration,
        })
    }

    /// Issue an access/refresh pair sharing the same session id so both
    /// tokens can be correlated and revoked together.
    pub fn issue_pair(
        &self,
        identity: &TokenIdentity,
        remember_me: bool,
        session_id: &str,
    ) -> Result<TokenPair, JwtError> {
        let access = self.issue(
            identity,
            TokenType::Access,
            ACCESS_TOKEN_DURATION_SECS,
            Some(session_id),
            remember_me,
        )?;

        let refresh_duration = if remember_me {
            REMEMBER_ME_REFRESH_DURATION_SECS
        } else {
            REFRESH_TOKEN_DURATION_SECS
        };
        let refresh = self.issue(
            identity,
            TokenType::Refresh,
            refresh_duration,
            Some(session_id),
            remember_me,
        )?;

        Ok(TokenPair {
            access,
            refresh,
            expires_in: ACCESS_TOKEN_DURATION_SECS,
        })
    }

    /// Validate and decode a token, enforcing signature, issuer, audience,
    /// expiry and token type. Expiry is reported distinctly so callers can
    /// tell "please refresh" apart from "please re-authenticate".
    pub fn verify(
        &self,
        token: &str,
        expected_type: TokenType,
        scope: KeyScope,
    ) -> Result<Claims, JwtError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);

        let key = match scope {
            KeyScope::User => &self.user_decoding,
            KeyScope::Admin => &self.admin_decoding,
        };

        let token_data =
            jsonwebtoken::decode::<Claims>(token, key, &validation).map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => JwtError::Expired,
                _ => JwtError::Invalid(e),
            })?;

        // The library only rejects exp < now; a token is dead at its exp
        // instant, not one second after
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|_| JwtError::TimeError)?
            .as_secs();
        if token_data.claims.exp <= now {
            return Err(JwtError::Expired);
        }

        if token_data.claims.token_type != expected_type {
            return Err(JwtError::TypeMismatch);
        }

        Ok(token_data.claims)
    }
}

/// Errors that can occur during JWT operations.
#[derive(Debug)]
pub enum JwtError {
    /// Error encoding the token
    Encoding(jsonwebtoken::errors::Error),
    /// Signature, structure, issuer or audience mismatch
    Invalid(jsonwebtoken::errors::Error),
    /// Well-formed token past its expiry
    Expired,
    /// Wrong token type (e.g., an access token where a refresh token is expected)
    TypeMismatch,
    /// System time error
    TimeError,
}

impl std::fmt::Display for JwtError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JwtError::Encoding(e) => write!(f, "Failed to encode token: {}", e),
            JwtError::Invalid(e) => write!(f, "Invalid token: {}", e),
            JwtError::Expired => write!(f, "Token has expired"),
            JwtError::TypeMismatch => write!(f, "Wrong token type"),
            JwtError::TimeError => write!(f, "System time error"),
        }
    }
}

impl std::error::Error for JwtError {}
