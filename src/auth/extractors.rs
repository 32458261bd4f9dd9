//! Request extractors for authenticated handlers.
//!
//! `RequireUser` and `RequireAdmin` reject the request with the proper error
//! when authentication fails; `MaybeUser` never rejects and yields `None`
//! instead, for endpoints that adapt to an optional viewer.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use std::convert::Infallible;

use super::cookie::{self, ACCESS_COOKIE_NAME, ADMIN_ACCESS_COOKIE_NAME, SESSION_ID_HEADER};
use super::errors::AuthError;
use crate::db::{unix_now, Database, Role};
use crate::jwt::{Claims, JwtConfig, JwtError, KeyScope, TokenType};

/// Application states that can serve the auth extractors.
pub trait HasAuthState {
    fn jwt(&self) -> &JwtConfig;
    fn db(&self) -> &Database;
}

/// Verify the access token on a request and check the account's lock state.
///
/// Also opportunistically refreshes session activity: a session id supplied
/// via the `x-session-id` header (or failing that, the token's own session
/// claim) gets its last-seen timestamp bumped. Touch failures are logged and
/// swallowed; session tracking never fails a request.
async fn authenticate(
    parts: &Parts,
    state: &impl HasAuthState,
    scope: KeyScope,
) -> Result<Claims, AuthError> {
    let cookie_name = match scope {
        KeyScope::User => ACCESS_COOKIE_NAME,
        KeyScope::Admin => ADMIN_ACCESS_COOKIE_NAME,
    };

    let token = cookie::token_from_request(&parts.headers, cookie_name)
        .ok_or(AuthError::TokenMissing)?;

    let claims = match state.jwt().verify(&token, TokenType::Access, scope) {
        Ok(claims) => claims,
        // A signature failure may be a genuine token from the other surface:
        // a cross-surface presentation is a role problem (403), not a forgery
        // (401)
        Err(JwtError::Invalid(e)) => {
            let other = match scope {
                KeyScope::User => KeyScope::Admin,
                KeyScope::Admin => KeyScope::User,
            };
            if state.jwt().verify(&token, TokenType::Access, other).is_ok() {
                return Err(AuthError::Forbidden);
            }
            return Err(JwtError::Invalid(e).into());
        }
        Err(e) => return Err(e.into()),
    };

    let account_id: i64 = claims.sub.parse().map_err(|_| AuthError::TokenInvalid)?;
    let account = state
        .db()
        .accounts()
        .get_by_id(account_id)
        .await?
        .ok_or(AuthError::TokenInvalid)?;

    let now = unix_now();
    if account.is_locked(now) {
        return Err(AuthError::SessionLocked);
    }

    let session_id = parts
        .headers
        .get(SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| claims.session_id.clone());
    if let Some(sid) = session_id
        && let Err(e) = state.db().sessions().touch(&sid, account.id, now).await
    {
        tracing::debug!(error = %e, session_id = %sid, "session touch failed");
    }

    Ok(claims)
}

/// Extractor requiring a valid user-scoped access token.
pub struct RequireUser(pub Claims);

impl<S> FromRequestParts<S> for RequireUser
where
    S: HasAuthState + Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let claims = authenticate(parts, state, KeyScope::User).await?;
        // Admin principals authenticate through the admin surface
        if claims.role == Role::Admin {
            return Err(AuthError::Forbidden);
        }
        Ok(RequireUser(claims))
    }
}

/// Extractor requiring a valid admin-scoped access token.
pub struct RequireAdmin(pub Claims);

impl<S> FromRequestParts<S> for RequireAdmin
where
    S: HasAuthState + Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let claims = authenticate(parts, state, KeyScope::Admin).await?;
        if claims.role != Role::Admin {
            return Err(AuthError::Forbidden);
        }
        Ok(RequireAdmin(claims))
    }
}

/// Extractor that authenticates when possible and never rejects.
pub struct MaybeUser(pub Option<Claims>);

impl<S> FromRequestParts<S> for MaybeUser
where
    S: HasAuthState + Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let claims = authenticate(parts, state, KeyScope::User)
            .await
            .ok()
            .filter(|c| c.role != Role::Admin);
        Ok(MaybeUser(claims))
    }
}
