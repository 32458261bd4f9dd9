//! The authentication flows: registration, login, refresh rotation, logout,
//! and the password-reset sequence.
//!
//! Handlers stay thin; everything with a decision in it lives here so the
//! flows can be exercised directly against an in-memory database.

use super::errors::AuthError;
use crate::db::{unix_now, Account, Database, Role};
use crate::jwt::{IssuedToken, JwtConfig, KeyScope, TokenIdentity, TokenPair, TokenType,
    PASSWORD_RESET_DURATION_SECS};
use crate::password;

/// Minimum accepted password length.
pub const MIN_PASSWORD_LEN: usize = 8;

/// Request metadata recorded against tokens and sessions.
#[derive(Debug, Clone, Default)]
pub struct ClientMeta {
    pub user_agent: Option<String>,
    pub ip: Option<String>,
}

/// A successful login or refresh: the account, the fresh token pair, and the
/// session id both tokens carry.
pub struct AuthSuccess {
    pub account: Account,
    pub pair: TokenPair,
    pub session_id: String,
}

/// What a logout attempt managed to clean up. Logout never fails.
#[derive(Debug, Default)]
pub struct LogoutSummary {
    pub token_revoked: bool,
    pub session_removed: bool,
}

fn identity(account: &Account) -> TokenIdentity<'_> {
    TokenIdentity {
        account_id: account.id,
        uid: &account.uid,
        email: &account.email,
        role: account.role,
        first_name: &account.first_name,
        last_name: &account.last_name,
    }
}

fn validate_password(password: &str) -> Result<(), AuthError> {
    if password.len() < MIN_PASSWORD_LEN {
        return Err(AuthError::Validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

/// Register a new account. Duplicate email or uid maps to a conflict.
pub async fn register(
    db: &Database,
    email: &str,
    password: &str,
    first_name: &str,
    last_name: &str,
    role: Role,
) -> Result<Account, AuthError> {
    let email = email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(AuthError::Validation("A valid email is required".to_string()));
    }
    validate_password(password)?;

    let hash = password::hash_password_blocking(password.to_string()).await?;
    let uid = uuid::Uuid::new_v4().to_string();

    let id = db
        .accounts()
        .create(&uid, email, &hash, role, first_name, last_name)
        .await
        .map_err(|e| {
            if e.as_database_error().is_some_and(|d| d.is_unique_violation()) {
                AuthError::Conflict("An account with this email already exists".to_string())
            } else {
                AuthError::Storage(e)
            }
        })?;

    tracing::info!(account_id = id, "account registered");

    db.accounts()
        .get_by_id(id)
        .await?
        .ok_or_else(|| AuthError::Internal("account vanished after insert".to_string()))
}

/// Authenticate by email and password, issuing a fresh token pair and a new
/// session. The lock gate runs before the password comparison so a locked
/// account reveals nothing about the candidate password.
pub async fn login(
    db: &Database,
    jwt: &JwtConfig,
    email: &str,
    candidate: &str,
    remember_me: bool,
    meta: &ClientMeta,
) -> Result<AuthSuccess, AuthError> {
    let account = db
        .accounts()
        .get_by_email(email)
        .await?
        .ok_or(AuthError::UnknownIdentity)?;

    let now = unix_now();
    if account.is_locked(now) {
        tracing::warn!(account_id = account.id, "login rejected: account locked");
        return Err(AuthError::AccountLocked);
    }

    let ok =
        password::verify_password_blocking(candidate.to_string(), account.password_hash.clone())
            .await?;
    if !ok {
        db.accounts().record_failed_attempt(account.id, now).await?;
        tracing::info!(account_id = account.id, "login failed: wrong password");
        return Err(AuthError::InvalidCredentials);
    }

    db.accounts().record_successful_attempt(account.id).await?;

    let session_id = uuid::Uuid::new_v4().to_string();
    let pair = jwt.issue_pair(&identity(&account), remember_me, &session_id)?;

    db.refresh_tokens()
        .create(
            &pair.refresh.jti,
            account.id,
            Some(&session_id),
            meta.user_agent.as_deref(),
            meta.ip.as_deref(),
            remember_me,
            pair.refresh.issued_at as i64,
            pair.refresh.expires_at as i64,
        )
        .await?;
    db.sessions()
        .create(
            &session_id,
            account.id,
            meta.user_agent.as_deref(),
            meta.ip.as_deref(),
            Some(&pair.refresh.jti),
            now,
        )
        .await?;

    tracing::info!(account_id = account.id, %session_id, "login succeeded");

    Ok(AuthSuccess {
        account,
        pair,
        session_id,
    })
}

/// Rotate a refresh token: the presented token is consumed and a fresh pair
/// is issued for the same session. A replay of an already-consumed token is
/// reported as revoked, distinctly from a token that never existed.
pub async fn refresh(
    db: &Database,
    jwt: &JwtConfig,
    token: Option<&str>,
    scope: KeyScope,
    meta: &ClientMeta,
) -> Result<AuthSuccess, AuthError> {
    let token = token.ok_or(AuthError::TokenMissing)?;
    let claims = jwt.verify(token, TokenType::Refresh, scope)?;

    let account_id: i64 = claims.sub.parse().map_err(|_| AuthError::TokenInvalid)?;
    let account = db
        .accounts()
        .get_by_id(account_id)
        .await?
        .ok_or(AuthError::TokenInvalid)?;

    let now = unix_now();
    if account.is_locked(now) {
        return Err(AuthError::SessionLocked);
    }

    // The rotation gate: of N concurrent presentations of the same token,
    // exactly one consumes it here.
    if !db.refresh_tokens().consume_for_rotation(&claims.jti, now).await? {
        let known = db.refresh_tokens().get_by_jti(&claims.jti).await?;
        return Err(match known {
            Some(_) => {
                tracing::warn!(account_id, jti = %claims.jti, "refresh token replayed");
                AuthError::TokenRevoked
            }
            None => AuthError::TokenInvalid,
        });
    }

    // Expired rows can go now; the record consumed above stays until its
    // expiry so a replay of it still reads as revoked
    db.refresh_tokens().prune_expired(account_id, now).await?;

    let remember_me = claims.remember_me.unwrap_or(false);
    let session_id = claims
        .session_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let pair = jwt.issue_pair(&identity(&account), remember_me, &session_id)?;

    db.refresh_tokens()
        .create(
            &pair.refresh.jti,
            account.id,
            Some(&session_id),
            meta.user_agent.as_deref(),
            meta.ip.as_deref(),
            remember_me,
            pair.refresh.issued_at as i64,
            pair.refresh.expires_at as i64,
        )
        .await?;

    // Keep the session pointing at its current refresh token; recreate the
    // record if it was trimmed away
    db.sessions().link_refresh(&session_id, &pair.refresh.jti).await?;
    if !db.sessions().touch(&session_id, account.id, now).await? {
        db.sessions()
            .create(
                &session_id,
                account.id,
                meta.user_agent.as_deref(),
                meta.ip.as_deref(),
                Some(&pair.refresh.jti),
                now,
            )
            .await?;
    }

    tracing::debug!(account_id, %session_id, "refresh token rotated");

    Ok(AuthSuccess {
        account,
        pair,
        session_id,
    })
}

/// Best-effort logout: revoke the presented refresh token and drop its
/// session. Missing, expired or garbage tokens are fine; the client is
/// logging out either way, so nothing here produces an error. The session to
/// remove comes from the token's claims, with a caller-supplied id as
/// fallback for older tokens that carry none.
pub async fn logout(
    db: &Database,
    jwt: &JwtConfig,
    token: Option<&str>,
    fallback_session_id: Option<&str>,
    scope: KeyScope,
) -> LogoutSummary {
    let mut summary = LogoutSummary::default();

    let Some(token) = token else {
        return summary;
    };
    let Ok(claims) = jwt.verify(token, TokenType::Refresh, scope) else {
        return summary;
    };

    match db.refresh_tokens().revoke(&claims.jti).await {
        Ok(revoked) => summary.token_revoked = revoked,
        Err(e) => tracing::debug!(error = %e, "logout: token revocation failed"),
    }

    if let Some(session_id) = claims.session_id.as_deref().or(fallback_session_id) {
        match db.sessions().remove(session_id).await {
            Ok(removed) => summary.session_removed = removed,
            Err(e) => tracing::debug!(error = %e, "logout: session removal failed"),
        }
    }

    summary
}

/// Start a password reset: store a fresh six-digit OTP against the account,
/// overwriting any earlier one. Returns the OTP for delivery.
pub async fn request_password_reset(db: &Database, email: &str) -> Result<String, AuthError> {
    let account = db
        .accounts()
        .get_by_email(email)
        .await?
        .ok_or(AuthError::UnknownIdentity)?;

    let otp = generate_otp();
    db.accounts().set_reset_otp(account.id, &otp).await?;

    tracing::info!(account_id = account.id, "password reset requested");
    Ok(otp)
}

/// Verify a reset OTP. A correct OTP is consumed atomically (single-use) and
/// exchanged for a short-lived password-reset token.
pub async fn verify_reset_otp(
    db: &Database,
    jwt: &JwtConfig,
    email: &str,
    otp: &str,
) -> Result<IssuedToken, AuthError> {
    let account = db
        .accounts()
        .get_by_email(email)
        .await?
        .ok_or(AuthError::UnknownIdentity)?;

    if !db.accounts().consume_reset_otp(account.id, otp).await? {
        return Err(AuthError::Validation("Invalid OTP".to_string()));
    }

    let issued = jwt.issue(
        &identity(&account),
        TokenType::PasswordReset,
        PASSWORD_RESET_DURATION_SECS,
        None,
        false,
    )?;

    tracing::info!(account_id = account.id, "reset OTP verified");
    Ok(issued)
}

/// Complete a password reset with a valid reset token. Every refresh token is
/// revoked and every session cleared, so all devices must sign in again.
pub async fn change_password(
    db: &Database,
    jwt: &JwtConfig,
    reset_token: &str,
    new_password: &str,
) -> Result<(), AuthError> {
    let claims = jwt.verify(reset_token, TokenType::PasswordReset, KeyScope::User)?;
    validate_password(new_password)?;

    let account_id: i64 = claims.sub.parse().map_err(|_| AuthError::TokenInvalid)?;
    let account = db
        .accounts()
        .get_by_id(account_id)
        .await?
        .ok_or(AuthError::TokenInvalid)?;

    let hash = password::hash_password_blocking(new_password.to_string()).await?;
    db.accounts().set_password_hash(account.id, &hash).await?;

    let revoked = db.refresh_tokens().revoke_all(account.id).await?;
    let cleared = db.sessions().clear_all(account.id).await?;
    db.accounts().record_successful_attempt(account.id).await?;

    tracing::info!(
        account_id = account.id,
        revoked_tokens = revoked,
        cleared_sessions = cleared,
        "password changed"
    );
    Ok(())
}

fn generate_otp() -> String {
    use rand::Rng;
    format!("{:06}", rand::rng().random_range(0..1_000_000u32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MAX_FAILED_ATTEMPTS;

    fn test_jwt() -> JwtConfig {
        JwtConfig::new(
            b"user-secret-key-for-testing-only",
            b"admin-secret-key-for-testing-only",
            "campusgate",
            "campusgate-api",
        )
    }

    async fn registered(db: &Database) -> Account {
        register(db, "alice@example.com", "Secret123!", "Alice", "Nguyen", Role::Student)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_register_rejects_duplicates_and_bad_input() {
        let db = Database::open(":memory:").await.unwrap();
        registered(&db).await;

        let dup = register(&db, "alice@example.com", "Other123!", "A", "N", Role::Student).await;
        assert!(matches!(dup, Err(AuthError::Conflict(_))));

        let bad_email = register(&db, "not-an-email", "Secret123!", "A", "N", Role::Student).await;
        assert!(matches!(bad_email, Err(AuthError::Validation(_))));

        let short = register(&db, "bob@example.com", "short", "B", "N", Role::Student).await;
        assert!(matches!(short, Err(AuthError::Validation(_))));
    }

    #[tokio::test]
    async fn test_login_distinguishes_unknown_from_wrong_password() {
        let db = Database::open(":memory:").await.unwrap();
        let jwt = test_jwt();
        registered(&db).await;
        let meta = ClientMeta::default();

        let unknown = login(&db, &jwt, "ghost@example.com", "whatever1", false, &meta).await;
        assert!(matches!(unknown, Err(AuthError::UnknownIdentity)));

        let wrong = login(&db, &jwt, "alice@example.com", "wrong-pass", false, &meta).await;
        assert!(matches!(wrong, Err(AuthError::InvalidCredentials)));

        let ok = login(&db, &jwt, "alice@example.com", "Secret123!", false, &meta)
            .await
            .unwrap();
        assert!(!ok.session_id.is_empty());
        assert!(
            db.refresh_tokens()
                .is_valid(&ok.pair.refresh.jti, unix_now())
                .await
                .unwrap()
        );
        assert!(db.sessions().get(&ok.session_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_repeated_failures_lock_the_account() {
        let db = Database::open(":memory:").await.unwrap();
        let jwt = test_jwt();
        registered(&db).await;
        let meta = ClientMeta::default();

        for _ in 0..MAX_FAILED_ATTEMPTS {
            let result = login(&db, &jwt, "alice@example.com", "wrong-pass", false, &meta).await;
            assert!(matches!(result, Err(AuthError::InvalidCredentials)));
        }

        // Locked now: even the correct password is turned away at the door
        let result = login(&db, &jwt, "alice@example.com", "Secret123!", false, &meta).await;
        assert!(matches!(result, Err(AuthError::AccountLocked)));
    }

    #[tokio::test]
    async fn test_refresh_rotation_and_replay() {
        let db = Database::open(":memory:").await.unwrap();
        let jwt = test_jwt();
        registered(&db).await;
        let meta = ClientMeta::default();

        let first = login(&db, &jwt, "alice@example.com", "Secret123!", false, &meta)
            .await
            .unwrap();

        let rotated = refresh(
            &db,
            &jwt,
            Some(&first.pair.refresh.token),
            KeyScope::User,
            &meta,
        )
        .await
        .unwrap();
        assert_eq!(rotated.session_id, first.session_id);
        assert_ne!(rotated.pair.refresh.jti, first.pair.refresh.jti);

        // The consumed record survives the rotation's housekeeping, so a
        // replay is detected as a revoked token, not an unknown one
        let consumed = db
            .refresh_tokens()
            .get_by_jti(&first.pair.refresh.jti)
            .await
            .unwrap()
            .unwrap();
        assert!(consumed.revoked);

        let replay = refresh(
            &db,
            &jwt,
            Some(&first.pair.refresh.token),
            KeyScope::User,
            &meta,
        )
        .await;
        assert!(matches!(replay, Err(AuthError::TokenRevoked)));

        // The session still points at the live refresh token
        let session = db.sessions().get(&first.session_id).await.unwrap().unwrap();
        assert_eq!(session.refresh_jti.as_deref(), Some(rotated.pair.refresh.jti.as_str()));
    }

    #[tokio::test]
    async fn test_refresh_rejects_access_token() {
        let db = Database::open(":memory:").await.unwrap();
        let jwt = test_jwt();
        registered(&db).await;
        let meta = ClientMeta::default();

        let success = login(&db, &jwt, "alice@example.com", "Secret123!", false, &meta)
            .await
            .unwrap();

        let result = refresh(
            &db,
            &jwt,
            Some(&success.pair.access.token),
            KeyScope::User,
            &meta,
        )
        .await;
        assert!(matches!(result, Err(AuthError::TokenTypeMismatch)));

        let missing = refresh(&db, &jwt, None, KeyScope::User, &meta).await;
        assert!(matches!(missing, Err(AuthError::TokenMissing)));
    }

    #[tokio::test]
    async fn test_logout_is_best_effort_and_idempotent() {
        let db = Database::open(":memory:").await.unwrap();
        let jwt = test_jwt();
        registered(&db).await;
        let meta = ClientMeta::default();

        let success = login(&db, &jwt, "alice@example.com", "Secret123!", false, &meta)
            .await
            .unwrap();

        let first = logout(
            &db,
            &jwt,
            Some(&success.pair.refresh.token),
            None,
            KeyScope::User,
        )
        .await;
        assert!(first.token_revoked);
        assert!(first.session_removed);

        // Second logout with the same token: nothing left to do, still fine
        let second = logout(
            &db,
            &jwt,
            Some(&success.pair.refresh.token),
            None,
            KeyScope::User,
        )
        .await;
        assert!(!second.token_revoked);
        assert!(!second.session_removed);

        // Garbage and absent tokens are equally fine
        let garbage = logout(&db, &jwt, Some("not-a-token"), None, KeyScope::User).await;
        assert!(!garbage.token_revoked);
        let absent = logout(&db, &jwt, None, None, KeyScope::User).await;
        assert!(!absent.token_revoked);
    }

    #[tokio::test]
    async fn test_password_reset_full_cycle() {
        let db = Database::open(":memory:").await.unwrap();
        let jwt = test_jwt();
        registered(&db).await;
        let meta = ClientMeta::default();

        // Two live sessions before the reset
        login(&db, &jwt, "alice@example.com", "Secret123!", false, &meta)
            .await
            .unwrap();
        let second = login(&db, &jwt, "alice@example.com", "Secret123!", false, &meta)
            .await
            .unwrap();

        let otp = request_password_reset(&db, "alice@example.com").await.unwrap();
        assert_eq!(otp.len(), 6);

        let wrong = verify_reset_otp(&db, &jwt, "alice@example.com", "000000").await;
        if otp != "000000" {
            assert!(matches!(wrong, Err(AuthError::Validation(_))));
        }

        let reset = verify_reset_otp(&db, &jwt, "alice@example.com", &otp).await.unwrap();
        change_password(&db, &jwt, &reset.token, "NewSecret456!").await.unwrap();

        // Old credentials dead, every token revoked, every session cleared
        let old = login(&db, &jwt, "alice@example.com", "Secret123!", false, &meta).await;
        assert!(matches!(old, Err(AuthError::InvalidCredentials)));

        let replay = refresh(
            &db,
            &jwt,
            Some(&second.pair.refresh.token),
            KeyScope::User,
            &meta,
        )
        .await;
        assert!(matches!(replay, Err(AuthError::TokenRevoked)));

        let account = db.accounts().get_by_email("alice@example.com").await.unwrap().unwrap();
        assert!(db.sessions().list_by_account(account.id).await.unwrap().is_empty());

        login(&db, &jwt, "alice@example.com", "NewSecret456!", false, &meta)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_reset_token_is_not_usable_twice_after_otp_consumed() {
        let db = Database::open(":memory:").await.unwrap();
        let jwt = test_jwt();
        registered(&db).await;

        let otp = request_password_reset(&db, "alice@example.com").await.unwrap();
        verify_reset_otp(&db, &jwt, "alice@example.com", &otp).await.unwrap();

        // The OTP was consumed on first verification
        let again = verify_reset_otp(&db, &jwt, "alice@example.com", &otp).await;
        assert!(matches!(again, Err(AuthError::Validation(_))));
    }

    #[tokio::test]
    async fn test_remember_me_is_carried_through_rotation() {
        let db = Database::open(":memory:").await.unwrap();
        let jwt = test_jwt();
        registered(&db).await;
        let meta = ClientMeta::default();

        let success = login(&db, &jwt, "alice@example.com", "Secret123!", true, &meta)
            .await
            .unwrap();
        assert_eq!(
            success.pair.refresh.duration,
            crate::jwt::REMEMBER_ME_REFRESH_DURATION_SECS
        );

        let rotated = refresh(
            &db,
            &jwt,
            Some(&success.pair.refresh.token),
            KeyScope::User,
            &meta,
        )
        .await
        .unwrap();
        assert_eq!(
            rotated.pair.refresh.duration,
            crate::jwt::REMEMBER_ME_REFRESH_DURATION_SECS
        );
    }
}
