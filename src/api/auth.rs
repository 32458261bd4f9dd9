//! Authentication endpoints.
//!
//! Tokens are delivered both as HttpOnly cookies (for browsers) and in the
//! response body (for API clients using the Bearer fallback). Admin
//! principals have a parallel surface with their own cookie names and
//! signing key.

use axum::extract::State;
use axum::http::header::SET_COOKIE;
use axum::http::{HeaderMap, HeaderName, StatusCode};
use axum::middleware;
use axum::response::{AppendHeaders, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::auth::cookie::{
    build_cookie, clear_cookie, token_from_request, ACCESS_COOKIE_NAME, ADMIN_ACCESS_COOKIE_NAME,
    ADMIN_REFRESH_COOKIE_NAME, REFRESH_COOKIE_NAME,
};
use crate::auth::errors::AuthError;
use crate::auth::extractors::{MaybeUser, RequireAdmin, RequireUser};
use crate::auth::flows::{self, AuthSuccess, ClientMeta};
use crate::db::{Account, Role};
use crate::jwt::{Claims, KeyScope, TokenPair, PASSWORD_RESET_DURATION_SECS};
use crate::rate_limit::{client_ip, limit_by_ip};
use crate::AppState;

pub fn create_auth_router(state: &AppState) -> Router<AppState> {
    let login_routes = Router::new()
        .route("/login", post(login))
        .route("/admin/login", post(admin_login))
        .layer(middleware::from_fn_with_state(
            state.login_limiter.clone(),
            limit_by_ip,
        ));

    let refresh_routes = Router::new()
        .route("/refresh", post(refresh))
        .route("/admin/refresh", post(admin_refresh))
        .layer(middleware::from_fn_with_state(
            state.refresh_limiter.clone(),
            limit_by_ip,
        ));

    Router::new()
        .route("/register", post(register))
        .route("/logout", post(logout))
        .route("/admin/logout", post(admin_logout))
        .route("/password/forgot", post(forgot_password))
        .route("/password/verify-otp", post(verify_otp))
        .route("/password/change", post(change_password))
        .route("/status", get(status))
        .route("/me", get(me))
        .route("/admin/me", get(admin_me))
        .route("/sessions", get(list_sessions))
        .merge(login_routes)
        .merge(refresh_routes)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    /// "student" (default) or "alumni"; admin accounts are provisioned
    /// out of band
    pub role: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub remember_me: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyOtpRequest {
    pub email: String,
    pub otp: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct LogoutRequest {
    pub session_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub reset_token: String,
    pub new_password: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub uid: String,
    pub email: String,
    pub role: Role,
    pub first_name: String,
    pub last_name: String,
    pub verified: bool,
    pub profile_complete: bool,
}

impl From<&Account> for UserResponse {
    fn from(account: &Account) -> Self {
        Self {
            uid: account.uid.clone(),
            email: account.email.clone(),
            role: account.role,
            first_name: account.first_name.clone(),
            last_name: account.last_name.clone(),
            verified: account.verified,
            profile_complete: account.profile_complete,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub user: UserResponse,
    pub access_token: String,
    pub refresh_token: String,
    pub session_id: String,
    /// Access token lifetime in seconds
    pub expires_in: u64,
}

fn meta_from_headers(headers: &HeaderMap) -> ClientMeta {
    ClientMeta {
        user_agent: headers
            .get("user-agent")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        ip: client_ip(headers).map(|ip| ip.to_string()),
    }
}

/// Set-Cookie pair for an issued access/refresh pair.
fn auth_cookies(
    pair: &TokenPair,
    scope: KeyScope,
    secure: bool,
) -> AppendHeaders<[(HeaderName, String); 2]> {
    let (access_name, refresh_name) = cookie_names(scope);
    AppendHeaders([
        (
            SET_COOKIE,
            build_cookie(access_name, &pair.access.token, pair.access.duration, secure),
        ),
        (
            SET_COOKIE,
            build_cookie(refresh_name, &pair.refresh.token, pair.refresh.duration, secure),
        ),
    ])
}

fn cleared_cookies(scope: KeyScope, secure: bool) -> AppendHeaders<[(HeaderName, String); 2]> {
    let (access_name, refresh_name) = cookie_names(scope);
    AppendHeaders([
        (SET_COOKIE, clear_cookie(access_name, secure)),
        (SET_COOKIE, clear_cookie(refresh_name, secure)),
    ])
}

fn cookie_names(scope: KeyScope) -> (&'static str, &'static str) {
    match scope {
        KeyScope::User => (ACCESS_COOKIE_NAME, REFRESH_COOKIE_NAME),
        KeyScope::Admin => (ADMIN_ACCESS_COOKIE_NAME, ADMIN_REFRESH_COOKIE_NAME),
    }
}

fn auth_response(success: &AuthSuccess) -> AuthResponse {
    AuthResponse {
        user: UserResponse::from(&success.account),
        access_token: success.pair.access.token.clone(),
        refresh_token: success.pair.refresh.token.clone(),
        session_id: success.session_id.clone(),
        expires_in: success.pair.expires_in,
    }
}

pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AuthError> {
    let role = match body.role.as_deref() {
        None | Some("student") => Role::Student,
        Some("alumni") => Role::Alumni,
        Some(other) => {
            return Err(AuthError::Validation(format!("Unknown role: {}", other)));
        }
    };

    let account = flows::register(
        &state.db,
        &body.email,
        &body.password,
        &body.first_name,
        &body.last_name,
        role,
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "user": UserResponse::from(&account) })),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<LoginRequest>,
) -> Result<impl IntoResponse, AuthError> {
    let meta = meta_from_headers(&headers);
    let success = flows::login(
        &state.db,
        &state.jwt,
        &body.email,
        &body.password,
        body.remember_me,
        &meta,
    )
    .await?;

    Ok((
        auth_cookies(&success.pair, KeyScope::User, state.secure_cookies),
        Json(auth_response(&success)),
    ))
}

pub async fn admin_login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<LoginRequest>,
) -> Result<impl IntoResponse, AuthError> {
    let meta = meta_from_headers(&headers);
    let success = flows::login(
        &state.db,
        &state.jwt,
        &body.email,
        &body.password,
        body.remember_me,
        &meta,
    )
    .await?;

    if success.account.role != Role::Admin {
        return Err(AuthError::Forbidden);
    }

    Ok((
        auth_cookies(&success.pair, KeyScope::Admin, state.secure_cookies),
        Json(auth_response(&success)),
    ))
}

pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AuthError> {
    refresh_for_scope(&state, &headers, KeyScope::User).await
}

pub async fn admin_refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AuthError> {
    refresh_for_scope(&state, &headers, KeyScope::Admin).await
}

async fn refresh_for_scope(
    state: &AppState,
    headers: &HeaderMap,
    scope: KeyScope,
) -> Result<Response, AuthError> {
    let (_, refresh_name) = cookie_names(scope);
    let token = token_from_request(headers, refresh_name);
    let meta = meta_from_headers(headers);

    let success = flows::refresh(&state.db, &state.jwt, token.as_deref(), scope, &meta).await?;

    Ok((
        auth_cookies(&success.pair, scope, state.secure_cookies),
        Json(auth_response(&success)),
    )
        .into_response())
}

pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<LogoutRequest>>,
) -> impl IntoResponse {
    logout_for_scope(&state, &headers, body, KeyScope::User).await
}

pub async fn admin_logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<LogoutRequest>>,
) -> impl IntoResponse {
    logout_for_scope(&state, &headers, body, KeyScope::Admin).await
}

async fn logout_for_scope(
    state: &AppState,
    headers: &HeaderMap,
    body: Option<Json<LogoutRequest>>,
    scope: KeyScope,
) -> Response {
    let (_, refresh_name) = cookie_names(scope);
    let token = token_from_request(headers, refresh_name);
    let fallback_session = body.and_then(|Json(b)| b.session_id);

    let summary = flows::logout(
        &state.db,
        &state.jwt,
        token.as_deref(),
        fallback_session.as_deref(),
        scope,
    )
    .await;
    tracing::debug!(
        token_revoked = summary.token_revoked,
        session_removed = summary.session_removed,
        "logout"
    );

    // Cookies are cleared no matter what the token looked like
    (
        cleared_cookies(scope, state.secure_cookies),
        Json(json!({ "message": "Logged out" })),
    )
        .into_response()
}

pub async fn forgot_password(
    State(state): State<AppState>,
    Json(body): Json<ForgotPasswordRequest>,
) -> Result<impl IntoResponse, AuthError> {
    let otp = flows::request_password_reset(&state.db, &body.email).await?;

    // Stand-in for the mail delivery hook
    tracing::info!(email = %body.email, %otp, "reset OTP ready for delivery");

    Ok(Json(json!({ "message": "A reset code has been sent" })))
}

pub async fn verify_otp(
    State(state): State<AppState>,
    Json(body): Json<VerifyOtpRequest>,
) -> Result<impl IntoResponse, AuthError> {
    let issued = flows::verify_reset_otp(&state.db, &state.jwt, &body.email, &body.otp).await?;

    Ok(Json(json!({
        "resetToken": issued.token,
        "expiresIn": PASSWORD_RESET_DURATION_SECS,
    })))
}

pub async fn change_password(
    State(state): State<AppState>,
    Json(body): Json<ChangePasswordRequest>,
) -> Result<impl IntoResponse, AuthError> {
    flows::change_password(&state.db, &state.jwt, &body.reset_token, &body.new_password).await?;
    Ok(Json(json!({ "message": "Password updated" })))
}

fn claims_user(claims: &Claims) -> serde_json::Value {
    json!({
        "uid": claims.uid,
        "email": claims.email,
        "role": claims.role,
        "firstName": claims.first_name,
        "lastName": claims.last_name,
        "sessionId": claims.session_id,
    })
}

/// Who, if anyone, is making this request. Never fails.
pub async fn status(MaybeUser(claims): MaybeUser) -> impl IntoResponse {
    match claims {
        Some(claims) => Json(json!({ "authenticated": true, "user": claims_user(&claims) })),
        None => Json(json!({ "authenticated": false, "user": null })),
    }
}

pub async fn me(RequireUser(claims): RequireUser) -> impl IntoResponse {
    Json(json!({ "user": claims_user(&claims) }))
}

pub async fn admin_me(RequireAdmin(claims): RequireAdmin) -> impl IntoResponse {
    Json(json!({ "user": claims_user(&claims) }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub session_id: String,
    pub device: Option<String>,
    pub ip: Option<String>,
    pub last_seen: i64,
    pub current: bool,
}

pub async fn list_sessions(
    State(state): State<AppState>,
    RequireUser(claims): RequireUser,
) -> Result<impl IntoResponse, AuthError> {
    let account_id: i64 = claims.sub.parse().map_err(|_| AuthError::TokenInvalid)?;
    let sessions = state.db.sessions().list_by_account(account_id).await?;

    let sessions: Vec<SessionResponse> = sessions
        .into_iter()
        .map(|s| SessionResponse {
            current: claims.session_id.as_deref() == Some(s.session_id.as_str()),
            session_id: s.session_id,
            device: s.device,
            ip: s.ip,
            last_seen: s.last_seen,
        })
        .collect();

    Ok(Json(json!({ "sessions": sessions })))
}
