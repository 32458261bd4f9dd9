//! Cookie and header plumbing for token transport.
//!
//! Tokens travel as HttpOnly cookies; a Bearer header is accepted as a
//! fallback for non-browser clients, with the cookie taking precedence when
//! both are present.

use axum::http::HeaderMap;

/// Access token cookie for user-scoped principals.
pub const ACCESS_COOKIE_NAME: &str = "accessToken";

/// Refresh token cookie for user-scoped principals.
pub const REFRESH_COOKIE_NAME: &str = "refreshToken";

/// Access token cookie for admin principals.
pub const ADMIN_ACCESS_COOKIE_NAME: &str = "adminAccessToken";

/// Refresh token cookie for admin principals.
pub const ADMIN_REFRESH_COOKIE_NAME: &str = "adminRefreshToken";

/// Optional header carrying the client's session id for activity tracking.
pub const SESSION_ID_HEADER: &str = "x-session-id";

/// Extract a cookie value from request headers.
pub fn get_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let cookie_header = headers.get("cookie")?.to_str().ok()?;

    for cookie in cookie_header.split(';') {
        let cookie = cookie.trim();
        if let Some((cookie_name, value)) = cookie.split_once('=')
            && cookie_name == name
        {
            return Some(value.to_string());
        }
    }

    None
}

/// Extract a token from the Authorization header (Bearer scheme).
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get("authorization")?.to_str().ok()?;
    value
        .strip_prefix("Bearer ")
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

/// Find a token for the given cookie name, preferring the cookie over a
/// Bearer header when both are present.
pub fn token_from_request(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    get_cookie(headers, cookie_name).or_else(|| bearer_token(headers))
}

/// Build a Set-Cookie value carrying a token.
pub fn build_cookie(name: &str, value: &str, max_age_secs: u64, secure: bool) -> String {
    format!(
        "{}={}; HttpOnly; SameSite=Strict; Path=/; Max-Age={}{}",
        name,
        value,
        max_age_secs,
        if secure { "; Secure" } else { "" }
    )
}

/// Build a Set-Cookie value that clears a cookie.
pub fn clear_cookie(name: &str, secure: bool) -> String {
    format!(
        "{}=; HttpOnly; SameSite=Strict; Path=/; Max-Age=0{}",
        name,
        if secure { "; Secure" } else { "" }
    )
}
