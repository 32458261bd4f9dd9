//! HTTP surface.

pub mod auth;

use axum::Router;

use crate::AppState;

/// Build the API router. Everything lives under /api.
pub fn create_api_router(state: &AppState) -> Router<AppState> {
    Router::new().nest("/api/auth", auth::create_auth_router(state))
}
