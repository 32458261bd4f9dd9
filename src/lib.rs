pub mod api;
pub mod auth;
pub mod cli;
pub mod db;
pub mod jwt;
pub mod password;
pub mod rate_limit;

use api::create_api_router;
use auth::extractors::HasAuthState;
use axum::Router;
use db::Database;
use jwt::JwtConfig;
use rate_limit::IpRateLimiter;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Login attempts allowed per IP per minute.
pub const LOGIN_RATE_PER_MINUTE: u32 = 10;

/// Refresh attempts allowed per IP per minute.
pub const REFRESH_RATE_PER_MINUTE: u32 = 60;

pub struct ServerConfig {
    /// Database connection (cloneable, uses connection pool internally)
    pub db: Database,
    /// Secret signing user access, refresh and password-reset tokens
    pub user_secret: Vec<u8>,
    /// Secret signing admin tokens, rotated independently of the user secret
    pub admin_secret: Vec<u8>,
    /// JWT issuer claim
    pub issuer: String,
    /// JWT audience claim
    pub audience: String,
    /// Whether to set Secure flag on cookies (should be true in production with HTTPS)
    pub secure_cookies: bool,
}

/// Shared application state handed to every handler and extractor.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub jwt: JwtConfig,
    pub secure_cookies: bool,
    pub login_limiter: Arc<IpRateLimiter>,
    pub refresh_limiter: Arc<IpRateLimiter>,
}

impl HasAuthState for AppState {
    fn jwt(&self) -> &JwtConfig {
        &self.jwt
    }

    fn db(&self) -> &Database {
        &self.db
    }
}

/// Create the application router with the given configuration.
pub fn create_app(config: &ServerConfig) -> Router {
    let jwt = JwtConfig::new(
        &config.user_secret,
        &config.admin_secret,
        &config.issuer,
        &config.audience,
    );

    let state = AppState {
        db: config.db.clone(),
        jwt,
        secure_cookies: config.secure_cookies,
        login_limiter: Arc::new(IpRateLimiter::new(LOGIN_RATE_PER_MINUTE)),
        refresh_limiter: Arc::new(IpRateLimiter::new(REFRESH_RATE_PER_MINUTE)),
    };

    create_api_router(&state).with_state(state)
}

/// Run the server on the given listener. This function blocks until the server exits.
pub async fn run_server(config: ServerConfig, listener: TcpListener) -> Result<(), std::io::Error> {
    let app = create_app(&config);
    axum::serve(listener, app).await
}

/// Start the server on the given port in a background task. Use port 0 to let
/// the OS choose a random port. Returns the actual address the server is
/// listening on.
pub async fn start_server(
    config: ServerConfig,
    port: u16,
) -> Result<(tokio::task::JoinHandle<()>, SocketAddr), std::io::Error> {
    let addr = format!("127.0.0.1:{}", port);
    let listener = TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        run_server(config, listener).await.ok();
    });

    Ok((handle, local_addr))
}
