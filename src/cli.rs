//! CLI argument parsing, validation, and startup helpers.

use crate::db::Database;
use crate::ServerConfig;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const MIN_SECRET_LENGTH: usize = 32;

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "campusgate",
    about = "Dual-token authentication and session management service"
)]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "7420")]
    pub port: u16,

    /// Path to SQLite database file
    #[arg(short, long, default_value = "campusgate.db")]
    pub database: String,

    /// Issuer claim stamped into every token
    #[arg(long, default_value = "campusgate")]
    pub issuer: String,

    /// Audience claim stamped into every token
    #[arg(long, default_value = "campusgate-api")]
    pub audience: String,

    /// Path to file containing the user JWT secret. Prefer JWT_SECRET env var
    #[arg(long)]
    pub jwt_secret_file: Option<String>,

    /// Path to file containing the admin JWT secret. Prefer ADMIN_JWT_SECRET env var
    #[arg(long)]
    pub admin_jwt_secret_file: Option<String>,

    /// Set the Secure flag on auth cookies (required behind HTTPS)
    #[arg(long)]
    pub secure_cookies: bool,

    /// Log output format
    #[arg(short, long, default_value = "pretty")]
    pub log_format: LogFormat,
}

/// Initialize logging based on the specified format. The level is taken from
/// RUST_LOG when set, defaulting to info.
pub fn init_logging(format: &LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        LogFormat::Compact => tracing_subscriber::fmt().compact().with_env_filter(filter).init(),
    }
}

/// Load a signing secret from an environment variable or a file.
/// Returns None and logs an error if the secret cannot be loaded.
pub fn load_secret(env_name: &str, secret_file: Option<&str>) -> Option<Vec<u8>> {
    let secret = if let Ok(secret) = std::env::var(env_name) {
        // Clear the environment variable to prevent leaking
        // SAFETY: We're single-threaded at this point during startup,
        // and no other code is reading this environment variable.
        unsafe { std::env::remove_var(env_name) };
        secret
    } else if let Some(path) = secret_file {
        match std::fs::read_to_string(path) {
            Ok(content) => content.trim().to_string(),
            Err(e) => {
                error!(path = %path, error = %e, "Failed to read secret file");
                return None;
            }
        }
    } else {
        error!(
            "A signing secret is required. Set the {} environment variable (recommended) or pass a secret file",
            env_name
        );
        return None;
    };

    if secret.len() < MIN_SECRET_LENGTH {
        error!(
            "{} is shorter than {} characters. Use a longer secret",
            env_name, MIN_SECRET_LENGTH
        );
        return None;
    }

    Some(secret.into_bytes())
}

/// Open the database, logging errors if it fails.
pub async fn open_database(path: &str) -> Option<Database> {
    match Database::open(path).await {
        Ok(db) => {
            info!(path = %path, "Database opened");
            Some(db)
        }
        Err(e) => {
            error!(path = %path, error = %e, "Failed to open database");
            None
        }
    }
}

/// Build ServerConfig from validated arguments.
pub fn build_config(
    args: &Args,
    db: Database,
    user_secret: Vec<u8>,
    admin_secret: Vec<u8>,
) -> ServerConfig {
    ServerConfig {
        db,
        user_secret,
        admin_secret,
        issuer: args.issuer.clone(),
        audience: args.audience.clone(),
        secure_cookies: args.secure_cookies,
    }
}
