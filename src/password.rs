//! Password hashing via bcrypt.
//!
//! Hashing and verification are CPU-bound, so the async variants run on the
//! blocking pool to keep request tasks responsive.

/// bcrypt cost factor.
const BCRYPT_COST: u32 = 10;

/// Errors from the hashing layer.
#[derive(Debug)]
pub enum PasswordError {
    Hash(bcrypt::BcryptError),
    /// The blocking task was cancelled or panicked
    TaskFailed,
}

impl std::fmt::Display for PasswordError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PasswordError::Hash(e) => write!(f, "bcrypt error: {}", e),
            PasswordError::TaskFailed => write!(f, "password hashing task failed"),
        }
    }
}

impl std::error::Error for PasswordError {}

/// Hash a password with bcrypt (cost 10).
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    bcrypt::hash(password, BCRYPT_COST).map_err(PasswordError::Hash)
}

/// Verify a password against a bcrypt hash. Comparison happens inside bcrypt
/// and is constant-time with respect to the candidate.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, PasswordError> {
    bcrypt::verify(password, hash).map_err(PasswordError::Hash)
}

/// Hash on the blocking pool.
pub async fn hash_password_blocking(password: String) -> Result<String, PasswordError> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|_| PasswordError::TaskFailed)?
}

/// Verify on the blocking pool.
pub async fn verify_password_blocking(
    password: String,
    hash: String,
) -> Result<bool, PasswordError> {
    tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .map_err(|_| PasswordError::TaskFailed)?
}
