//! Account storage: credentials, lockout state, and the password-reset OTP slot.
//!
//! Lockout mutations are single conditional UPDATE statements so concurrent
//! failed logins never lose updates to read-modify-write races.

use sqlx::sqlite::SqlitePool;

/// Failures further apart than this reset the counter instead of incrementing.
pub const ATTEMPT_WINDOW_SECS: i64 = 15 * 60;

/// Failures at or above this count lock the account.
pub const MAX_FAILED_ATTEMPTS: i64 = 5;

/// Lock duration once the threshold is reached.
pub const LOCK_DURATION_SECS: i64 = 30 * 60;

/// Account role for authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Alumni,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Alumni => "alumni",
            Role::Admin => "admin",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "alumni" => Role::Alumni,
            "admin" => Role::Admin,
            _ => Role::Student,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Account {
    pub id: i64,
    pub uid: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub first_name: String,
    pub last_name: String,
    pub verified: bool,
    pub profile_complete: bool,
    pub failed_logins: i64,
    pub last_failed_at: Option<i64>,
    pub lock_until: Option<i64>,
    pub reset_otp: Option<String>,
}

impl Account {
    /// True iff a lock is set and still in the future.
    pub fn is_locked(&self, now: i64) -> bool {
        self.lock_until.is_some_and(|until| until > now)
    }
}

#[derive(sqlx::FromRow)]
struct AccountRow {
    id: i64,
    uid: String,
    email: String,
    password_hash: String,
    role: String,
    first_name: String,
    last_name: String,
    verified: i32,
    profile_complete: i32,
    failed_logins: i64,
    last_failed_at: Option<i64>,
    lock_until: Option<i64>,
    reset_otp: Option<String>,
}

impl From<AccountRow> for Account {
    fn from(row: AccountRow) -> Self {
        Self {
            id: row.id,
            uid: row.uid,
            email: row.email,
            password_hash: row.password_hash,
            role: Role::from_str(&row.role),
            first_name: row.first_name,
            last_name: row.last_name,
            verified: row.verified != 0,
            profile_complete: row.profile_complete != 0,
            failed_logins: row.failed_logins,
            last_failed_at: row.last_failed_at,
            lock_until: row.lock_until,
            reset_otp: row.reset_otp,
        }
    }
}

const SELECT_COLUMNS: &str = "id, uid, email, password_hash, role, first_name, last_name, \
     verified, profile_complete, failed_logins, last_failed_at, lock_until, reset_otp";

#[derive(Clone)]
pub struct AccountStore {
    pool: SqlitePool,
}

impl AccountStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new account. Returns the account ID.
    /// Duplicate uid or email surfaces as a database unique violation.
    pub async fn create(
        &self,
        uid: &str,
        email: &str,
        password_hash: &str,
        role: Role,
        first_name: &str,
        last_name: &str,
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO accounts (uid, email, password_hash, role, first_name, last_name) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(uid)
        .bind(email)
        .bind(password_hash)
        .bind(role.as_str())
        .bind(first_name)
        .bind(last_name)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Get an account by email (case-insensitive).
    pub async fn get_by_email(&self, email: &str) -> Result<Option<Account>, sqlx::Error> {
        let row: Option<AccountRow> = sqlx::query_as(&format!(
            "SELECT {} FROM accounts WHERE email = ?",
            SELECT_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Account::from))
    }

    /// Get an account by ID.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<Account>, sqlx::Error> {
        let row: Option<AccountRow> = sqlx::query_as(&format!(
            "SELECT {} FROM accounts WHERE id = ?",
            SELECT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Account::from))
    }

    /// Get an account by external id.
    pub async fn get_by_uid(&self, uid: &str) -> Result<Option<Account>, sqlx::Error> {
        let row: Option<AccountRow> = sqlx::query_as(&format!(
            "SELECT {} FROM accounts WHERE uid = ?",
            SELECT_COLUMNS
        ))
        .bind(uid)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Account::from))
    }

    /// Replace the password hash.
    pub async fn set_password_hash(&self, id: i64, hash: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE accounts SET password_hash = ? WHERE id = ?")
            .bind(hash)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record a failed login attempt.
    ///
    /// A failure more than 15 minutes after the previous one resets the count
    /// to 1; otherwise the count increments. Reaching 5 sets a 30-minute lock.
    /// The whole policy is one UPDATE; SQLite evaluates every assignment
    /// against the pre-update row, so the lock expression sees the old count.
    pub async fn record_failed_attempt(&self, id: i64, now: i64) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE accounts SET \
                failed_logins = CASE \
                    WHEN last_failed_at IS NULL OR last_failed_at < ?1 - ?3 THEN 1 \
                    ELSE failed_logins + 1 END, \
                lock_until = CASE \
                    WHEN (CASE \
                        WHEN last_failed_at IS NULL OR last_failed_at < ?1 - ?3 THEN 1 \
                        ELSE failed_logins + 1 END) >= ?4 \
                    THEN ?1 + ?5 \
                    ELSE lock_until END, \
                last_failed_at = ?1 \
             WHERE id = ?2",
        )
        .bind(now)
        .bind(id)
        .bind(ATTEMPT_WINDOW_SECS)
        .bind(MAX_FAILED_ATTEMPTS)
        .bind(LOCK_DURATION_SECS)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Zero the lockout state after a successful login.
    pub async fn record_successful_attempt(&self, id: i64) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE accounts SET failed_logins = 0, last_failed_at = NULL, lock_until = NULL \
             WHERE id = ?",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Store a password-reset OTP, overwriting any previous one.
    pub async fn set_reset_otp(&self, id: i64, otp: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE accounts SET reset_otp = ? WHERE id = ?")
            .bind(otp)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Clear the OTP iff it matches. Returns true when the OTP was correct;
    /// the compare-and-clear is a single statement so an OTP is single-use
    /// even under concurrent verification attempts.
    pub async fn consume_reset_otp(&self, id: i64, otp: &str) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("UPDATE accounts SET reset_otp = NULL WHERE id = ? AND reset_otp = ?")
                .bind(id)
                .bind(otp)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }
}
