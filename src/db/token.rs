//! Refresh-token records: creation with a live-token cap, revocation, and the
//! rotation compare-and-swap.
//!
//! Records are revoked by flag rather than deleted so a replayed token can be
//! distinguished from one that never existed. Expired rows are pruned lazily
//! on refresh, not by a background sweep; revoked rows stay until they expire
//! so replays remain recognizable as revoked.

use sqlx::sqlite::SqlitePool;

/// At most this many live (non-revoked, unexpired) records per account.
pub const MAX_LIVE_REFRESH_TOKENS: i64 = 5;

/// A refresh token record.
#[derive(Debug, Clone)]
pub struct RefreshTokenRecord {
    pub id: i64,
    pub jti: String,
    pub account_id: i64,
    pub session_id: Option<String>,
    pub user_agent: Option<String>,
    pub ip: Option<String>,
    pub remember_me: bool,
    pub revoked: bool,
    pub issued_at: i64,
    pub expires_at: i64,
}

#[derive(sqlx::FromRow)]
struct RecordRow {
    id: i64,
    jti: String,
    account_id: i64,
    session_id: Option<String>,
    user_agent: Option<String>,
    ip: Option<String>,
    remember_me: i32,
    revoked: i32,
    issued_at: i64,
    expires_at: i64,
}

impl From<RecordRow> for RefreshTokenRecord {
    fn from(row: RecordRow) -> Self {
        Self {
            id: row.id,
            jti: row.jti,
            account_id: row.account_id,
            session_id: row.session_id,
            user_agent: row.user_agent,
            ip: row.ip,
            remember_me: row.remember_me != 0,
            revoked: row.revoked != 0,
            issued_at: row.issued_at,
            expires_at: row.expires_at,
        }
    }
}

const SELECT_COLUMNS: &str =
    "id, jti, account_id, session_id, user_agent, ip, remember_me, revoked, issued_at, expires_at";

/// Store for managing refresh-token records.
pub struct RefreshTokenStore {
    pool: SqlitePool,
}

impl RefreshTokenStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new refresh-token record, first trimming the account's live
    /// records to the newest MAX_LIVE_REFRESH_TOKENS - 1 (oldest dropped).
    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        &self,
        jti: &str,
        account_id: i64,
        session_id: Option<&str>,
        user_agent: Option<&str>,
        ip: Option<&str>,
        remember_me: bool,
        issued_at: i64,
        expires_at: i64,
    ) -> Result<i64, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM refresh_tokens WHERE account_id = ?1 AND revoked = 0 AND expires_at > ?2 \
             AND id NOT IN (\
                SELECT id FROM refresh_tokens \
                WHERE account_id = ?1 AND revoked = 0 AND expires_at > ?2 \
                ORDER BY issued_at DESC, id DESC LIMIT ?3)",
        )
        .bind(account_id)
        .bind(issued_at)
        .bind(MAX_LIVE_REFRESH_TOKENS - 1)
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query(
            "INSERT INTO refresh_tokens \
             (jti, account_id, session_id, user_agent, ip, remember_me, issued_at, expires_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(jti)
        .bind(account_id)
        .bind(session_id)
        .bind(user_agent)
        .bind(ip)
        .bind(remember_me as i32)
        .bind(issued_at)
        .bind(expires_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.last_insert_rowid())
    }

    /// Get a record by its JWT ID.
    pub async fn get_by_jti(&self, jti: &str) -> Result<Option<RefreshTokenRecord>, sqlx::Error> {
        let row: Option<RecordRow> = sqlx::query_as(&format!(
            "SELECT {} FROM refresh_tokens WHERE jti = ?",
            SELECT_COLUMNS
        ))
        .bind(jti)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(RefreshTokenRecord::from))
    }

    /// True iff a record with this JTI exists, is not revoked, and has not
    /// expired.
    pub async fn is_valid(&self, jti: &str, now: i64) -> Result<bool, sqlx::Error> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM refresh_tokens WHERE jti = ? AND revoked = 0 AND expires_at > ?",
        )
        .bind(jti)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.0 > 0)
    }

    /// Mark a record revoked. Returns false if no live record matched, which
    /// is not an error: logout must be idempotent.
    pub async fn revoke(&self, jti: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE refresh_tokens SET revoked = 1 WHERE jti = ? AND revoked = 0")
            .bind(jti)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Revoke a record only if it is still live: the rotation guard. Of two
    /// concurrent refreshes with the same token, exactly one sees true here;
    /// the loser observes the token as already revoked.
    pub async fn consume_for_rotation(&self, jti: &str, now: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked = 1 \
             WHERE jti = ? AND revoked = 0 AND expires_at > ?",
        )
        .bind(jti)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Revoke every record for an account (password change, security incident).
    pub async fn revoke_all(&self, account_id: i64) -> Result<u64, sqlx::Error> {
        let result =
            sqlx::query("UPDATE refresh_tokens SET revoked = 1 WHERE account_id = ? AND revoked = 0")
                .bind(account_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    /// Drop records past their expiry. Revoked but unexpired rows are kept:
    /// a replayed token must keep reading as revoked, not unknown, for the
    /// token's whole lifetime.
    pub async fn prune_expired(&self, account_id: i64, now: i64) -> Result<u64, sqlx::Error> {
        let result =
            sqlx::query("DELETE FROM refresh_tokens WHERE account_id = ? AND expires_at <= ?")
                .bind(account_id)
                .bind(now)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    /// List live records for an account, newest first.
    pub async fn list_live(
        &self,
        account_id: i64,
        now: i64,
    ) -> Result<Vec<RefreshTokenRecord>, sqlx::Error> {
        let rows: Vec<RecordRow> = sqlx::query_as(&format!(
            "SELECT {} FROM refresh_tokens \
             WHERE account_id = ? AND revoked = 0 AND expires_at > ? \
             ORDER BY issued_at DESC, id DESC",
            SELECT_COLUMNS
        ))
        .bind(account_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(RefreshTokenRecord::from).collect())
    }
}
