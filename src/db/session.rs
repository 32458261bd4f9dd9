//! Per-device session records.
//!
//! Sessions track device identity and are correlated with refresh tokens via
//! session id, but have independent lifecycles: a rotation keeps the session,
//! and a missing session never fails an otherwise-valid request.

use sqlx::sqlite::SqlitePool;

/// At most this many session records per account.
pub const MAX_SESSIONS: i64 = 10;

/// A per-device session record.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub id: i64,
    pub session_id: String,
    pub account_id: i64,
    pub device: Option<String>,
    pub ip: Option<String>,
    pub refresh_jti: Option<String>,
    pub last_seen: i64,
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: i64,
    session_id: String,
    account_id: i64,
    device: Option<String>,
    ip: Option<String>,
    refresh_jti: Option<String>,
    last_seen: i64,
}

impl From<SessionRow> for SessionRecord {
    fn from(row: SessionRow) -> Self {
        Self {
            id: row.id,
            session_id: row.session_id,
            account_id: row.account_id,
            device: row.device,
            ip: row.ip,
            refresh_jti: row.refresh_jti,
            last_seen: row.last_seen,
        }
    }
}

const SELECT_COLUMNS: &str = "id, session_id, account_id, device, ip, refresh_jti, last_seen";

/// Store for managing session records.
pub struct SessionStore {
    pool: SqlitePool,
}

impl SessionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a session record, first trimming the account's sessions to the
    /// newest MAX_SESSIONS - 1 (oldest by last access dropped).
    pub async fn create(
        &self,
        session_id: &str,
        account_id: i64,
        device: Option<&str>,
        ip: Option<&str>,
        refresh_jti: Option<&str>,
        now: i64,
    ) -> Result<i64, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM sessions WHERE account_id = ?1 AND id NOT IN (\
                SELECT id FROM sessions WHERE account_id = ?1 \
                ORDER BY last_seen DESC, id DESC LIMIT ?2)",
        )
        .bind(account_id)
        .bind(MAX_SESSIONS - 1)
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query(
            "INSERT INTO sessions (session_id, account_id, device, ip, refresh_jti, last_seen) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(session_id)
        .bind(account_id)
        .bind(device)
        .bind(ip)
        .bind(refresh_jti)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.last_insert_rowid())
    }

    /// Get a session by its session id.
    pub async fn get(&self, session_id: &str) -> Result<Option<SessionRecord>, sqlx::Error> {
        let row: Option<SessionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM sessions WHERE session_id = ?",
            SELECT_COLUMNS
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(SessionRecord::from))
    }

    /// Update the last-access timestamp. Scoped to the owning account so one
    /// caller cannot bump another account's eviction order. Silently no-ops
    /// when the session is unknown; session tracking is telemetry, not a
    /// security boundary.
    pub async fn touch(
        &self,
        session_id: &str,
        account_id: i64,
        now: i64,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE sessions SET last_seen = ? WHERE session_id = ? AND account_id = ?",
        )
        .bind(now)
        .bind(session_id)
        .bind(account_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Point a session at the refresh token that currently backs it.
    pub async fn link_refresh(&self, session_id: &str, jti: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE sessions SET refresh_jti = ? WHERE session_id = ?")
            .bind(jti)
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Remove a session. Returns false if it did not exist.
    pub async fn remove(&self, session_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM sessions WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Remove every session for an account.
    pub async fn clear_all(&self, account_id: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM sessions WHERE account_id = ?")
            .bind(account_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// List sessions for an account, most recently seen first.
    pub async fn list_by_account(
        &self,
        account_id: i64,
    ) -> Result<Vec<SessionRecord>, sqlx::Error> {
        let rows: Vec<SessionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM sessions WHERE account_id = ? ORDER BY last_seen DESC, id DESC",
            SELECT_COLUMNS
        ))
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(SessionRecord::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, Role};

    async fn account_fixture(db: &Database) -> i64 {
        db.accounts()
            .create("u-1", "alice@example.com", "hash", Role::Student, "A", "N")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_session_cap_drops_oldest() {
        let db = Database::open(":memory:").await.unwrap();
        let id = account_fixture(&db).await;
        let now = 1_000_000;

        for i in 0..13 {
            db.sessions()
                .create(&format!("sess-{}", i), id, Some("web"), None, None, now + i)
                .await
                .unwrap();
        }

        let sessions = db.sessions().list_by_account(id).await.unwrap();
        assert_eq!(sessions.len() as i64, MAX_SESSIONS);
        assert_eq!(sessions[0].session_id, "sess-12");
        assert!(db.sessions().get("sess-0").await.unwrap().is_none());
        assert!(db.sessions().get("sess-3").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_touch_updates_last_seen_and_noops_on_unknown() {
        let db = Database::open(":memory:").await.unwrap();
        let id = account_fixture(&db).await;
        let now = 1_000_000;

        db.sessions()
            .create("sess-1", id, Some("web"), None, None, now)
            .await
            .unwrap();

        assert!(db.sessions().touch("sess-1", id, now + 60).await.unwrap());
        let session = db.sessions().get("sess-1").await.unwrap().unwrap();
        assert_eq!(session.last_seen, now + 60);

        // Unknown session: no error, just a no-op
        assert!(!db.sessions().touch("sess-unknown", id, now + 60).await.unwrap());
    }

    #[tokio::test]
    async fn test_touch_cannot_reach_another_accounts_session() {
        let db = Database::open(":memory:").await.unwrap();
        let alice = account_fixture(&db).await;
        let bob = db
            .accounts()
            .create("u-2", "bob@example.com", "hash", Role::Student, "B", "N")
            .await
            .unwrap();
        let now = 1_000_000;

        db.sessions()
            .create("sess-alice", alice, None, None, None, now)
            .await
            .unwrap();

        // Bob naming Alice's session id leaves her last_seen alone
        assert!(!db.sessions().touch("sess-alice", bob, now + 60).await.unwrap());
        let session = db.sessions().get("sess-alice").await.unwrap().unwrap();
        assert_eq!(session.last_seen, now);
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let db = Database::open(":memory:").await.unwrap();
        let id = account_fixture(&db).await;
        let now = 1_000_000;

        db.sessions().create("sess-1", id, None, None, None, now).await.unwrap();
        db.sessions().create("sess-2", id, None, None, None, now).await.unwrap();

        assert!(db.sessions().remove("sess-1").await.unwrap());
        assert!(!db.sessions().remove("sess-1").await.unwrap());

        assert_eq!(db.sessions().clear_all(id).await.unwrap(), 1);
        assert!(db.sessions().list_by_account(id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_link_refresh_survives_rotation() {
        let db = Database::open(":memory:").await.unwrap();
        let id = account_fixture(&db).await;
        let now = 1_000_000;

        db.sessions()
            .create("sess-1", id, None, None, Some("jti-old"), now)
            .await
            .unwrap();
        db.sessions().link_refresh("sess-1", "jti-new").await.unwrap();

        let session = db.sessions().get("sess-1").await.unwrap().unwrap();
        assert_eq!(session.refresh_jti.as_deref(), Some("jti-new"));
    }
}
