//! SQLite storage backend for duet-relay.

use super::{EntryRow, JoinOutcome, PushSubscription, RelayStore, TokenRow, UserRow};
use crate::error::StorageError;
use async_trait::async_trait;
use duet_types::{DayId, EntryId, PairId, PublicKey, RelayToken};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// SQLite-based relay store.
///
/// Uses WAL mode for concurrent reads/writes; foreign keys are enforced.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new SQLite store from a database path.
    ///
    /// Creates the database file if it doesn't exist and runs the
    /// schema migrations before returning.
    pub async fn new(path: &Path) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(path.to_str().unwrap_or("duet.db"))
            .map_err(StorageError::Database)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .map_err(StorageError::Database)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create an in-memory SQLite store (for testing).
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(":memory:")
            .map_err(StorageError::Database)?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(StorageError::Database)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run database migrations.
    ///
    /// Single-shot: any failure here aborts startup before the listener
    /// binds.
    async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pairs (
                id TEXT PRIMARY KEY,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                public_key TEXT PRIMARY KEY,
                pair_id TEXT NOT NULL REFERENCES pairs(id),
                push_endpoint TEXT,
                push_p256dh TEXT,
                push_auth TEXT,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS relay_tokens (
                token TEXT PRIMARY KEY,
                initiator_key TEXT NOT NULL REFERENCES users(public_key),
                pair_id TEXT NOT NULL REFERENCES pairs(id),
                expires_at INTEGER NOT NULL,
                consumed INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entries (
                id TEXT PRIMARY KEY,
                author_key TEXT NOT NULL REFERENCES users(public_key),
                pair_id TEXT NOT NULL REFERENCES pairs(id),
                day_id TEXT NOT NULL,
                payload BLOB NOT NULL,
                created_at INTEGER NOT NULL,
                fetched_at INTEGER,
                acked_at INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_entries_author_day ON entries(author_key, day_id)",
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_entries_pair ON entries(pair_id)")
            .execute(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_users_pair ON users(pair_id)")
            .execute(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tokens_expires ON relay_tokens(expires_at)")
            .execute(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        Ok(())
    }
}

/// Upsert a user into a pair.
///
/// The conflict clause is load-bearing: a user re-pairing replaces their
/// prior pair membership and forfeits their push subscription.
async fn upsert_user_into_pair(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    key: &PublicKey,
    pair_id: &PairId,
    now: i64,
) -> Result<(), StorageError> {
    sqlx::query(
        r#"
        INSERT INTO users (public_key, pair_id, created_at)
        VALUES (?1, ?2, ?3)
        ON CONFLICT(public_key) DO UPDATE SET
            pair_id = excluded.pair_id,
            push_endpoint = NULL,
            push_p256dh = NULL,
            push_auth = NULL
        "#,
    )
    .bind(key.as_str())
    .bind(pair_id.as_str())
    .bind(now)
    .execute(&mut **tx)
    .await
    .map_err(StorageError::Database)?;
    Ok(())
}

#[async_trait]
impl RelayStore for SqliteStore {
    async fn initiate_pair(
        &self,
        initiator: &PublicKey,
        token: &RelayToken,
        expires_at: i64,
    ) -> Result<PairId, StorageError> {
        let pair_id = PairId::new();
        let now = super::now_ms();

        let mut tx = self.pool.begin().await.map_err(StorageError::Database)?;

        sqlx::query("INSERT INTO pairs (id, created_at) VALUES (?1, ?2)")
            .bind(pair_id.as_str())
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(StorageError::Database)?;

        upsert_user_into_pair(&mut tx, initiator, &pair_id, now).await?;

        sqlx::query(
            r#"
            INSERT INTO relay_tokens (token, initiator_key, pair_id, expires_at, consumed, created_at)
            VALUES (?1, ?2, ?3, ?4, 0, ?5)
            "#,
        )
        .bind(token.as_str())
        .bind(initiator.as_str())
        .bind(pair_id.as_str())
        .bind(expires_at)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(StorageError::Database)?;

        tx.commit().await.map_err(StorageError::Database)?;
        Ok(pair_id)
    }

    async fn join_pair(&self, token: &str, follower: &PublicKey) -> Result<JoinOutcome, StorageError> {
        let now = super::now_ms();
        let mut tx = self.pool.begin().await.map_err(StorageError::Database)?;

        // Compare-and-set: the sole race defence against two followers
        // redeeming the same token concurrently.
        let row: Option<(String, String)> = sqlx::query_as(
            r#"
            UPDATE relay_tokens SET consumed = 1
            WHERE token = ?1 AND consumed = 0
            RETURNING pair_id, initiator_key
            "#,
        )
        .bind(token)
        .fetch_optional(&mut *tx)
        .await
        .map_err(StorageError::Database)?;

        let Some((pair_id, initiator_key)) = row else {
            // Losing the CAS rolls the transaction back.
            return Ok(JoinOutcome::AlreadyConsumed);
        };

        let pair_id = PairId::from_string(pair_id);
        let initiator_key = PublicKey::parse(&initiator_key)
            .map_err(|e| StorageError::Corrupt(e.to_string()))?;

        upsert_user_into_pair(&mut tx, follower, &pair_id, now).await?;

        tx.commit().await.map_err(StorageError::Database)?;
        Ok(JoinOutcome::Joined {
            pair_id,
            initiator_key,
        })
    }

    async fn get_token(&self, token: &str) -> Result<Option<TokenRow>, StorageError> {
        let row = sqlx::query_as::<_, TokenRowDb>(
            r#"
            SELECT token, initiator_key, pair_id, expires_at, consumed
            FROM relay_tokens WHERE token = ?1
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        row.map(TryInto::try_into).transpose()
    }

    async fn get_user(&self, key: &PublicKey) -> Result<Option<UserRow>, StorageError> {
        let row = sqlx::query_as::<_, UserRowDb>(
            r#"
            SELECT public_key, pair_id, push_endpoint, push_p256dh, push_auth
            FROM users WHERE public_key = ?1
            "#,
        )
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        row.map(TryInto::try_into).transpose()
    }

    async fn get_partner(
        &self,
        key: &PublicKey,
        pair_id: &PairId,
    ) -> Result<Option<UserRow>, StorageError> {
        let row = sqlx::query_as::<_, UserRowDb>(
            r#"
            SELECT public_key, pair_id, push_endpoint, push_p256dh, push_auth
            FROM users WHERE pair_id = ?1 AND public_key != ?2
            "#,
        )
        .bind(pair_id.as_str())
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        row.map(TryInto::try_into).transpose()
    }

    async fn delete_account(&self, key: &PublicKey) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(StorageError::Database)?;

        // FK order: entries and tokens reference the user row.
        sqlx::query("DELETE FROM entries WHERE author_key = ?1")
            .bind(key.as_str())
            .execute(&mut *tx)
            .await
            .map_err(StorageError::Database)?;

        sqlx::query("DELETE FROM relay_tokens WHERE initiator_key = ?1")
            .bind(key.as_str())
            .execute(&mut *tx)
            .await
            .map_err(StorageError::Database)?;

        sqlx::query("DELETE FROM users WHERE public_key = ?1")
            .bind(key.as_str())
            .execute(&mut *tx)
            .await
            .map_err(StorageError::Database)?;

        tx.commit().await.map_err(StorageError::Database)?;
        Ok(())
    }

    async fn set_push_subscription(
        &self,
        key: &PublicKey,
        sub: &PushSubscription,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            UPDATE users SET push_endpoint = ?1, push_p256dh = ?2, push_auth = ?3
            WHERE public_key = ?4
            "#,
        )
        .bind(&sub.endpoint)
        .bind(&sub.p256dh)
        .bind(&sub.auth)
        .bind(key.as_str())
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;
        Ok(())
    }

    async fn clear_push_subscription(&self, key: &PublicKey) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            UPDATE users SET push_endpoint = NULL, push_p256dh = NULL, push_auth = NULL
            WHERE public_key = ?1
            "#,
        )
        .bind(key.as_str())
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;
        Ok(())
    }

    async fn count_entries_for_day(
        &self,
        author: &PublicKey,
        day: &DayId,
    ) -> Result<u32, StorageError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM entries WHERE author_key = ?1 AND day_id = ?2",
        )
        .bind(author.as_str())
        .bind(day.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        Ok(count as u32)
    }

    async fn insert_entry(
        &self,
        id: &EntryId,
        author: &PublicKey,
        pair_id: &PairId,
        day: &DayId,
        payload: &[u8],
        created_at: i64,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO entries (id, author_key, pair_id, day_id, payload, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(id.as_str())
        .bind(author.as_str())
        .bind(pair_id.as_str())
        .bind(day.as_str())
        .bind(payload)
        .bind(created_at)
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;
        Ok(())
    }

    async fn fetch_undelivered(
        &self,
        pair_id: &PairId,
        partner: &PublicKey,
        since: &DayId,
        now: i64,
    ) -> Result<Vec<EntryRow>, StorageError> {
        let mut tx = self.pool.begin().await.map_err(StorageError::Database)?;

        sqlx::query(
            r#"
            UPDATE entries SET fetched_at = ?1
            WHERE pair_id = ?2 AND author_key = ?3 AND day_id >= ?4
              AND acked_at IS NULL AND fetched_at IS NULL
            "#,
        )
        .bind(now)
        .bind(pair_id.as_str())
        .bind(partner.as_str())
        .bind(since.as_str())
        .execute(&mut *tx)
        .await
        .map_err(StorageError::Database)?;

        let rows = sqlx::query_as::<_, EntryRowDb>(
            r#"
            SELECT id, author_key, pair_id, day_id, payload, created_at, fetched_at, acked_at
            FROM entries
            WHERE pair_id = ?1 AND author_key = ?2 AND day_id >= ?3 AND acked_at IS NULL
            ORDER BY day_id ASC, created_at ASC
            "#,
        )
        .bind(pair_id.as_str())
        .bind(partner.as_str())
        .bind(since.as_str())
        .fetch_all(&mut *tx)
        .await
        .map_err(StorageError::Database)?;

        tx.commit().await.map_err(StorageError::Database)?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn ack_entries(
        &self,
        ids: &[EntryId],
        pair_id: &PairId,
        partner: &PublicKey,
    ) -> Result<u64, StorageError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await.map_err(StorageError::Database)?;
        let mut deleted = 0u64;

        // The predicate enforces both properties at once: only entries
        // the caller received (partner-authored), only within the
        // caller's pair. Everything else is a silent zero.
        for id in ids {
            let result = sqlx::query(
                "DELETE FROM entries WHERE id = ?1 AND pair_id = ?2 AND author_key = ?3",
            )
            .bind(id.as_str())
            .bind(pair_id.as_str())
            .bind(partner.as_str())
            .execute(&mut *tx)
            .await
            .map_err(StorageError::Database)?;
            deleted += result.rows_affected();
        }

        tx.commit().await.map_err(StorageError::Database)?;
        Ok(deleted)
    }

    async fn cleanup_expired_tokens(&self, now: i64) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM relay_tokens WHERE expires_at <= ?1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        Ok(result.rows_affected())
    }

    async fn cleanup_orphaned_entries(&self, cutoff: i64) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM entries WHERE created_at < ?1 AND acked_at IS NULL")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        Ok(result.rows_affected())
    }

    async fn total_pairs(&self) -> Result<u64, StorageError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pairs")
            .fetch_one(&self.pool)
            .await
            .map_err(StorageError::Database)?;
        Ok(count as u64)
    }

    async fn total_users(&self) -> Result<u64, StorageError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await
            .map_err(StorageError::Database)?;
        Ok(count as u64)
    }

    async fn total_entries(&self) -> Result<u64, StorageError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entries")
            .fetch_one(&self.pool)
            .await
            .map_err(StorageError::Database)?;
        Ok(count as u64)
    }

    async fn total_payload_bytes(&self) -> Result<u64, StorageError> {
        let size: Option<i64> = sqlx::query_scalar("SELECT SUM(LENGTH(payload)) FROM entries")
            .fetch_one(&self.pool)
            .await
            .map_err(StorageError::Database)?;
        Ok(size.unwrap_or(0) as u64)
    }
}

/// Internal row type for user queries.
#[derive(sqlx::FromRow)]
struct UserRowDb {
    public_key: String,
    pair_id: String,
    push_endpoint: Option<String>,
    push_p256dh: Option<String>,
    push_auth: Option<String>,
}

impl TryFrom<UserRowDb> for UserRow {
    type Error = StorageError;

    fn try_from(row: UserRowDb) -> Result<Self, Self::Error> {
        let push = match (row.push_endpoint, row.push_p256dh, row.push_auth) {
            (Some(endpoint), Some(p256dh), Some(auth)) => Some(PushSubscription {
                endpoint,
                p256dh,
                auth,
            }),
            _ => None,
        };

        Ok(UserRow {
            public_key: PublicKey::parse(&row.public_key)
                .map_err(|e| StorageError::Corrupt(e.to_string()))?,
            pair_id: PairId::from_string(row.pair_id),
            push,
        })
    }
}

/// Internal row type for token queries.
#[derive(sqlx::FromRow)]
struct TokenRowDb {
    token: String,
    initiator_key: String,
    pair_id: String,
    expires_at: i64,
    consumed: bool,
}

impl TryFrom<TokenRowDb> for TokenRow {
    type Error = StorageError;

    fn try_from(row: TokenRowDb) -> Result<Self, Self::Error> {
        Ok(TokenRow {
            token: row.token,
            initiator_key: PublicKey::parse(&row.initiator_key)
                .map_err(|e| StorageError::Corrupt(e.to_string()))?,
            pair_id: PairId::from_string(row.pair_id),
            expires_at: row.expires_at,
            consumed: row.consumed,
        })
    }
}

/// Internal row type for entry queries.
#[derive(sqlx::FromRow)]
struct EntryRowDb {
    id: String,
    author_key: String,
    pair_id: String,
    day_id: String,
    payload: Vec<u8>,
    created_at: i64,
    fetched_at: Option<i64>,
    acked_at: Option<i64>,
}

impl TryFrom<EntryRowDb> for EntryRow {
    type Error = StorageError;

    fn try_from(row: EntryRowDb) -> Result<Self, Self::Error> {
        Ok(EntryRow {
            id: EntryId::from_string(row.id),
            author_key: PublicKey::parse(&row.author_key)
                .map_err(|e| StorageError::Corrupt(e.to_string()))?,
            pair_id: PairId::from_string(row.pair_id),
            day_id: DayId::parse(&row.day_id).map_err(|e| StorageError::Corrupt(e.to_string()))?,
            payload: row.payload,
            created_at: row.created_at,
            fetched_at: row.fetched_at,
            acked_at: row.acked_at,
        })
    }
}
