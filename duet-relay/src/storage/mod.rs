//! Persistent store gateway.
//!
//! Typed queries over the relational schema; all multi-statement
//! operations execute within a single transaction.

mod sqlite;

pub use sqlite::SqliteStore;

use async_trait::async_trait;
use duet_types::{DayId, EntryId, PairId, PublicKey, RelayToken};

use crate::error::StorageResult;

/// Current wall-clock as a millisecond Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// A web-push subscription triple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushSubscription {
    /// Push service endpoint URL.
    pub endpoint: String,
    /// Client public key for payload encryption.
    pub p256dh: String,
    /// Client auth secret.
    pub auth: String,
}

/// A user row.
#[derive(Debug, Clone)]
pub struct UserRow {
    /// The account identifier.
    pub public_key: PublicKey,
    /// The pair this user currently belongs to.
    pub pair_id: PairId,
    /// Push subscription, if the user subscribed.
    pub push: Option<PushSubscription>,
}

/// A relay token row.
#[derive(Debug, Clone)]
pub struct TokenRow {
    /// The token string.
    pub token: String,
    /// The user who minted the token.
    pub initiator_key: PublicKey,
    /// The pair the token admits into.
    pub pair_id: PairId,
    /// Millisecond epoch after which the token is invalid.
    pub expires_at: i64,
    /// Whether the token has been redeemed.
    pub consumed: bool,
}

/// A stored entry row.
#[derive(Debug, Clone)]
pub struct EntryRow {
    /// The entry identifier.
    pub id: EntryId,
    /// The uploading user.
    pub author_key: PublicKey,
    /// The pair the entry belongs to.
    pub pair_id: PairId,
    /// Calendar date the entry is addressed to.
    pub day_id: DayId,
    /// Opaque ciphertext.
    pub payload: Vec<u8>,
    /// Millisecond epoch of upload.
    pub created_at: i64,
    /// Millisecond epoch of first partner fetch, if any.
    pub fetched_at: Option<i64>,
    /// Millisecond epoch of acknowledgement, if any.
    pub acked_at: Option<i64>,
}

/// Outcome of the join-pair transaction.
#[derive(Debug, Clone)]
pub enum JoinOutcome {
    /// The compare-and-set won; the follower is registered.
    Joined {
        /// The pair joined into.
        pair_id: PairId,
        /// The initiator, now the follower's partner.
        initiator_key: PublicKey,
    },
    /// Another join consumed the token first.
    AlreadyConsumed,
}

/// Typed store operations used by the relay services.
#[async_trait]
pub trait RelayStore: Send + Sync {
    /// Initiate-pair transaction: insert a pair, upsert the initiator
    /// into it (clearing any push subscription), insert the token.
    async fn initiate_pair(
        &self,
        initiator: &PublicKey,
        token: &RelayToken,
        expires_at: i64,
    ) -> StorageResult<PairId>;

    /// Join-pair transaction. Consumes the token via compare-and-set
    /// (`... WHERE token = ? AND consumed = 0 RETURNING ...`) and, on
    /// success, upserts the follower into the pair.
    async fn join_pair(&self, token: &str, follower: &PublicKey) -> StorageResult<JoinOutcome>;

    /// Load a token row.
    async fn get_token(&self, token: &str) -> StorageResult<Option<TokenRow>>;

    /// Load a user row.
    async fn get_user(&self, key: &PublicKey) -> StorageResult<Option<UserRow>>;

    /// Load the other user in a pair.
    async fn get_partner(&self, key: &PublicKey, pair_id: &PairId)
        -> StorageResult<Option<UserRow>>;

    /// Account-delete transaction: the user's entries, tokens, then the
    /// user row.
    async fn delete_account(&self, key: &PublicKey) -> StorageResult<()>;

    /// Store or replace a user's push subscription.
    async fn set_push_subscription(
        &self,
        key: &PublicKey,
        sub: &PushSubscription,
    ) -> StorageResult<()>;

    /// Null out a user's push subscription.
    async fn clear_push_subscription(&self, key: &PublicKey) -> StorageResult<()>;

    /// Count entries by an author on a given day.
    async fn count_entries_for_day(&self, author: &PublicKey, day: &DayId) -> StorageResult<u32>;

    /// Insert a new entry.
    async fn insert_entry(
        &self,
        id: &EntryId,
        author: &PublicKey,
        pair_id: &PairId,
        day: &DayId,
        payload: &[u8],
        created_at: i64,
    ) -> StorageResult<()>;

    /// Select the partner's unacknowledged entries since a day bound,
    /// stamping `fetched_at` on first read, within one transaction.
    async fn fetch_undelivered(
        &self,
        pair_id: &PairId,
        partner: &PublicKey,
        since: &DayId,
        now: i64,
    ) -> StorageResult<Vec<EntryRow>>;

    /// Delete acknowledged entries. Only rows in the caller's pair and
    /// authored by the partner match; everything else is ignored.
    async fn ack_entries(
        &self,
        ids: &[EntryId],
        pair_id: &PairId,
        partner: &PublicKey,
    ) -> StorageResult<u64>;

    /// Delete tokens past their TTL. Returns the number removed.
    async fn cleanup_expired_tokens(&self, now: i64) -> StorageResult<u64>;

    /// Delete never-acknowledged entries created before the cutoff.
    async fn cleanup_orphaned_entries(&self, cutoff: i64) -> StorageResult<u64>;

    /// Total pairs (for health reporting).
    async fn total_pairs(&self) -> StorageResult<u64>;

    /// Total users (for health reporting).
    async fn total_users(&self) -> StorageResult<u64>;

    /// Total stored entries (for health reporting).
    async fn total_entries(&self) -> StorageResult<u64>;

    /// Total ciphertext bytes at rest (for health reporting).
    async fn total_payload_bytes(&self) -> StorageResult<u64>;
}
