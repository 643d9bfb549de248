use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    ApplicationIntent, IntentStatus, Listing, ListingCandidate, PageCursor, Source, UpsertOutcome,
    UserProfile,
};

/// Errors that can occur in the listing/profile store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLx error: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    MigrateError(#[from] sqlx::migrate::MigrateError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflicting concurrent write could not be resolved: {0}")]
    Conflict(String),

    #[error("Invalid stored data: {0}")]
    InvalidData(String),
}

/// Result of applying an executor outcome to an intent
#[derive(Debug, Clone, PartialEq)]
pub enum IntentTransition {
    Updated(ApplicationIntent),
    /// Already terminal; left unchanged
    AlreadyTerminal(ApplicationIntent),
    NotFound,
}

/// Listing persistence with constraint-backed upserts
#[async_trait]
pub trait ListingStore: Send + Sync {
    /// Resolve and write a candidate in one atomic step
    ///
    /// Lookup order: (source, source_id), alias, content fingerprint.
    async fn upsert_listing(
        &self,
        candidate: &ListingCandidate,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StoreError>;

    /// Fold a candidate into a known listing (near-duplicate match), recording an alias
    async fn merge_into(
        &self,
        listing_id: Uuid,
        candidate: &ListingCandidate,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StoreError>;

    async fn get_listing(&self, id: Uuid) -> Result<Option<Listing>, StoreError>;

    /// Listings with the same canonical company, title and location
    async fn find_similar(
        &self,
        company: &str,
        title: &str,
        location: &str,
    ) -> Result<Vec<Listing>, StoreError>;

    /// Store an embedding if the listing is still at `version`
    async fn set_embedding(&self, id: Uuid, version: i32, embedding: &[f32]) -> Result<bool, StoreError>;

    /// Open, non-stale listings seen since `since`
    async fn fresh_listings(&self, since: DateTime<Utc>) -> Result<Vec<Listing>, StoreError>;

    /// Mark listings of a source not seen since `older_than` as stale
    async fn mark_stale(&self, source: Source, older_than: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Fresh listings whose current version was never evaluated against every active profile
    async fn unscored_listings(&self, since: DateTime<Utc>, limit: i64) -> Result<Vec<Listing>, StoreError>;

    /// Record that `version` of a listing has been fully evaluated; false if it moved on
    async fn mark_scored(&self, id: Uuid, version: i32) -> Result<bool, StoreError>;
}

/// Read-only view of externally owned profiles
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn active_profiles(&self) -> Result<Vec<UserProfile>, StoreError>;

    async fn get_profile(&self, id: &str) -> Result<Option<UserProfile>, StoreError>;
}

/// Application intents, unique per (profile, listing)
#[async_trait]
pub trait IntentStore: Send + Sync {
    async fn intent_exists(&self, profile_id: &str, listing_id: Uuid) -> Result<bool, StoreError>;

    /// Insert unless an intent for the pair exists; `None` means another writer won
    async fn create_intent(
        &self,
        intent: &ApplicationIntent,
    ) -> Result<Option<ApplicationIntent>, StoreError>;

    async fn get_intent(&self, id: Uuid) -> Result<Option<ApplicationIntent>, StoreError>;

    async fn mark_dispatched(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Pending intents never handed to the executor
    async fn undispatched_intents(&self, limit: i64) -> Result<Vec<ApplicationIntent>, StoreError>;

    /// Move a pending intent to `status`; terminal intents are never overwritten
    async fn update_intent_status(
        &self,
        id: Uuid,
        status: IntentStatus,
        now: DateTime<Utc>,
    ) -> Result<IntentTransition, StoreError>;
}

/// Pagination resume points
#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn load_cursor(&self, source: Source, partition: &str) -> Result<Option<PageCursor>, StoreError>;

    async fn save_cursor(&self, cursor: &PageCursor) -> Result<(), StoreError>;
}

/// Everything the pipeline persists
#[async_trait]
pub trait Store: ListingStore + ProfileStore + IntentStore + CursorStore {
    async fn health_check(&self) -> Result<bool, StoreError>;
}
