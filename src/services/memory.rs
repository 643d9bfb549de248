use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

use crate::core::dedup::{apply_sighting, classify};
use crate::models::{
    ApplicationIntent, IntentStatus, Listing, ListingCandidate, PageCursor, Resolution, Source,
    UpsertOutcome, UserProfile,
};
use crate::services::store::{
    CursorStore, IntentStore, IntentTransition, ListingStore, ProfileStore, Store, StoreError,
};

#[derive(Default)]
struct Inner {
    listings: HashMap<Uuid, Listing>,
    by_key: HashMap<(Source, String), Uuid>,
    by_alias: HashMap<(Source, String), Uuid>,
    by_fingerprint: HashMap<String, Uuid>,
    scored: HashMap<Uuid, i32>,
    intents: HashMap<Uuid, ApplicationIntent>,
    intent_pairs: HashMap<(String, Uuid), Uuid>,
    profiles: HashMap<String, UserProfile>,
    cursors: HashMap<(Source, String), PageCursor>,
}

/// In-process store with the same uniqueness guarantees as the Postgres schema
///
/// Each operation runs under one lock, so resolve-and-write is atomic.
/// Used when no database is configured and in tests.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed or replace an externally owned profile
    pub fn put_profile(&self, profile: UserProfile) {
        self.inner.lock().profiles.insert(profile.id.clone(), profile);
    }

    pub fn listing_count(&self) -> usize {
        self.inner.lock().listings.len()
    }

    pub fn intent_count(&self) -> usize {
        self.inner.lock().intents.len()
    }

    pub fn intents_for(&self, profile_id: &str) -> Vec<ApplicationIntent> {
        let mut intents: Vec<ApplicationIntent> = self
            .inner
            .lock()
            .intents
            .values()
            .filter(|i| i.profile_id == profile_id)
            .cloned()
            .collect();
        intents.sort_by_key(|i| i.requested_at);
        intents
    }
}

impl Inner {
    fn sight(
        &mut self,
        id: Uuid,
        candidate: &ListingCandidate,
        now: DateTime<Utc>,
        new_alias: bool,
    ) -> Result<UpsertOutcome, StoreError> {
        let listing = self
            .listings
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("listing {}", id)))?;
        let material = apply_sighting(listing, candidate, now);
        let listing = listing.clone();
        if new_alias {
            self.by_alias
                .insert((candidate.source, candidate.source_id.clone()), id);
        }
        Ok(UpsertOutcome {
            resolution: classify(id, material, new_alias),
            material,
            listing,
        })
    }
}

#[async_trait]
impl ListingStore for MemoryStore {
    async fn upsert_listing(
        &self,
        candidate: &ListingCandidate,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StoreError> {
        let mut inner = self.inner.lock();
        let key = (candidate.source, candidate.source_id.clone());

        if let Some(id) = inner.by_key.get(&key).or_else(|| inner.by_alias.get(&key)).copied() {
            return inner.sight(id, candidate, now, false);
        }
        if let Some(id) = inner.by_fingerprint.get(&candidate.content_fingerprint).copied() {
            return inner.sight(id, candidate, now, true);
        }

        let listing = Listing::from_candidate(candidate, now);
        inner.by_key.insert(key, listing.id);
        inner
            .by_fingerprint
            .insert(listing.content_fingerprint.clone(), listing.id);
        inner.listings.insert(listing.id, listing.clone());

        Ok(UpsertOutcome {
            resolution: Resolution::New(listing.id),
            material: true,
            listing,
        })
    }

    async fn merge_into(
        &self,
        listing_id: Uuid,
        candidate: &ListingCandidate,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StoreError> {
        let mut inner = self.inner.lock();
        let key = (candidate.source, candidate.source_id.clone());
        let known = inner.by_key.get(&key) == Some(&listing_id)
            || inner.by_alias.get(&key) == Some(&listing_id);
        inner.sight(listing_id, candidate, now, !known)
    }

    async fn get_listing(&self, id: Uuid) -> Result<Option<Listing>, StoreError> {
        Ok(self.inner.lock().listings.get(&id).cloned())
    }

    async fn find_similar(
        &self,
        company: &str,
        title: &str,
        location: &str,
    ) -> Result<Vec<Listing>, StoreError> {
        Ok(self
            .inner
            .lock()
            .listings
            .values()
            .filter(|l| l.company == company && l.title == title && l.location == location)
            .cloned()
            .collect())
    }

    async fn set_embedding(&self, id: Uuid, version: i32, embedding: &[f32]) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        match inner.listings.get_mut(&id) {
            Some(listing) if listing.version == version => {
                listing.embedding = Some(embedding.to_vec());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn fresh_listings(&self, since: DateTime<Utc>) -> Result<Vec<Listing>, StoreError> {
        Ok(self
            .inner
            .lock()
            .listings
            .values()
            .filter(|l| !l.stale && l.is_open && l.last_seen_at >= since)
            .cloned()
            .collect())
    }

    async fn mark_stale(&self, source: Source, older_than: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock();
        let mut marked = 0;
        for listing in inner.listings.values_mut() {
            if listing.source == source && !listing.stale && listing.last_seen_at < older_than {
                listing.stale = true;
                marked += 1;
            }
        }
        Ok(marked)
    }

    async fn unscored_listings(&self, since: DateTime<Utc>, limit: i64) -> Result<Vec<Listing>, StoreError> {
        let inner = self.inner.lock();
        let mut unscored: Vec<Listing> = inner
            .listings
            .values()
            .filter(|l| !l.stale && l.is_open && l.last_seen_at >= since)
            .filter(|l| inner.scored.get(&l.id) != Some(&l.version))
            .cloned()
            .collect();
        unscored.sort_by_key(|l| l.last_seen_at);
        unscored.truncate(limit.max(0) as usize);
        Ok(unscored)
    }

    async fn mark_scored(&self, id: Uuid, version: i32) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        match inner.listings.get(&id) {
            Some(listing) if listing.version == version => {
                inner.scored.insert(id, version);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl ProfileStore for MemoryStore {
    async fn active_profiles(&self) -> Result<Vec<UserProfile>, StoreError> {
        let mut profiles: Vec<UserProfile> = self
            .inner
            .lock()
            .profiles
            .values()
            .filter(|p| p.active)
            .cloned()
            .collect();
        profiles.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(profiles)
    }

    async fn get_profile(&self, id: &str) -> Result<Option<UserProfile>, StoreError> {
        Ok(self.inner.lock().profiles.get(id).cloned())
    }
}

#[async_trait]
impl IntentStore for MemoryStore {
    async fn intent_exists(&self, profile_id: &str, listing_id: Uuid) -> Result<bool, StoreError> {
        Ok(self
            .inner
            .lock()
            .intent_pairs
            .contains_key(&(profile_id.to_string(), listing_id)))
    }

    async fn create_intent(
        &self,
        intent: &ApplicationIntent,
    ) -> Result<Option<ApplicationIntent>, StoreError> {
        let mut inner = self.inner.lock();
        let pair = (intent.profile_id.clone(), intent.listing_id);
        if inner.intent_pairs.contains_key(&pair) {
            return Ok(None);
        }
        inner.intent_pairs.insert(pair, intent.id);
        inner.intents.insert(intent.id, intent.clone());
        Ok(Some(intent.clone()))
    }

    async fn get_intent(&self, id: Uuid) -> Result<Option<ApplicationIntent>, StoreError> {
        Ok(self.inner.lock().intents.get(&id).cloned())
    }

    async fn mark_dispatched(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let intent = inner
            .intents
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("intent {}", id)))?;
        intent.dispatched_at = Some(at);
        intent.updated_at = at;
        Ok(())
    }

    async fn undispatched_intents(&self, limit: i64) -> Result<Vec<ApplicationIntent>, StoreError> {
        let mut pending: Vec<ApplicationIntent> = self
            .inner
            .lock()
            .intents
            .values()
            .filter(|i| i.status == IntentStatus::Pending && i.dispatched_at.is_none())
            .cloned()
            .collect();
        pending.sort_by_key(|i| i.requested_at);
        pending.truncate(limit.max(0) as usize);
        Ok(pending)
    }

    async fn update_intent_status(
        &self,
        id: Uuid,
        status: IntentStatus,
        now: DateTime<Utc>,
    ) -> Result<IntentTransition, StoreError> {
        let mut inner = self.inner.lock();
        let Some(intent) = inner.intents.get_mut(&id) else {
            return Ok(IntentTransition::NotFound);
        };
        if intent.status.is_terminal() {
            return Ok(IntentTransition::AlreadyTerminal(intent.clone()));
        }
        intent.status = status;
        intent.updated_at = now;
        Ok(IntentTransition::Updated(intent.clone()))
    }
}

#[async_trait]
impl CursorStore for MemoryStore {
    async fn load_cursor(&self, source: Source, partition: &str) -> Result<Option<PageCursor>, StoreError> {
        Ok(self
            .inner
            .lock()
            .cursors
            .get(&(source, partition.to_string()))
            .cloned())
    }

    async fn save_cursor(&self, cursor: &PageCursor) -> Result<(), StoreError> {
        self.inner
            .lock()
            .cursors
            .insert((cursor.source, cursor.partition.clone()), cursor.clone());
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn health_check(&self) -> Result<bool, StoreError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn candidate(source: Source, source_id: &str, fingerprint: &str) -> ListingCandidate {
        ListingCandidate {
            source,
            source_id: source_id.to_string(),
            title: "Go Engineer".to_string(),
            company: "acme".to_string(),
            location: "berlin".to_string(),
            remote: false,
            salary_min: Some(100_000),
            salary_max: Some(120_000),
            description: "Build APIs".to_string(),
            posted_at: Utc::now(),
            posted_at_inferred: false,
            is_open: true,
            content_fingerprint: fingerprint.to_string(),
        }
    }

    #[tokio::test]
    async fn test_concurrent_upserts_create_one_listing() {
        let store = Arc::new(MemoryStore::new());
        let c = candidate(Source::Generic, "A1", "fp1");

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                let c = c.clone();
                tokio::spawn(async move { store.upsert_listing(&c, Utc::now()).await.unwrap() })
            })
            .collect();

        let mut news = 0;
        for handle in handles {
            if matches!(handle.await.unwrap().resolution, Resolution::New(_)) {
                news += 1;
            }
        }
        assert_eq!(news, 1);
        assert_eq!(store.listing_count(), 1);
    }

    #[tokio::test]
    async fn test_alias_is_recorded_for_cross_source_match() {
        let store = MemoryStore::new();
        let first = store
            .upsert_listing(&candidate(Source::Adzuna, "A1", "fp1"), Utc::now())
            .await
            .unwrap();
        let second = store
            .upsert_listing(&candidate(Source::Jooble, "J9", "fp1"), Utc::now())
            .await
            .unwrap();
        let third = store
            .upsert_listing(&candidate(Source::Jooble, "J9", "fp1"), Utc::now())
            .await
            .unwrap();

        let id = first.resolution.listing_id();
        assert_eq!(second.resolution, Resolution::Update(id));
        assert!(!second.material);
        assert_eq!(third.resolution, Resolution::Duplicate(id));
        assert_eq!(store.listing_count(), 1);
    }

    #[tokio::test]
    async fn test_terminal_intent_is_not_overwritten() {
        let store = MemoryStore::new();
        let intent = ApplicationIntent::pending("p1", Uuid::new_v4(), 0.9, Utc::now());
        store.create_intent(&intent).await.unwrap();

        let updated = store
            .update_intent_status(intent.id, IntentStatus::Submitted, Utc::now())
            .await
            .unwrap();
        assert!(matches!(updated, IntentTransition::Updated(ref i) if i.status == IntentStatus::Submitted));

        let again = store
            .update_intent_status(intent.id, IntentStatus::Failed, Utc::now())
            .await
            .unwrap();
        assert!(matches!(again, IntentTransition::AlreadyTerminal(ref i) if i.status == IntentStatus::Submitted));

        assert_eq!(
            store
                .update_intent_status(Uuid::new_v4(), IntentStatus::Failed, Utc::now())
                .await
                .unwrap(),
            IntentTransition::NotFound
        );
    }

    #[tokio::test]
    async fn test_mark_stale_only_touches_silent_listings_of_source() {
        let store = MemoryStore::new();
        let old = Utc::now() - chrono::Duration::days(10);
        store
            .upsert_listing(&candidate(Source::Adzuna, "A1", "fp1"), old)
            .await
            .unwrap();
        store
            .upsert_listing(&candidate(Source::Adzuna, "A2", "fp2"), Utc::now())
            .await
            .unwrap();
        store
            .upsert_listing(&candidate(Source::Remotive, "R1", "fp3"), old)
            .await
            .unwrap();

        let marked = store
            .mark_stale(Source::Adzuna, Utc::now() - chrono::Duration::days(7))
            .await
            .unwrap();
        assert_eq!(marked, 1);
        assert_eq!(store.fresh_listings(old).await.unwrap().len(), 2);
    }

    #[test]
    fn test_scored_marker_follows_listing_version() {
        let store = MemoryStore::new();
        let since = Utc::now() - chrono::Duration::days(1);
        let id = tokio_test::block_on(store.upsert_listing(&candidate(Source::Adzuna, "A1", "fp1"), Utc::now()))
            .unwrap()
            .resolution
            .listing_id();

        let unscored = tokio_test::block_on(store.unscored_listings(since, 10)).unwrap();
        assert_eq!(unscored.len(), 1);
        assert!(tokio_test::block_on(store.mark_scored(id, 1)).unwrap());
        assert!(tokio_test::block_on(store.unscored_listings(since, 10)).unwrap().is_empty());

        let mut changed = candidate(Source::Adzuna, "A1", "fp1");
        changed.description = "Build APIs and pipelines".to_string();
        let outcome = tokio_test::block_on(store.upsert_listing(&changed, Utc::now())).unwrap();
        assert!(outcome.material);

        // A stale marker never settles the newer version
        assert!(!tokio_test::block_on(store.mark_scored(id, 1)).unwrap());
        let unscored = tokio_test::block_on(store.unscored_listings(since, 10)).unwrap();
        assert_eq!(unscored.len(), 1);
        assert_eq!(unscored[0].version, 2);
    }

    #[test]
    fn test_alternating_sources_keep_listing_version() {
        let store = MemoryStore::new();
        let primary = candidate(Source::Adzuna, "A1", "fp1");
        let mut secondary = candidate(Source::Jooble, "J9", "fp1");
        secondary.salary_min = Some(90_000);
        secondary.salary_max = None;

        let id = tokio_test::block_on(store.upsert_listing(&primary, Utc::now()))
            .unwrap()
            .resolution
            .listing_id();
        for _ in 0..3 {
            tokio_test::block_on(store.upsert_listing(&secondary, Utc::now())).unwrap();
            tokio_test::block_on(store.upsert_listing(&primary, Utc::now())).unwrap();
        }

        let listing = tokio_test::block_on(store.get_listing(id)).unwrap().unwrap();
        assert_eq!(listing.version, 1);
        assert_eq!((listing.salary_min, listing.salary_max), (Some(100_000), Some(120_000)));
    }
}
