//! Reconciles normalized candidates with the stored corpus.
//!
//! The classification rules live here as pure functions; the atomic
//! resolve-and-write is the store's job so concurrent workers cannot both
//! decide `New` for the same posting.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::core::text::{jaccard, tokenize};
use crate::models::{Listing, ListingCandidate, Resolution, UpsertOutcome};
use crate::services::store::{ListingStore, StoreError};

/// The candidate arrived under the listing's own (source, source_id)
pub fn is_primary_sighting(existing: &Listing, candidate: &ListingCandidate) -> bool {
    existing.source == candidate.source && existing.source_id == candidate.source_id
}

/// Salary range a sighting leaves on the listing
///
/// Only the primary source owns the salary. A sighting through an alias or
/// fingerprint fills it in when the listing has none, and never overwrites it.
pub fn sighted_salary(existing: &Listing, candidate: &ListingCandidate) -> (Option<i64>, Option<i64>) {
    let unknown = existing.salary_min.is_none() && existing.salary_max.is_none();
    if is_primary_sighting(existing, candidate) || unknown {
        (candidate.salary_min, candidate.salary_max)
    } else {
        (existing.salary_min, existing.salary_max)
    }
}

/// Salary, description or open status changed
pub fn mutable_fields_differ(existing: &Listing, candidate: &ListingCandidate) -> bool {
    (existing.salary_min, existing.salary_max) != sighted_salary(existing, candidate)
        || existing.description != candidate.description
        || existing.is_open != candidate.is_open
}

/// Apply a re-sighting to a stored listing; returns whether the version changed
///
/// Material changes bump `version` and drop the embedding, which was computed
/// from the old text.
pub fn apply_sighting(existing: &mut Listing, candidate: &ListingCandidate, now: DateTime<Utc>) -> bool {
    let material = mutable_fields_differ(existing, candidate);
    if material {
        let (salary_min, salary_max) = sighted_salary(existing, candidate);
        existing.salary_min = salary_min;
        existing.salary_max = salary_max;
        existing.description = candidate.description.clone();
        existing.is_open = candidate.is_open;
        existing.version += 1;
        existing.embedding = None;
    }
    existing.last_seen_at = now;
    existing.stale = false;
    material
}

/// Classify a sighting of an existing listing
///
/// `new_alias` marks a cross-source match under a previously unknown
/// (source, source_id); that is always an `Update` of the matched listing.
pub fn classify(listing_id: uuid::Uuid, material: bool, new_alias: bool) -> Resolution {
    if material || new_alias {
        Resolution::Update(listing_id)
    } else {
        Resolution::Duplicate(listing_id)
    }
}

/// Token-Jaccard similarity of two descriptions
pub fn description_similarity(a: &str, b: &str) -> f64 {
    jaccard(&tokenize(a), &tokenize(b))
}

/// Resolves candidates against the store
///
/// Exact matching (source key, alias, fingerprint) is always on. Setting
/// `similarity_threshold` below 1.0 additionally folds candidates into a stored
/// listing with the same company, title and location whose description is at
/// least that similar.
#[derive(Clone)]
pub struct Deduplicator {
    store: Arc<dyn ListingStore>,
    similarity_threshold: f64,
}

impl Deduplicator {
    pub fn new(store: Arc<dyn ListingStore>, similarity_threshold: f64) -> Self {
        Self {
            store,
            similarity_threshold,
        }
    }

    pub async fn resolve(
        &self,
        candidate: &ListingCandidate,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StoreError> {
        if self.similarity_threshold < 1.0 {
            if let Some(target) = self.near_duplicate(candidate).await? {
                tracing::debug!(
                    source = %candidate.source,
                    source_id = %candidate.source_id,
                    listing_id = %target,
                    "Folding near-duplicate candidate into existing listing"
                );
                return self.store.merge_into(target, candidate, now).await;
            }
        }

        self.store.upsert_listing(candidate, now).await
    }

    async fn near_duplicate(&self, candidate: &ListingCandidate) -> Result<Option<uuid::Uuid>, StoreError> {
        let similar = self
            .store
            .find_similar(&candidate.company, &candidate.title, &candidate.location)
            .await?;

        let exact_key = similar
            .iter()
            .any(|l| l.source == candidate.source && l.source_id == candidate.source_id);
        if exact_key {
            return Ok(None);
        }

        Ok(similar
            .iter()
            .map(|l| (l.id, description_similarity(&l.description, &candidate.description)))
            .filter(|(_, sim)| *sim >= self.similarity_threshold)
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(id, _)| id))
    }
}
