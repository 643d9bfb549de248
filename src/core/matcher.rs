use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::core::scoring::calculate_match_score;
use crate::models::{Listing, MatchScore, ScoringWeights, UserProfile};
use crate::services::cache::ScoreCache;

/// A score and whether it came from the cache
#[derive(Debug, Clone)]
pub struct ScoredPair {
    pub score: MatchScore,
    pub cached: bool,
}

/// Scoring engine for (listing, profile) pairs
///
/// Scores are recomputed only when the listing version or the profile
/// revision moved since the cached score was computed.
#[derive(Clone)]
pub struct Matcher {
    weights: ScoringWeights,
    cache: Option<Arc<ScoreCache>>,
}

impl Matcher {
    pub fn new(weights: ScoringWeights) -> Self {
        Self { weights, cache: None }
    }

    pub fn with_default_weights() -> Self {
        Self::new(ScoringWeights::default())
    }

    pub fn with_cache(mut self, cache: Arc<ScoreCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    /// Score a pair from scratch
    pub fn compute(&self, listing: &Listing, profile: &UserProfile, now: DateTime<Utc>) -> MatchScore {
        let (score, breakdown) = calculate_match_score(listing, profile, &self.weights);

        MatchScore {
            listing_id: listing.id,
            profile_id: profile.id.clone(),
            score,
            computed_at: now,
            breakdown,
            listing_version: listing.version,
            profile_updated_at: profile.updated_at,
        }
    }

    /// Score a pair, reusing a still-current cached score
    pub async fn score(&self, listing: &Listing, profile: &UserProfile, now: DateTime<Utc>) -> ScoredPair {
        let Some(cache) = &self.cache else {
            return ScoredPair {
                score: self.compute(listing, profile, now),
                cached: false,
            };
        };

        if let Some(cached) = cache.get(listing.id, &profile.id).await {
            if cached.is_current_for(listing, profile) {
                return ScoredPair {
                    score: cached,
                    cached: true,
                };
            }
        }

        let score = self.compute(listing, profile, now);
        cache.put(&score).await;
        ScoredPair { score, cached: false }
    }

    /// Score many listings for one profile, best first
    pub fn rank<'a>(
        &self,
        listings: &'a [Listing],
        profile: &UserProfile,
        now: DateTime<Utc>,
    ) -> Vec<(&'a Listing, MatchScore)> {
        let mut scored: Vec<(&Listing, MatchScore)> = listings
            .iter()
            .map(|listing| (listing, self.compute(listing, profile, now)))
            .collect();

        scored.sort_by(|a, b| {
            b.1.score
                .partial_cmp(&a.1.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored
    }
}
