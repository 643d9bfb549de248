//! Per-pair scoring, eligibility and intent hand-off.

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::core::eligibility::{evaluate, EligibilityInput};
use crate::core::filters::plausibly_matches;
use crate::models::{
    ApplicationIntent, EligibilityDecision, EvaluationReport, IneligibleReason, IntentStatus, Listing,
    MatchScore, UserProfile,
};
use crate::pipeline::Orchestrator;
use crate::services::store::{IntentStore, ListingStore, StoreError};

/// What happened to an intent handed to the executor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Accepted,
    /// The executor refused; the intent is closed as rejected
    Refused,
    /// Executor unreachable; stays pending and is retried next run
    Failed,
    /// No executor configured
    Skipped,
}

/// Where one (profile, listing) pair ended up
#[derive(Debug, Clone)]
pub enum PairOutcome {
    /// Basic title/location filters ruled the pair out before scoring
    Prefiltered,
    Scored {
        score: MatchScore,
        cached: bool,
        decision: EligibilityDecision,
    },
    IntentCreated {
        score: MatchScore,
        cached: bool,
        intent: ApplicationIntent,
        dispatch: Dispatch,
    },
}

impl EvaluationReport {
    pub fn record_pair(&mut self, outcome: &PairOutcome) {
        let (score, cached) = match outcome {
            PairOutcome::Prefiltered => {
                self.prefiltered += 1;
                return;
            }
            PairOutcome::Scored {
                score,
                cached,
                decision,
            } => {
                self.record_decision(*decision);
                (score, *cached)
            }
            PairOutcome::IntentCreated {
                score,
                cached,
                dispatch,
                ..
            } => {
                self.record_decision(EligibilityDecision::Eligible);
                self.intents_created += 1;
                match dispatch {
                    Dispatch::Accepted => self.intents_dispatched += 1,
                    Dispatch::Failed => self.dispatch_failures += 1,
                    Dispatch::Refused | Dispatch::Skipped => {}
                }
                (score, *cached)
            }
        };

        self.pairs_scored += 1;
        if cached {
            self.cached_scores += 1;
        }
        if score.breakdown.embedding_fallback {
            self.embedding_fallbacks += 1;
        }
    }
}

impl Orchestrator {
    /// Score one listing against every profile
    pub(crate) async fn evaluate_listing(
        &self,
        listing: Listing,
        profiles: &[UserProfile],
        cancel: &CancellationToken,
    ) -> EvaluationReport {
        let mut report = EvaluationReport {
            listings: 1,
            ..EvaluationReport::default()
        };
        if cancel.is_cancelled() {
            return report;
        }

        let listing = self.ensure_embedding(listing, cancel).await;
        let now = Utc::now();

        for profile in profiles {
            if cancel.is_cancelled() {
                break;
            }
            match self.evaluate_pair(&listing, profile, now).await {
                Ok(outcome) => report.record_pair(&outcome),
                Err(e) => {
                    tracing::error!(
                        listing_id = %listing.id,
                        profile_id = %profile.id,
                        error = %e,
                        "Store error while evaluating pair"
                    );
                    report.store_errors += 1;
                }
            }
        }

        report
    }

    /// Evaluate a listing for the run and record that its version is settled
    ///
    /// A listing is settled only when every profile was evaluated without a
    /// store error and the run was not cancelled; anything less leaves it for
    /// the next run's backlog.
    pub(crate) async fn evaluate_and_settle(
        &self,
        listing: Listing,
        profiles: &[UserProfile],
        settle: bool,
        cancel: &CancellationToken,
    ) -> EvaluationReport {
        let (listing_id, version) = (listing.id, listing.version);
        let report = self.evaluate_listing(listing, profiles, cancel).await;

        if settle && report.store_errors == 0 && !cancel.is_cancelled() {
            match self.store.mark_scored(listing_id, version).await {
                Ok(true) => {}
                Ok(false) => tracing::debug!(
                    %listing_id,
                    version,
                    "Listing changed while being scored, left for the backlog"
                ),
                Err(e) => tracing::warn!(%listing_id, error = %e, "Failed to record scored listing"),
            }
        }
        report
    }

    /// Prefilter, score, gate and, when eligible, create and dispatch the intent
    pub async fn evaluate_pair(
        &self,
        listing: &Listing,
        profile: &UserProfile,
        now: DateTime<Utc>,
    ) -> Result<PairOutcome, StoreError> {
        if !plausibly_matches(listing, profile) {
            return Ok(PairOutcome::Prefiltered);
        }

        let scored = self.matcher.score(listing, profile, now).await;
        let already_applied = self.store.intent_exists(&profile.id, listing.id).await?;

        let decision = evaluate(&EligibilityInput {
            listing,
            profile,
            score: scored.score.score,
            already_applied,
            now,
            freshness_window: self.config.freshness_window,
        });

        if !decision.is_eligible() {
            tracing::trace!(
                listing_id = %listing.id,
                profile_id = %profile.id,
                score = scored.score.score,
                reason = decision.reason_code(),
                "Pair not eligible"
            );
            return Ok(PairOutcome::Scored {
                score: scored.score,
                cached: scored.cached,
                decision,
            });
        }

        let pending = ApplicationIntent::pending(&profile.id, listing.id, scored.score.score, now);
        let Some(intent) = self.store.create_intent(&pending).await? else {
            // Another worker created the intent between the check and the insert
            return Ok(PairOutcome::Scored {
                score: scored.score,
                cached: scored.cached,
                decision: EligibilityDecision::Ineligible(IneligibleReason::AlreadyApplied),
            });
        };

        tracing::info!(
            intent_id = %intent.id,
            listing_id = %listing.id,
            profile_id = %profile.id,
            score = intent.score,
            "Application intent created"
        );

        let dispatch = self.dispatch(&intent).await;
        Ok(PairOutcome::IntentCreated {
            score: scored.score,
            cached: scored.cached,
            intent,
            dispatch,
        })
    }

    /// Hand an intent to the executor
    pub(crate) async fn dispatch(&self, intent: &ApplicationIntent) -> Dispatch {
        let Some(executor) = &self.executor else {
            return Dispatch::Skipped;
        };

        match executor.submit(intent).await {
            Ok(true) => match self.store.mark_dispatched(intent.id, Utc::now()).await {
                Ok(()) => Dispatch::Accepted,
                Err(e) => {
                    tracing::error!(intent_id = %intent.id, error = %e, "Failed to record dispatch");
                    Dispatch::Failed
                }
            },
            Ok(false) => {
                tracing::info!(intent_id = %intent.id, "Executor refused intent");
                if let Err(e) = self
                    .store
                    .update_intent_status(intent.id, IntentStatus::Rejected, Utc::now())
                    .await
                {
                    tracing::error!(intent_id = %intent.id, error = %e, "Failed to close refused intent");
                }
                Dispatch::Refused
            }
            Err(e) => {
                tracing::warn!(
                    intent_id = %intent.id,
                    error = %e,
                    "Executor unavailable, intent left pending for the next run"
                );
                Dispatch::Failed
            }
        }
    }

    /// Attach a listing embedding, computing and persisting it once per version
    pub(crate) async fn ensure_embedding(&self, mut listing: Listing, cancel: &CancellationToken) -> Listing {
        let Some(embedder) = &self.embedder else {
            return listing;
        };
        if listing.embedding.is_some() {
            return listing;
        }

        let text = listing.search_text();
        let result = tokio::select! {
            _ = cancel.cancelled() => return listing,
            result = embedder.embed(&text) => result,
        };

        match result {
            Ok(vector) => {
                match self.store.set_embedding(listing.id, listing.version, &vector).await {
                    Ok(false) => tracing::debug!(
                        listing_id = %listing.id,
                        version = listing.version,
                        "Listing changed before its embedding was stored"
                    ),
                    Ok(true) => {}
                    Err(e) => tracing::warn!(listing_id = %listing.id, error = %e, "Failed to store embedding"),
                }
                listing.embedding = Some(vector);
            }
            Err(e) => {
                tracing::warn!(
                    listing_id = %listing.id,
                    error = %e,
                    "Embedding unavailable, falling back to heuristic scoring"
                );
            }
        }

        listing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScoreBreakdown;
    use uuid::Uuid;

    fn score(fallback: bool) -> MatchScore {
        MatchScore {
            listing_id: Uuid::new_v4(),
            profile_id: "p1".to_string(),
            score: 0.9,
            computed_at: Utc::now(),
            breakdown: ScoreBreakdown {
                embedding_fallback: fallback,
                ..ScoreBreakdown::default()
            },
            listing_version: 1,
            profile_updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_record_pair_counts() {
        let mut report = EvaluationReport::default();
        report.record_pair(&PairOutcome::Prefiltered);
        report.record_pair(&PairOutcome::Scored {
            score: score(true),
            cached: true,
            decision: EligibilityDecision::Ineligible(IneligibleReason::BelowThreshold),
        });
        report.record_pair(&PairOutcome::IntentCreated {
            score: score(false),
            cached: false,
            intent: ApplicationIntent::pending("p1", Uuid::new_v4(), 0.9, Utc::now()),
            dispatch: Dispatch::Failed,
        });

        assert_eq!(report.prefiltered, 1);
        assert_eq!(report.pairs_scored, 2);
        assert_eq!(report.cached_scores, 1);
        assert_eq!(report.embedding_fallbacks, 1);
        assert_eq!(report.intents_created, 1);
        assert_eq!(report.dispatch_failures, 1);
        assert_eq!(report.decisions.get("Eligible"), Some(&1));
        assert_eq!(report.decisions.get("BelowThreshold"), Some(&1));
    }
}
