//! Auto-apply gate for a scored (profile, listing) pair.
//!
//! Rules run in a fixed order and the first failing rule names the reason:
//! blacklist, existing intent, score threshold, freshness. A listing that is
//! both blacklisted and expired therefore reports `Blacklisted`.

use chrono::{DateTime, Duration, Utc};

use crate::core::filters::is_blacklisted;
use crate::models::{EligibilityDecision, IneligibleReason, Listing, UserProfile};

/// Everything the gate looks at; no I/O happens here
#[derive(Debug, Clone, Copy)]
pub struct EligibilityInput<'a> {
    pub listing: &'a Listing,
    pub profile: &'a UserProfile,
    pub score: f64,
    pub already_applied: bool,
    pub now: DateTime<Utc>,
    pub freshness_window: Duration,
}

pub fn evaluate(input: &EligibilityInput<'_>) -> EligibilityDecision {
    if is_blacklisted(input.listing, input.profile) {
        return EligibilityDecision::Ineligible(IneligibleReason::Blacklisted);
    }
    if input.already_applied {
        return EligibilityDecision::Ineligible(IneligibleReason::AlreadyApplied);
    }
    if input.score < input.profile.auto_apply_threshold {
        return EligibilityDecision::Ineligible(IneligibleReason::BelowThreshold);
    }
    if !input.listing.is_fresh(input.now, input.freshness_window) {
        return EligibilityDecision::Ineligible(IneligibleReason::Expired);
    }
    EligibilityDecision::Eligible
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Source;
    use uuid::Uuid;

    fn listing(company: &str, last_seen_hours_ago: i64) -> Listing {
        let now = Utc::now();
        Listing {
            id: Uuid::new_v4(),
            source: Source::Generic,
            source_id: "A1".to_string(),
            title: "Senior Go Engineer".to_string(),
            company: company.to_string(),
            location: "berlin".to_string(),
            remote: false,
            salary_min: None,
            salary_max: None,
            description: String::new(),
            posted_at: now,
            is_open: true,
            content_fingerprint: "fp".to_string(),
            embedding: None,
            version: 1,
            first_seen_at: now - Duration::hours(last_seen_hours_ago),
            last_seen_at: now - Duration::hours(last_seen_hours_ago),
            stale: false,
        }
    }

    fn profile() -> UserProfile {
        UserProfile {
            id: "p1".to_string(),
            skills: vec![],
            desired_titles: vec![],
            desired_locations: vec![],
            accepts_remote: false,
            salary_floor: None,
            auto_apply_threshold: 0.8,
            blacklisted_companies: vec!["globex".to_string()],
            blacklisted_titles: vec![],
            embedding: None,
            active: true,
            updated_at: Utc::now(),
        }
    }

    fn decide(listing: &Listing, score: f64, already_applied: bool) -> EligibilityDecision {
        let p = profile();
        evaluate(&EligibilityInput {
            listing,
            profile: &p,
            score,
            already_applied,
            now: Utc::now(),
            freshness_window: Duration::hours(24),
        })
    }

    #[test]
    fn test_eligible_above_threshold() {
        assert_eq!(decide(&listing("acme", 1), 0.82, false), EligibilityDecision::Eligible);
        assert_eq!(decide(&listing("acme", 1), 0.8, false), EligibilityDecision::Eligible);
    }

    #[test]
    fn test_blacklist_wins_even_at_perfect_score() {
        assert_eq!(
            decide(&listing("globex", 1), 1.0, false),
            EligibilityDecision::Ineligible(IneligibleReason::Blacklisted)
        );
        // Blacklisted beats expired and already-applied
        assert_eq!(
            decide(&listing("globex", 100), 1.0, true),
            EligibilityDecision::Ineligible(IneligibleReason::Blacklisted)
        );
    }

    #[test]
    fn test_rule_order() {
        assert_eq!(
            decide(&listing("acme", 100), 0.1, true),
            EligibilityDecision::Ineligible(IneligibleReason::AlreadyApplied)
        );
        assert_eq!(
            decide(&listing("acme", 100), 0.1, false),
            EligibilityDecision::Ineligible(IneligibleReason::BelowThreshold)
        );
        assert_eq!(
            decide(&listing("acme", 100), 0.9, false),
            EligibilityDecision::Ineligible(IneligibleReason::Expired)
        );
    }

    #[test]
    fn test_closed_or_stale_listing_is_expired() {
        let mut closed = listing("acme", 1);
        closed.is_open = false;
        assert_eq!(
            decide(&closed, 0.9, false),
            EligibilityDecision::Ineligible(IneligibleReason::Expired)
        );

        let mut stale = listing("acme", 1);
        stale.stale = true;
        assert_eq!(
            decide(&stale, 0.9, false),
            EligibilityDecision::Ineligible(IneligibleReason::Expired)
        );
    }
}
