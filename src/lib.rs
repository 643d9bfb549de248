//! Job Ingest - job listing ingestion and auto-apply eligibility service
//!
//! Pulls listings from rate-limited upstream job boards, normalizes and
//! deduplicates them into one corpus, scores them against user profiles and
//! records durable application intents for the pairs that clear every gate.

pub mod config;
pub mod core;
pub mod models;
pub mod pipeline;
pub mod routes;
pub mod services;

// Re-export commonly used types
pub use core::{calculate_match_score, content_fingerprint, Matcher, Normalizer};
pub use models::{ApplicationIntent, EligibilityDecision, Listing, ListingCandidate, RunReport, UserProfile};
pub use pipeline::{Orchestrator, PipelineError, RunCoordinator};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_exports() {
        let a = content_fingerprint("Rust Engineer", "acme", "berlin", "Build services");
        let b = content_fingerprint("rust  engineer", "acme", "berlin", "build services");
        assert_eq!(a, b);
    }
}
