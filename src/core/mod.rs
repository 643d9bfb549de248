// Core algorithm exports
pub mod dedup;
pub mod eligibility;
pub mod filters;
pub mod matcher;
pub mod normalizer;
pub mod scoring;
pub mod text;

pub use dedup::Deduplicator;
pub use eligibility::{evaluate, EligibilityInput};
pub use filters::{is_blacklisted, plausibly_matches};
pub use matcher::{Matcher, ScoredPair};
pub use normalizer::{content_fingerprint, CurrencyTable, DropReason, Normalizer, SourceSchema};
pub use scoring::calculate_match_score;
