use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Upstream job boards the pipeline knows how to read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_source", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Adzuna,
    Remotive,
    Jooble,
    Generic,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Adzuna => "adzuna",
            Source::Remotive => "remotive",
            Source::Jooble => "jooble",
            Source::Generic => "generic",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "adzuna" => Ok(Source::Adzuna),
            "remotive" => Ok(Source::Remotive),
            "jooble" => Ok(Source::Jooble),
            "generic" => Ok(Source::Generic),
            other => Err(format!("unknown job source: {}", other)),
        }
    }
}

/// Normalized listing produced by the normalizer, not yet persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingCandidate {
    pub source: Source,
    pub source_id: String,
    pub title: String,
    pub company: String,
    pub location: String,
    pub remote: bool,
    pub salary_min: Option<i64>,
    pub salary_max: Option<i64>,
    pub description: String,
    pub posted_at: DateTime<Utc>,
    /// The record carried no usable date; `posted_at` is the ingestion time
    #[serde(default)]
    pub posted_at_inferred: bool,
    pub is_open: bool,
    pub content_fingerprint: String,
}

/// A stored job posting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub id: Uuid,
    pub source: Source,
    pub source_id: String,
    pub title: String,
    pub company: String,
    pub location: String,
    pub remote: bool,
    pub salary_min: Option<i64>,
    pub salary_max: Option<i64>,
    pub description: String,
    pub posted_at: DateTime<Utc>,
    pub is_open: bool,
    /// Fingerprint of the content at first sighting
    pub content_fingerprint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub version: i32,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub stale: bool,
}

impl Listing {
    /// Build the first stored version of a candidate
    pub fn from_candidate(candidate: &ListingCandidate, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: candidate.source,
            source_id: candidate.source_id.clone(),
            title: candidate.title.clone(),
            company: candidate.company.clone(),
            location: candidate.location.clone(),
            remote: candidate.remote,
            salary_min: candidate.salary_min,
            salary_max: candidate.salary_max,
            description: candidate.description.clone(),
            posted_at: candidate.posted_at,
            is_open: candidate.is_open,
            content_fingerprint: candidate.content_fingerprint.clone(),
            embedding: None,
            version: 1,
            first_seen_at: now,
            last_seen_at: now,
            stale: false,
        }
    }

    /// Seen within the freshness window and not closed or marked stale
    pub fn is_fresh(&self, now: DateTime<Utc>, window: Duration) -> bool {
        !self.stale && self.is_open && self.last_seen_at >= now - window
    }

    /// Text used for keyword matching and embeddings
    pub fn search_text(&self) -> String {
        format!("{}\n{}", self.title, self.description)
    }
}

/// Candidate profile, owned by the surrounding platform and read-only here
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub desired_titles: Vec<String>,
    #[serde(default)]
    pub desired_locations: Vec<String>,
    #[serde(default)]
    pub accepts_remote: bool,
    #[serde(default)]
    pub salary_floor: Option<i64>,
    pub auto_apply_threshold: f64,
    #[serde(default)]
    pub blacklisted_companies: Vec<String>,
    #[serde(default)]
    pub blacklisted_titles: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default = "default_true")]
    pub active: bool,
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreComponentKind {
    Skills,
    Title,
    Location,
    Salary,
    Semantic,
}

/// One component's share of a match score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreComponent {
    pub kind: ScoreComponentKind,
    pub value: f64,
    pub weight: f64,
    pub contribution: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub components: Vec<ScoreComponent>,
    pub matched_skills: Vec<String>,
    /// The semantic component was unavailable and its weight was redistributed
    pub embedding_fallback: bool,
}

impl ScoreBreakdown {
    pub fn component(&self, kind: ScoreComponentKind) -> Option<&ScoreComponent> {
        self.components.iter().find(|c| c.kind == kind)
    }
}

/// Derived match score, cached but never authoritative
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchScore {
    pub listing_id: Uuid,
    pub profile_id: String,
    pub score: f64,
    pub computed_at: DateTime<Utc>,
    pub breakdown: ScoreBreakdown,
    pub listing_version: i32,
    pub profile_updated_at: DateTime<Utc>,
}

impl MatchScore {
    /// Still valid for the given listing version and profile revision
    pub fn is_current_for(&self, listing: &Listing, profile: &UserProfile) -> bool {
        self.listing_version == listing.version && self.profile_updated_at == profile.updated_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "intent_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum IntentStatus {
    Pending,
    Submitted,
    Rejected,
    Failed,
}

impl IntentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, IntentStatus::Pending)
    }
}

/// Durable decision to submit an application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationIntent {
    pub id: Uuid,
    pub profile_id: String,
    pub listing_id: Uuid,
    pub decision_reason: String,
    pub score: f64,
    pub status: IntentStatus,
    pub requested_at: DateTime<Utc>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl ApplicationIntent {
    pub fn pending(profile_id: &str, listing_id: Uuid, score: f64, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            profile_id: profile_id.to_string(),
            listing_id,
            decision_reason: EligibilityDecision::Eligible.reason_code().to_string(),
            score,
            status: IntentStatus::Pending,
            requested_at: now,
            dispatched_at: None,
            updated_at: now,
        }
    }
}

/// Terminal outcome reported by the submission executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorOutcome {
    Succeeded,
    Failed,
    NeedsManualReview,
}

impl ExecutorOutcome {
    pub fn status(&self) -> IntentStatus {
        match self {
            ExecutorOutcome::Succeeded => IntentStatus::Submitted,
            ExecutorOutcome::Failed => IntentStatus::Failed,
            ExecutorOutcome::NeedsManualReview => IntentStatus::Rejected,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IneligibleReason {
    Blacklisted,
    AlreadyApplied,
    BelowThreshold,
    Expired,
}

/// Outcome of the eligibility gate for one (profile, listing) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EligibilityDecision {
    Eligible,
    Ineligible(IneligibleReason),
}

impl EligibilityDecision {
    pub fn reason_code(&self) -> &'static str {
        match self {
            EligibilityDecision::Eligible => "Eligible",
            EligibilityDecision::Ineligible(IneligibleReason::Blacklisted) => "Blacklisted",
            EligibilityDecision::Ineligible(IneligibleReason::AlreadyApplied) => "AlreadyApplied",
            EligibilityDecision::Ineligible(IneligibleReason::BelowThreshold) => "BelowThreshold",
            EligibilityDecision::Ineligible(IneligibleReason::Expired) => "Expired",
        }
    }

    pub fn is_eligible(&self) -> bool {
        matches!(self, EligibilityDecision::Eligible)
    }
}

/// How a candidate was reconciled with the stored corpus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    New(Uuid),
    Update(Uuid),
    Duplicate(Uuid),
}

impl Resolution {
    pub fn listing_id(&self) -> Uuid {
        match self {
            Resolution::New(id) | Resolution::Update(id) | Resolution::Duplicate(id) => *id,
        }
    }
}

/// Result of one atomic resolve-and-write
#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    pub resolution: Resolution,
    /// The stored version changed (new listing or mutable field update)
    pub material: bool,
    pub listing: Listing,
}

/// One query partition of a source search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub partition: String,
    pub keywords: String,
    pub location: Option<String>,
    pub posted_after: Option<DateTime<Utc>>,
}

/// Resume point for a (source, partition)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageCursor {
    pub source: Source,
    pub partition: String,
    pub next_page: u32,
    pub fetched_until: Option<DateTime<Utc>>,
}

impl PageCursor {
    pub fn start(source: Source, partition: &str) -> Self {
        Self {
            source,
            partition: partition.to_string(),
            next_page: 1,
            fetched_until: None,
        }
    }
}

/// Scoring weights, one per component
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub skills: f64,
    pub title: f64,
    pub location: f64,
    pub salary: f64,
    pub semantic: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            skills: 0.40,
            title: 0.20,
            location: 0.15,
            salary: 0.10,
            semantic: 0.15,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_round_trips_through_str() {
        for source in [Source::Adzuna, Source::Remotive, Source::Jooble, Source::Generic] {
            assert_eq!(source.as_str().parse::<Source>().unwrap(), source);
        }
        assert!("monster".parse::<Source>().is_err());
    }

    #[test]
    fn test_executor_outcome_maps_to_terminal_status() {
        assert_eq!(ExecutorOutcome::Succeeded.status(), IntentStatus::Submitted);
        assert_eq!(ExecutorOutcome::Failed.status(), IntentStatus::Failed);
        assert_eq!(ExecutorOutcome::NeedsManualReview.status(), IntentStatus::Rejected);
        assert!(!IntentStatus::Pending.is_terminal());
    }

    #[test]
    fn test_default_weights_sum_to_one() {
        let w = ScoringWeights::default();
        let sum = w.skills + w.title + w.location + w.salary + w.semantic;
        assert!((sum - 1.0).abs() < 1e-9);
    }
}
