// Model exports
pub mod domain;
pub mod requests;
pub mod responses;
pub mod run;

pub use domain::{
    ApplicationIntent, EligibilityDecision, ExecutorOutcome, IneligibleReason, IntentStatus, Listing,
    ListingCandidate, MatchScore, PageCursor, Resolution, ScoreBreakdown, ScoreComponent,
    ScoreComponentKind, ScoringWeights, SearchQuery, Source, UpsertOutcome, UserProfile,
};
pub use requests::{IntentOutcomeRequest, TriggerRunRequest};
pub use responses::{
    ErrorResponse, HealthResponse, IntentOutcomeResponse, ReevaluateResponse, RunAcceptedResponse, RunResponse,
};
pub use run::{EvaluationReport, FailureKind, PartitionReport, RunHealth, RunReport, RunStatus};
