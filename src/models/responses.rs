use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::domain::IntentStatus;
use crate::models::run::RunHealth;

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub status_code: u16,
}

/// Intent status after applying an executor callback
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentOutcomeResponse {
    pub intent_id: Uuid,
    pub status: IntentStatus,
    /// False when the intent was already terminal and the callback was ignored
    pub applied: bool,
}

/// Response for the run trigger and latest-run endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResponse {
    pub health: RunHealth,
}

/// Response for an explicit profile re-evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReevaluateResponse {
    pub profile_id: String,
    pub listings_considered: u64,
    pub intents_created: u64,
}

/// Response when a run was started in the background
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunAcceptedResponse {
    pub status: String,
    pub message: String,
}
