use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::domain::ExecutorOutcome;

/// Terminal outcome callback from the submission executor
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct IntentOutcomeRequest {
    pub outcome: ExecutorOutcome,
    #[validate(length(max = 512))]
    #[serde(default)]
    pub detail: Option<String>,
}

/// Request to trigger a run out of schedule
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct TriggerRunRequest {
    /// Optional deadline overriding the configured one
    #[validate(range(min = 1, max = 86400))]
    #[serde(default, rename = "deadlineSecs", alias = "deadline_secs")]
    pub deadline_secs: Option<u64>,
}
