use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::models::domain::{EligibilityDecision, Source};

/// Failure class attributed to the smallest failing unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Retries exhausted on rate limits, 5xx or timeouts
    UpstreamUnavailable,
    /// Deferred to the next run; the required wait exceeded its bound
    RateLimited,
    /// Credentials rejected, source halted for the run
    Unauthorized,
    /// The source circuit breaker refused the call
    CircuitOpen,
    /// A page could not be parsed
    MalformedResponse,
    /// The source was halted by another partition
    SourceHalted,
    /// The listing store failed
    Store,
    /// Run deadline or shutdown
    Cancelled,
}

/// Counters for one (source, partition)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionReport {
    pub source: Source,
    pub partition: String,
    pub pages: u32,
    pub records: u64,
    pub dropped: u64,
    pub new: u64,
    pub updated: u64,
    pub duplicates: u64,
    pub failure: Option<FailureKind>,
}

impl PartitionReport {
    pub fn new(source: Source, partition: &str) -> Self {
        Self {
            source,
            partition: partition.to_string(),
            pages: 0,
            records: 0,
            dropped: 0,
            new: 0,
            updated: 0,
            duplicates: 0,
            failure: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

/// Counters for the scoring and eligibility stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub listings: u64,
    pub pairs_scored: u64,
    pub cached_scores: u64,
    pub embedding_fallbacks: u64,
    pub prefiltered: u64,
    pub decisions: BTreeMap<String, u64>,
    pub intents_created: u64,
    pub intents_dispatched: u64,
    pub dispatch_failures: u64,
    pub store_errors: u64,
}

impl EvaluationReport {
    pub fn record_decision(&mut self, decision: EligibilityDecision) {
        *self
            .decisions
            .entry(decision.reason_code().to_string())
            .or_insert(0) += 1;
    }

    pub fn merge(&mut self, other: EvaluationReport) {
        self.listings += other.listings;
        self.pairs_scored += other.pairs_scored;
        self.cached_scores += other.cached_scores;
        self.embedding_fallbacks += other.embedding_fallbacks;
        self.prefiltered += other.prefiltered;
        for (reason, count) in other.decisions {
            *self.decisions.entry(reason).or_insert(0) += count;
        }
        self.intents_created += other.intents_created;
        self.intents_dispatched += other.intents_dispatched;
        self.dispatch_failures += other.dispatch_failures;
        self.store_errors += other.store_errors;
    }
}

/// Summary of one scheduled run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub partitions: Vec<PartitionReport>,
    pub evaluation: EvaluationReport,
    pub stale_marked: u64,
    pub redispatched: u64,
    /// Listings left unscored by earlier runs and queued again
    pub requeued: u64,
    pub cancelled: bool,
}

impl RunReport {
    pub fn failed_partitions(&self) -> usize {
        self.partitions.iter().filter(|p| !p.succeeded()).count()
    }

    /// Aggregate health, counts only
    pub fn health(&self) -> RunHealth {
        let failed = self.failed_partitions();
        let status = if self.cancelled {
            RunStatus::Cancelled
        } else if failed == 0 {
            RunStatus::Healthy
        } else if failed < self.partitions.len() {
            RunStatus::Degraded
        } else {
            RunStatus::Failed
        };

        let mut failures: BTreeMap<String, u64> = BTreeMap::new();
        for kind in self.partitions.iter().filter_map(|p| p.failure) {
            let key = serde_json::to_value(kind)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            *failures.entry(key).or_insert(0) += 1;
        }

        RunHealth {
            run_id: self.run_id,
            status,
            started_at: self.started_at,
            finished_at: self.finished_at,
            partitions_total: self.partitions.len(),
            partitions_failed: failed,
            failures,
            listings_new: self.partitions.iter().map(|p| p.new).sum(),
            listings_updated: self.partitions.iter().map(|p| p.updated).sum(),
            records_dropped: self.partitions.iter().map(|p| p.dropped).sum(),
            intents_created: self.evaluation.intents_created,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Healthy,
    Degraded,
    Failed,
    Cancelled,
}

/// Operator-facing run health, never carries upstream error text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunHealth {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub partitions_total: usize,
    pub partitions_failed: usize,
    pub failures: BTreeMap<String, u64>,
    pub listings_new: u64,
    pub listings_updated: u64,
    pub records_dropped: u64,
    pub intents_created: u64,
}
