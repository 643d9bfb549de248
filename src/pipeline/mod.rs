//! One ingestion run: fetch, normalize, dedup, score, decide, dispatch.
//!
//! Partitions are fetched by a bounded pool and feed a bounded channel that
//! the scoring pool drains. Workers share nothing but the store; every
//! cross-worker guarantee comes from its constrained writes.

pub mod coordinator;
pub mod evaluation;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::PipelineSettings;
use crate::core::{Deduplicator, Matcher, Normalizer};
use crate::models::{
    EvaluationReport, ExecutorOutcome, FailureKind, Listing, PageCursor, PartitionReport, Resolution,
    RunReport, SearchQuery, Source, UserProfile,
};
use crate::services::embedding::Embedder;
use crate::services::store::{
    CursorStore, IntentStore, IntentTransition, ListingStore, ProfileStore, Store, StoreError,
};
use crate::services::submission::SubmissionExecutor;
use crate::services::upstream::{UpstreamClient, UpstreamError};

pub use coordinator::{RunCoordinator, RunPermit};
pub use evaluation::{Dispatch, PairOutcome};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    #[error("Intent not found: {0}")]
    IntentNotFound(Uuid),

    #[error("A run is already in progress")]
    RunInProgress,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub fetch_workers: usize,
    pub score_workers: usize,
    pub channel_capacity: usize,
    pub freshness_window: chrono::Duration,
    pub stale_after: chrono::Duration,
    pub run_deadline: Option<Duration>,
    pub redispatch_limit: i64,
    pub redispatch_grace: chrono::Duration,
    pub rescore_limit: i64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from(&PipelineSettings::default())
    }
}

impl From<&PipelineSettings> for PipelineConfig {
    fn from(settings: &PipelineSettings) -> Self {
        Self {
            fetch_workers: settings.fetch_workers.max(1),
            score_workers: settings.score_workers.max(1),
            channel_capacity: settings.channel_capacity.max(1),
            freshness_window: chrono::Duration::hours(settings.freshness_window_hours),
            stale_after: chrono::Duration::hours(settings.stale_after_hours),
            run_deadline: settings.run_deadline_secs.map(Duration::from_secs),
            redispatch_limit: settings.redispatch_limit,
            redispatch_grace: chrono::Duration::seconds(settings.redispatch_grace_secs as i64),
            rescore_limit: settings.rescore_limit,
        }
    }
}

/// A source client and the query partitions it serves
pub struct SourcePlan {
    pub client: Arc<UpstreamClient>,
    pub partitions: Vec<SearchQuery>,
}

pub struct Orchestrator {
    store: Arc<dyn Store>,
    sources: Vec<SourcePlan>,
    normalizer: Normalizer,
    dedup: Deduplicator,
    matcher: Matcher,
    embedder: Option<Arc<dyn Embedder>>,
    executor: Option<Arc<dyn SubmissionExecutor>>,
    config: PipelineConfig,
}

impl Orchestrator {
    pub fn new<S: Store + 'static>(
        store: Arc<S>,
        normalizer: Normalizer,
        matcher: Matcher,
        similarity_threshold: f64,
        config: PipelineConfig,
    ) -> Self {
        let listings: Arc<dyn ListingStore> = store.clone();
        Self {
            store,
            sources: Vec::new(),
            normalizer,
            dedup: Deduplicator::new(listings, similarity_threshold),
            matcher,
            embedder: None,
            executor: None,
            config,
        }
    }

    pub fn with_source(mut self, plan: SourcePlan) -> Self {
        self.sources.push(plan);
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn SubmissionExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Execute one run
    ///
    /// Cancelling `cancel`, or hitting the deadline, stops new fetches and
    /// scoring; work already written stays written.
    pub async fn run(&self, cancel: &CancellationToken, deadline: Option<Duration>) -> RunReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let run_cancel = cancel.child_token();

        let timer = deadline.or(self.config.run_deadline).map(|limit| {
            let token = run_cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                tracing::warn!(deadline_secs = limit.as_secs(), "Run deadline reached, cancelling");
                token.cancel();
            })
        });

        tracing::info!(
            %run_id,
            sources = self.sources.len(),
            "Starting ingestion run"
        );

        for plan in &self.sources {
            plan.client.begin_run();
        }

        let redispatched = self.redispatch_pending(&run_cancel).await;

        let profiles = match self.store.active_profiles().await {
            Ok(profiles) => Some(profiles),
            Err(e) => {
                tracing::error!(%run_id, error = %e, "Failed to load profiles, scoring skipped");
                None
            }
        };

        // Without the profile set nothing can be settled; the backlog waits
        let settle = profiles.is_some();
        let backlog = if settle { self.scoring_backlog().await } else { Vec::new() };
        let requeued = backlog.len() as u64;
        let profiles = profiles.unwrap_or_default();

        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        let requeue = {
            let tx = tx.clone();
            let cancel = &run_cancel;
            async move { self.forward(&tx, backlog, cancel).await }
        };
        let (_, partitions, evaluation) = tokio::join!(
            requeue,
            self.ingest_all(tx, &run_cancel),
            self.evaluate_channel(rx, &profiles, settle, &run_cancel),
        );

        let cancelled = run_cancel.is_cancelled();
        let stale_marked = if cancelled {
            0
        } else {
            self.mark_stale_sources(&partitions).await
        };

        if let Some(timer) = timer {
            timer.abort();
        }

        let report = RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            partitions,
            evaluation,
            stale_marked,
            redispatched,
            requeued,
            cancelled,
        };

        let health = report.health();
        tracing::info!(
            %run_id,
            status = ?health.status,
            partitions = health.partitions_total,
            failed = health.partitions_failed,
            new = health.listings_new,
            updated = health.listings_updated,
            intents = health.intents_created,
            "Ingestion run finished"
        );

        report
    }

    async fn ingest_all(&self, tx: mpsc::Sender<Listing>, cancel: &CancellationToken) -> Vec<PartitionReport> {
        let jobs: Vec<(&SourcePlan, &SearchQuery)> = self
            .sources
            .iter()
            .flat_map(|plan| plan.partitions.iter().map(move |query| (plan, query)))
            .collect();

        stream::iter(jobs)
            .map(|(plan, query)| self.ingest_partition(plan, query.clone(), tx.clone(), cancel))
            .buffer_unordered(self.config.fetch_workers)
            .collect()
            .await
    }

    /// Fetch one partition from its cursor, upserting page by page
    async fn ingest_partition(
        &self,
        plan: &SourcePlan,
        mut query: SearchQuery,
        tx: mpsc::Sender<Listing>,
        cancel: &CancellationToken,
    ) -> PartitionReport {
        let client = &plan.client;
        let source = client.source();
        let mut report = PartitionReport::new(source, &query.partition);

        if client.is_halted() {
            report.failure = Some(FailureKind::SourceHalted);
            return report;
        }

        let mut cursor = match self.store.load_cursor(source, &query.partition).await {
            Ok(cursor) => cursor.unwrap_or_else(|| PageCursor::start(source, &query.partition)),
            Err(e) => {
                tracing::error!(%source, partition = %query.partition, error = %e, "Failed to load cursor");
                report.failure = Some(FailureKind::Store);
                return report;
            }
        };
        query.posted_after = cursor.fetched_until;
        let mut newest = cursor.fetched_until;

        let pages = client.pages(query.clone(), cursor.next_page, cancel.clone());
        futures::pin_mut!(pages);

        while let Some(result) = pages.next().await {
            let page = match result {
                Ok(page) => page,
                Err(e) => {
                    self.record_fetch_failure(client, &query, &e);
                    report.failure = Some(e.failure_kind());
                    break;
                }
            };

            let now = Utc::now();
            let (candidates, dropped) = self.normalizer.normalize_page(source, &page.records, now);
            report.pages += 1;
            report.records += page.records.len() as u64;
            report.dropped += dropped;

            let mut forward = Vec::new();
            let mut store_failed = false;
            for candidate in &candidates {
                // Only dates the upstream reported move the incremental cursor
                if !candidate.posted_at_inferred {
                    newest = newest.max(Some(candidate.posted_at.min(now)));
                }
                match self.dedup.resolve(candidate, now).await {
                    Ok(outcome) => match outcome.resolution {
                        Resolution::New(_) => {
                            report.new += 1;
                            forward.push(outcome.listing);
                        }
                        Resolution::Update(_) => {
                            report.updated += 1;
                            if outcome.material {
                                forward.push(outcome.listing);
                            }
                        }
                        Resolution::Duplicate(_) => report.duplicates += 1,
                    },
                    Err(e) => {
                        tracing::error!(
                            %source,
                            partition = %query.partition,
                            source_id = %candidate.source_id,
                            error = %e,
                            "Failed to upsert listing"
                        );
                        store_failed = true;
                        break;
                    }
                }
            }
            if store_failed {
                report.failure = Some(FailureKind::Store);
                break;
            }

            if page.has_more {
                cursor.next_page = page.number + 1;
            } else {
                // Full pass complete; the next one only asks for newer postings
                cursor.next_page = 1;
                cursor.fetched_until = newest;
            }
            if let Err(e) = self.store.save_cursor(&cursor).await {
                tracing::error!(%source, partition = %query.partition, error = %e, "Failed to save cursor");
                report.failure = Some(FailureKind::Store);
                break;
            }

            tracing::debug!(
                %source,
                partition = %query.partition,
                page = page.number,
                records = page.records.len(),
                forwarded = forward.len(),
                "Page ingested"
            );

            if !self.forward(&tx, forward, cancel).await {
                report.failure = Some(FailureKind::Cancelled);
                break;
            }
        }

        if report.failure.is_none() && cancel.is_cancelled() {
            report.failure = Some(FailureKind::Cancelled);
        }
        report
    }

    fn record_fetch_failure(&self, client: &UpstreamClient, query: &SearchQuery, error: &UpstreamError) {
        let source = client.source();
        match error {
            UpstreamError::Cancelled | UpstreamError::Halted => {
                tracing::debug!(%source, partition = %query.partition, error = %error, "Partition stopped");
            }
            UpstreamError::Unauthorized => {
                tracing::error!(%source, "Upstream rejected credentials, source halted for this run");
            }
            _ => {
                tracing::warn!(%source, partition = %query.partition, error = %error, "Partition failed");
            }
        }

        if client.breaker_exhausted() && !client.is_halted() {
            tracing::error!(%source, "Circuit breaker open too long, halting source");
            client.halt();
        }
    }

    /// Send listings to scoring; false once the run is cancelled or scoring has stopped
    async fn forward(&self, tx: &mpsc::Sender<Listing>, listings: Vec<Listing>, cancel: &CancellationToken) -> bool {
        for listing in listings {
            tokio::select! {
                _ = cancel.cancelled() => return false,
                sent = tx.send(listing) => {
                    if sent.is_err() {
                        return false;
                    }
                }
            }
        }
        true
    }

    async fn evaluate_channel(
        &self,
        rx: mpsc::Receiver<Listing>,
        profiles: &[UserProfile],
        settle: bool,
        cancel: &CancellationToken,
    ) -> EvaluationReport {
        let listings = stream::unfold(rx, |mut rx| async move {
            let listing = rx.recv().await?;
            Some((listing, rx))
        });

        listings
            .map(|listing| self.evaluate_and_settle(listing, profiles, settle, cancel))
            .buffer_unordered(self.config.score_workers)
            .fold(EvaluationReport::default(), |mut total, report| async move {
                total.merge(report);
                total
            })
            .await
    }

    /// Listings an earlier run stored but never finished scoring
    async fn scoring_backlog(&self) -> Vec<Listing> {
        let since = Utc::now() - self.config.freshness_window;
        match self.store.unscored_listings(since, self.config.rescore_limit).await {
            Ok(listings) => {
                if !listings.is_empty() {
                    tracing::info!(count = listings.len(), "Re-queueing listings left unscored");
                }
                listings
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to load unscored listings");
                Vec::new()
            }
        }
    }

    /// Re-send Pending intents the executor never received
    async fn redispatch_pending(&self, cancel: &CancellationToken) -> u64 {
        if self.executor.is_none() {
            return 0;
        }

        let pending = match self.store.undispatched_intents(self.config.redispatch_limit).await {
            Ok(pending) => pending,
            Err(e) => {
                tracing::error!(error = %e, "Failed to load undispatched intents");
                return 0;
            }
        };

        let cutoff = Utc::now() - self.config.redispatch_grace;
        let mut accepted = 0;
        for intent in pending.iter().filter(|i| i.requested_at <= cutoff) {
            if cancel.is_cancelled() {
                break;
            }
            if self.dispatch(intent).await == Dispatch::Accepted {
                accepted += 1;
            }
        }

        if accepted > 0 {
            tracing::info!(count = accepted, "Re-dispatched pending intents");
        }
        accepted
    }

    /// Mark stale listings for every source whose partitions all succeeded
    async fn mark_stale_sources(&self, partitions: &[PartitionReport]) -> u64 {
        let mut healthy: HashMap<Source, bool> = HashMap::new();
        for report in partitions {
            *healthy.entry(report.source).or_insert(true) &= report.succeeded();
        }

        let older_than = Utc::now() - self.config.stale_after;
        let mut marked = 0;
        for (source, ok) in healthy {
            if !ok {
                continue;
            }
            match self.store.mark_stale(source, older_than).await {
                Ok(count) => {
                    if count > 0 {
                        tracing::info!(%source, count, "Marked listings stale");
                    }
                    marked += count;
                }
                Err(e) => tracing::error!(%source, error = %e, "Failed to mark stale listings"),
            }
        }
        marked
    }

    /// Re-score every fresh listing for one profile
    pub async fn reevaluate_profile(&self, profile_id: &str) -> Result<EvaluationReport, PipelineError> {
        let profile = self
            .store
            .get_profile(profile_id)
            .await?
            .ok_or_else(|| PipelineError::ProfileNotFound(profile_id.to_string()))?;

        let since = Utc::now() - self.config.freshness_window;
        let listings = self.store.fresh_listings(since).await?;
        let profiles = std::slice::from_ref(&profile);
        let cancel = CancellationToken::new();

        let report = stream::iter(listings)
            .map(|listing| self.evaluate_listing(listing, profiles, &cancel))
            .buffer_unordered(self.config.score_workers)
            .fold(EvaluationReport::default(), |mut total, report| async move {
                total.merge(report);
                total
            })
            .await;

        tracing::info!(
            profile_id,
            listings = report.listings,
            intents = report.intents_created,
            "Profile re-evaluated"
        );
        Ok(report)
    }

    /// Apply the executor's terminal outcome for an intent
    pub async fn record_outcome(
        &self,
        intent_id: Uuid,
        outcome: ExecutorOutcome,
        now: DateTime<Utc>,
    ) -> Result<IntentTransition, PipelineError> {
        let transition = self
            .store
            .update_intent_status(intent_id, outcome.status(), now)
            .await?;

        match &transition {
            IntentTransition::NotFound => return Err(PipelineError::IntentNotFound(intent_id)),
            IntentTransition::Updated(intent) => {
                tracing::info!(%intent_id, status = ?intent.status, "Intent outcome recorded");
            }
            IntentTransition::AlreadyTerminal(intent) => {
                tracing::warn!(
                    %intent_id,
                    status = ?intent.status,
                    ?outcome,
                    "Ignoring outcome for terminal intent"
                );
            }
        }
        Ok(transition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CurrencyTable;
    use crate::models::{ApplicationIntent, IntentStatus};
    use crate::services::memory::MemoryStore;
    use crate::services::store::IntentStore;

    fn orchestrator(store: Arc<MemoryStore>) -> Orchestrator {
        Orchestrator::new(
            store,
            Normalizer::new(CurrencyTable::default()),
            Matcher::with_default_weights(),
            1.0,
            PipelineConfig::default(),
        )
    }

    #[test]
    fn test_config_from_settings() {
        let config = PipelineConfig::from(&PipelineSettings {
            fetch_workers: 0,
            run_deadline_secs: Some(30),
            ..PipelineSettings::default()
        });
        assert_eq!(config.fetch_workers, 1);
        assert_eq!(config.freshness_window, chrono::Duration::hours(72));
        assert_eq!(config.run_deadline, Some(Duration::from_secs(30)));
        assert_eq!(config.redispatch_grace, chrono::Duration::minutes(10));
        assert_eq!(config.rescore_limit, 1000);
    }

    #[tokio::test]
    async fn test_record_outcome_never_overwrites_terminal() {
        let store = Arc::new(MemoryStore::new());
        let intent = ApplicationIntent::pending("p1", Uuid::new_v4(), 0.9, Utc::now());
        store.create_intent(&intent).await.unwrap();
        let orchestrator = orchestrator(store);

        let first = orchestrator
            .record_outcome(intent.id, ExecutorOutcome::Succeeded, Utc::now())
            .await
            .unwrap();
        assert!(matches!(first, IntentTransition::Updated(ref i) if i.status == IntentStatus::Submitted));

        let second = orchestrator
            .record_outcome(intent.id, ExecutorOutcome::Failed, Utc::now())
            .await
            .unwrap();
        assert!(matches!(second, IntentTransition::AlreadyTerminal(ref i) if i.status == IntentStatus::Submitted));
    }

    #[tokio::test]
    async fn test_record_outcome_unknown_intent() {
        let orchestrator = orchestrator(Arc::new(MemoryStore::new()));
        let result = orchestrator
            .record_outcome(Uuid::new_v4(), ExecutorOutcome::Succeeded, Utc::now())
            .await;
        assert!(matches!(result, Err(PipelineError::IntentNotFound(_))));
    }

    #[tokio::test]
    async fn test_reevaluate_unknown_profile() {
        let orchestrator = orchestrator(Arc::new(MemoryStore::new()));
        let result = orchestrator.reevaluate_profile("missing").await;
        assert!(matches!(result, Err(PipelineError::ProfileNotFound(id)) if id == "missing"));
    }

    #[tokio::test]
    async fn test_run_without_sources_is_healthy() {
        let orchestrator = orchestrator(Arc::new(MemoryStore::new()));
        let report = orchestrator.run(&CancellationToken::new(), None).await;
        assert!(report.partitions.is_empty());
        assert!(!report.cancelled);
        assert_eq!(report.evaluation.listings, 0);
    }
}
