use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::models::RunReport;
use crate::pipeline::{Orchestrator, PipelineError};

/// Proof that the caller holds the single run slot
pub struct RunPermit(#[allow(dead_code)] OwnedMutexGuard<()>);

/// Serializes runs and keeps the latest report
///
/// Scheduled and manually triggered runs share one slot; a trigger while a
/// run is active is refused rather than queued.
pub struct RunCoordinator {
    orchestrator: Arc<Orchestrator>,
    running: Arc<Mutex<()>>,
    last_report: RwLock<Option<RunReport>>,
    shutdown: CancellationToken,
}

impl RunCoordinator {
    pub fn new(orchestrator: Arc<Orchestrator>, shutdown: CancellationToken) -> Self {
        Self {
            orchestrator,
            running: Arc::new(Mutex::new(())),
            last_report: RwLock::new(None),
            shutdown,
        }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn try_begin(&self) -> Result<RunPermit, PipelineError> {
        self.running
            .clone()
            .try_lock_owned()
            .map(RunPermit)
            .map_err(|_| PipelineError::RunInProgress)
    }

    pub fn is_running(&self) -> bool {
        self.running.try_lock().is_err()
    }

    /// Run with an acquired permit, releasing it when the run ends
    pub async fn execute(&self, permit: RunPermit, deadline: Option<Duration>) -> RunReport {
        let report = self.orchestrator.run(&self.shutdown, deadline).await;
        *self.last_report.write() = Some(report.clone());
        drop(permit);
        report
    }

    pub async fn run_now(&self, deadline: Option<Duration>) -> Result<RunReport, PipelineError> {
        let permit = self.try_begin()?;
        Ok(self.execute(permit, deadline).await)
    }

    pub fn last_report(&self) -> Option<RunReport> {
        self.last_report.read().clone()
    }

    /// Run on a fixed interval until shutdown
    pub async fn run_every(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    match self.run_now(None).await {
                        Ok(_) => {}
                        Err(PipelineError::RunInProgress) => {
                            tracing::info!("Previous run still active, skipping scheduled run");
                        }
                        Err(e) => tracing::error!(error = %e, "Scheduled run failed"),
                    }
                }
            }
        }

        tracing::info!("Run scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CurrencyTable, Matcher, Normalizer};
    use crate::pipeline::PipelineConfig;
    use crate::services::memory::MemoryStore;

    fn coordinator() -> RunCoordinator {
        let orchestrator = Orchestrator::new(
            Arc::new(MemoryStore::new()),
            Normalizer::new(CurrencyTable::default()),
            Matcher::with_default_weights(),
            1.0,
            PipelineConfig::default(),
        );
        RunCoordinator::new(Arc::new(orchestrator), CancellationToken::new())
    }

    #[tokio::test]
    async fn test_second_run_refused_while_first_holds_permit() {
        let coordinator = coordinator();
        let permit = coordinator.try_begin().unwrap();
        assert!(coordinator.is_running());
        assert!(matches!(coordinator.try_begin(), Err(PipelineError::RunInProgress)));

        coordinator.execute(permit, None).await;
        assert!(!coordinator.is_running());
        assert!(coordinator.try_begin().is_ok());
    }

    #[tokio::test]
    async fn test_last_report_recorded() {
        let coordinator = coordinator();
        assert!(coordinator.last_report().is_none());
        let report = coordinator.run_now(None).await.unwrap();
        assert_eq!(coordinator.last_report().map(|r| r.run_id), Some(report.run_id));
    }
}
