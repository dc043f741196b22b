use futures::{stream, FutureExt, StreamExt};
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::platforms::{DateRange, PlatformRegistry};
use super::{lease_scope, SyncError};
use crate::config::SyncConfig;
use crate::database::models::{
    Integration, IntegrationOwner, MetricWrite, Platform, RecordFailure, SyncCounts, SyncErrorDetail, SyncLog,
    SyncStatus,
};
use crate::database::Store;

// Failures beyond this are still counted but not stored on the log
const MAX_REPORTED_FAILURES: usize = 50;

/// Outcome of one integration inside a batch run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    pub integration_id: Uuid,
    pub platform: Platform,
    pub log_id: Option<Uuid>,
    pub status: Option<SyncStatus>,
    pub records: SyncCounts,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncSummary {
    pub fn from_result(integration: &Integration, result: Result<SyncLog, SyncError>) -> Self {
        match result {
            Ok(log) => Self {
                integration_id: integration.id,
                platform: integration.platform,
                log_id: Some(log.id),
                status: Some(log.status),
                records: log.counts(),
                error: None,
            },
            Err(e) => Self {
                integration_id: integration.id,
                platform: integration.platform,
                log_id: None,
                status: None,
                records: SyncCounts::default(),
                error: Some(e.to_string()),
            },
        }
    }
}

enum RunEnd {
    Completed,
    Cancelled,
}

type Finalization = (SyncStatus, SyncCounts, Option<SyncErrorDetail>);

/// Drives sync runs and owns the in-process cancellation flags
pub struct SyncOrchestrator {
    store: Arc<dyn Store>,
    platforms: PlatformRegistry,
    lease_ttl: chrono::Duration,
    lookback_days: u32,
    max_concurrent: usize,
    running: RwLock<HashMap<Uuid, Arc<AtomicBool>>>,
}

impl SyncOrchestrator {
    pub fn new(store: Arc<dyn Store>, platforms: PlatformRegistry, config: &SyncConfig) -> Self {
        Self {
            store,
            platforms,
            lease_ttl: chrono::Duration::seconds(i64::try_from(config.lease_ttl_secs).unwrap_or(i64::MAX / 1000)),
            lookback_days: config.lookback_days,
            max_concurrent: config.max_concurrent_runs.max(1),
            running: RwLock::new(HashMap::new()),
        }
    }

    /// Syncs every active integration, bounded by `max_concurrent_runs`
    pub async fn run_all(&self) -> Result<Vec<SyncSummary>, SyncError> {
        let integrations = self.store.list_active_integrations().await?;
        tracing::info!("Sync batch starting for {} active integrations", integrations.len());
        Ok(self.run_batch(integrations).await)
    }

    /// Manual trigger for the active integrations owned by one company
    pub async fn run_for_company(&self, company_id: Uuid) -> Result<Vec<SyncSummary>, SyncError> {
        let integrations = self
            .store
            .list_integrations(IntegrationOwner::Company(company_id))
            .await?
            .into_iter()
            .filter(|i| i.is_active)
            .collect();
        Ok(self.run_batch(integrations).await)
    }

    pub async fn sync_integration(&self, integration_id: Uuid) -> Result<SyncLog, SyncError> {
        let integration = self
            .store
            .find_integration(integration_id)
            .await?
            .ok_or(SyncError::IntegrationNotFound(integration_id))?;
        if !integration.is_active {
            return Err(SyncError::IntegrationInactive(integration_id));
        }
        self.run(&integration).await
    }

    /// [`run_all`](Self::run_all) on its own task. Dropping the caller's
    /// future does not stop the batch; every run still reaches a terminal
    /// status and releases its lease.
    pub async fn spawn_all(self: &Arc<Self>) -> Result<Vec<SyncSummary>, SyncError> {
        self.detached(|orchestrator| async move { orchestrator.run_all().await }).await
    }

    /// [`run_for_company`](Self::run_for_company) on its own task
    pub async fn spawn_for_company(self: &Arc<Self>, company_id: Uuid) -> Result<Vec<SyncSummary>, SyncError> {
        self.detached(move |orchestrator| async move { orchestrator.run_for_company(company_id).await })
            .await
    }

    /// [`run`](Self::run) on its own task
    pub async fn spawn_run(self: &Arc<Self>, integration: &Integration) -> Result<SyncLog, SyncError> {
        let integration = integration.clone();
        self.detached(move |orchestrator| async move { orchestrator.run(&integration).await })
            .await
    }

    async fn detached<T, F, Fut>(self: &Arc<Self>, work: F) -> Result<T, SyncError>
    where
        F: FnOnce(Arc<Self>) -> Fut,
        Fut: Future<Output = Result<T, SyncError>> + Send + 'static,
        T: Send + 'static,
    {
        tokio::spawn(work(Arc::clone(self)))
            .await
            .map_err(|e| SyncError::Task(e.to_string()))?
    }

    async fn run_batch(&self, integrations: Vec<Integration>) -> Vec<SyncSummary> {
        stream::iter(integrations)
            .map(|integration| async move {
                let result = self.run(&integration).await;
                if let Err(e) = &result {
                    tracing::error!("Sync of integration {} could not be recorded: {}", integration.id, e);
                }
                SyncSummary::from_result(&integration, result)
            })
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await
    }

    /// One full run. Always leaves the log terminal unless the store itself
    /// fails while finalizing.
    pub async fn run(&self, integration: &Integration) -> Result<SyncLog, SyncError> {
        let log = self.store.create_sync_log(integration.id, integration.owner.company_id()).await?;
        let scope = lease_scope(integration.id);

        match self.store.try_acquire_lease(&scope, log.id, self.lease_ttl).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!("Sync {} skipped: integration {} is already syncing", log.id, integration.id);
                return self
                    .finish(log.id, (SyncStatus::Cancelled, SyncCounts::default(), Some(SyncErrorDetail::LeaseUnavailable)))
                    .await;
            }
            Err(e) => {
                tracing::error!("Sync {} could not take lease {}: {}", log.id, scope, e);
                let detail = SyncErrorDetail::Store { message: e.to_string() };
                return self.finish(log.id, (SyncStatus::Failed, SyncCounts::default(), Some(detail))).await;
            }
        }

        let cancelled = Arc::new(AtomicBool::new(false));
        self.running.write().await.insert(log.id, cancelled.clone());

        let outcome = match self
            .store
            .transition_sync_log(log.id, SyncStatus::InProgress, SyncCounts::default(), None)
            .await
        {
            Ok(Some(_)) => {
                tracing::info!("Sync {} started for {} integration {}", log.id, integration.platform, integration.id);
                let mut counts = SyncCounts::default();
                let mut failures = Vec::new();
                let result = AssertUnwindSafe(self.execute(integration, &cancelled, &mut counts, &mut failures))
                    .catch_unwind()
                    .await;
                resolve(result, counts, failures)
            }
            // Cancelled while still pending
            Ok(None) => (SyncStatus::Cancelled, SyncCounts::default(), Some(SyncErrorDetail::Cancelled)),
            Err(e) => (SyncStatus::Failed, SyncCounts::default(), Some(SyncErrorDetail::Store { message: e.to_string() })),
        };

        self.running.write().await.remove(&log.id);
        if let Err(e) = self.store.release_lease(&scope, log.id).await {
            tracing::warn!("Failed to release lease {}: {}", scope, e);
        }

        let finished = self.finish(log.id, outcome).await?;
        tracing::info!(
            "Sync {} finished for integration {}: {} (processed {}, created {}, updated {}, failed {})",
            finished.id,
            integration.id,
            finished.status,
            finished.records_processed,
            finished.records_created,
            finished.records_updated,
            finished.records_failed
        );
        Ok(finished)
    }

    async fn execute(
        &self,
        integration: &Integration,
        cancelled: &AtomicBool,
        counts: &mut SyncCounts,
        failures: &mut Vec<RecordFailure>,
    ) -> Result<RunEnd, SyncError> {
        let client = self
            .platforms
            .get(integration.platform)
            .ok_or_else(|| SyncError::upstream(integration.platform, None, "no client configured for platform"))?;

        let records = client
            .fetch_metrics(integration, DateRange::trailing(self.lookback_days))
            .await?;

        for record in records {
            if cancelled.load(Ordering::SeqCst) {
                return Ok(RunEnd::Cancelled);
            }
            let failure = match record {
                Ok(metric) => match self.store.upsert_metric(&metric).await {
                    Ok(MetricWrite::Created) => {
                        counts.record_created();
                        continue;
                    }
                    Ok(MetricWrite::Updated) => {
                        counts.record_updated();
                        continue;
                    }
                    Err(e) => RecordFailure {
                        reference: format!("{}:{}", integration.platform, metric.campaign_id),
                        reason: e.to_string(),
                    },
                },
                Err(failure) => failure,
            };
            counts.record_failed();
            if failures.len() < MAX_REPORTED_FAILURES {
                failures.push(failure);
            }
        }

        if cancelled.load(Ordering::SeqCst) {
            return Ok(RunEnd::Cancelled);
        }
        Ok(RunEnd::Completed)
    }

    async fn finish(&self, log_id: Uuid, (status, counts, error): Finalization) -> Result<SyncLog, SyncError> {
        match self.store.transition_sync_log(log_id, status, counts, error).await? {
            Some(log) => Ok(log),
            // Already terminal, usually cancelled from outside the worker
            None => self
                .store
                .find_sync_log(log_id)
                .await?
                .ok_or(SyncError::SyncLogNotFound(log_id)),
        }
    }

    /// Moves a PENDING or IN_PROGRESS run to CANCELLED and signals the worker
    /// if it runs in this process. Terminal rows are left untouched.
    pub async fn cancel(&self, log_id: Uuid) -> Result<SyncLog, SyncError> {
        let log = self
            .store
            .find_sync_log(log_id)
            .await?
            .ok_or(SyncError::SyncLogNotFound(log_id))?;
        if log.status.is_terminal() {
            return Err(SyncError::NotCancellable(log_id));
        }

        if let Some(flag) = self.running.read().await.get(&log_id) {
            flag.store(true, Ordering::SeqCst);
        }

        let cancelled = self
            .store
            .transition_sync_log(log_id, SyncStatus::Cancelled, log.counts(), Some(SyncErrorDetail::Cancelled))
            .await?
            .ok_or(SyncError::NotCancellable(log_id))?;
        tracing::info!("Sync {} cancelled", log_id);
        Ok(cancelled)
    }
}

fn resolve(
    result: Result<Result<RunEnd, SyncError>, Box<dyn Any + Send>>,
    counts: SyncCounts,
    failures: Vec<RecordFailure>,
) -> Finalization {
    match result {
        Ok(Ok(RunEnd::Completed)) => {
            let error = (!failures.is_empty()).then_some(SyncErrorDetail::Records { failures });
            (counts.resolved_status(), counts, error)
        }
        Ok(Ok(RunEnd::Cancelled)) => (SyncStatus::Cancelled, counts, Some(SyncErrorDetail::Cancelled)),
        Ok(Err(SyncError::Upstream { platform, status, message })) => {
            (SyncStatus::Failed, counts, Some(SyncErrorDetail::Upstream { platform, status, message }))
        }
        Ok(Err(other)) => (SyncStatus::Failed, counts, Some(SyncErrorDetail::Store { message: other.to_string() })),
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            tracing::error!("Sync worker panicked: {}", message);
            (SyncStatus::Failed, counts, Some(SyncErrorDetail::Panicked { message }))
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{AdMetric, NewIntegration};
    use crate::database::{IntegrationStore, LeaseStore, MemoryStore, SyncLogStore};
    use crate::sync::platforms::{FetchedRecord, PlatformClient};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use std::time::Duration;
    use tokio::sync::Notify;

    enum Behavior {
        Records(Vec<FetchedRecord>),
        Upstream,
        Panic,
        Gated(Arc<Notify>, Vec<FetchedRecord>),
    }

    struct FakeClient {
        platform: Platform,
        behavior: Behavior,
    }

    #[async_trait]
    impl PlatformClient for FakeClient {
        fn platform(&self) -> Platform {
            self.platform
        }

        async fn fetch_metrics(&self, _: &Integration, _: DateRange) -> Result<Vec<FetchedRecord>, SyncError> {
            match &self.behavior {
                Behavior::Records(records) => Ok(records.clone()),
                Behavior::Upstream => Err(SyncError::upstream(self.platform, Some(500), "HTTP 500: boom")),
                Behavior::Panic => panic!("platform exploded"),
                Behavior::Gated(gate, records) => {
                    gate.notified().await;
                    Ok(records.clone())
                }
            }
        }
    }

    fn metric(campaign: &str, day: u32) -> FetchedRecord {
        Ok(AdMetric {
            integration_id: Uuid::nil(),
            campaign_id: campaign.to_string(),
            campaign_name: campaign.to_string(),
            date: NaiveDate::from_ymd_opt(2026, 3, day).unwrap(),
            impressions: 100,
            clicks: 5,
            spend: Decimal::new(250, 2),
            conversions: Decimal::ONE,
        })
    }

    fn broken(campaign: &str) -> FetchedRecord {
        Err(RecordFailure {
            reference: format!("meta:{}", campaign),
            reason: "missing date_start".to_string(),
        })
    }

    async fn setup(behavior: Behavior) -> (Arc<MemoryStore>, SyncOrchestrator, Integration) {
        let store = Arc::new(MemoryStore::new());
        let integration = store
            .upsert_integration(NewIntegration {
                owner: IntegrationOwner::Company(Uuid::new_v4()),
                platform: Platform::Meta,
                account_id: "act_1".to_string(),
                account_name: "Shop".to_string(),
                access_token: "token".to_string(),
                refresh_token: None,
            })
            .await
            .unwrap();
        let registry = PlatformRegistry::new().with_client(Arc::new(FakeClient { platform: Platform::Meta, behavior }));
        let config = crate::config::AppConfig::development().sync;
        let orchestrator = SyncOrchestrator::new(store.clone(), registry, &config);
        (store, orchestrator, integration)
    }

    #[tokio::test]
    async fn clean_run_succeeds() {
        let (store, orchestrator, integration) = setup(Behavior::Records(vec![metric("c1", 1), metric("c2", 1)])).await;

        let log = orchestrator.run(&integration).await.unwrap();
        assert_eq!(log.status, SyncStatus::Success);
        assert_eq!(log.records_created, 2);
        assert_eq!(log.records_failed, 0);
        assert!(log.error.is_none());
        assert!(log.started_at.is_some() && log.completed_at.is_some());
        assert_eq!(store.metric_count().await, 2);

        // Same rows again are updates
        let again = orchestrator.run(&integration).await.unwrap();
        assert_eq!(again.records_updated, 2);
        assert_eq!(again.status, SyncStatus::Success);
    }

    #[tokio::test]
    async fn mixed_and_failed_runs() {
        let (_, orchestrator, integration) = setup(Behavior::Records(vec![metric("c1", 1), broken("c2")])).await;
        let log = orchestrator.run(&integration).await.unwrap();
        assert_eq!(log.status, SyncStatus::PartialSuccess);
        assert!(matches!(log.error, Some(SyncErrorDetail::Records { ref failures }) if failures.len() == 1));

        let (_, orchestrator, integration) = setup(Behavior::Records(vec![broken("c1"), broken("c2")])).await;
        let log = orchestrator.run(&integration).await.unwrap();
        assert_eq!(log.status, SyncStatus::Failed);
        assert_eq!(log.records_failed, 2);
    }

    #[tokio::test]
    async fn upstream_failure_is_recorded() {
        let (_, orchestrator, integration) = setup(Behavior::Upstream).await;
        let log = orchestrator.run(&integration).await.unwrap();
        assert_eq!(log.status, SyncStatus::Failed);
        assert!(matches!(log.error, Some(SyncErrorDetail::Upstream { status: Some(500), .. })));
    }

    #[tokio::test]
    async fn panic_still_finalizes_and_releases_lease() {
        let (store, orchestrator, integration) = setup(Behavior::Panic).await;
        let log = orchestrator.run(&integration).await.unwrap();
        assert_eq!(log.status, SyncStatus::Failed);
        assert!(matches!(log.error, Some(SyncErrorDetail::Panicked { ref message }) if message.contains("exploded")));

        let lease_free = store
            .try_acquire_lease(&lease_scope(integration.id), Uuid::new_v4(), chrono::Duration::minutes(1))
            .await
            .unwrap();
        assert!(lease_free);
    }

    #[tokio::test]
    async fn held_lease_cancels_run() {
        let (store, orchestrator, integration) = setup(Behavior::Records(vec![metric("c1", 1)])).await;
        store
            .try_acquire_lease(&lease_scope(integration.id), Uuid::new_v4(), chrono::Duration::minutes(5))
            .await
            .unwrap();

        let log = orchestrator.run(&integration).await.unwrap();
        assert_eq!(log.status, SyncStatus::Cancelled);
        assert_eq!(log.error, Some(SyncErrorDetail::LeaseUnavailable));
        assert!(log.started_at.is_none());
    }

    #[tokio::test]
    async fn cancel_stops_in_progress_run() {
        let gate = Arc::new(Notify::new());
        let (store, orchestrator, integration) =
            setup(Behavior::Gated(gate.clone(), vec![metric("c1", 1), metric("c2", 2)])).await;
        let orchestrator = Arc::new(orchestrator);
        let company = integration.owner.company_id().unwrap();

        let worker = {
            let orchestrator = orchestrator.clone();
            let id = integration.id;
            tokio::spawn(async move { orchestrator.sync_integration(id).await })
        };

        let log_id = loop {
            let logs = store.list_sync_logs(company, 10).await.unwrap();
            if let Some(log) = logs.iter().find(|l| l.status == SyncStatus::InProgress) {
                break log.id;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };

        let cancelled = orchestrator.cancel(log_id).await.unwrap();
        assert_eq!(cancelled.status, SyncStatus::Cancelled);
        gate.notify_one();

        let finished = worker.await.unwrap().unwrap();
        assert_eq!(finished.status, SyncStatus::Cancelled);
        assert_eq!(store.metric_count().await, 0);
        assert!(matches!(orchestrator.cancel(log_id).await, Err(SyncError::NotCancellable(_))));
    }

    #[tokio::test]
    async fn dropped_caller_does_not_strand_run() {
        let gate = Arc::new(Notify::new());
        let (store, orchestrator, integration) = setup(Behavior::Gated(gate.clone(), vec![metric("c1", 1)])).await;
        let orchestrator = Arc::new(orchestrator);
        let company = integration.owner.company_id().unwrap();

        let caller = {
            let orchestrator = orchestrator.clone();
            let integration = integration.clone();
            tokio::spawn(async move { orchestrator.spawn_run(&integration).await })
        };

        let log_id = loop {
            let logs = store.list_sync_logs(company, 10).await.unwrap();
            if let Some(log) = logs.iter().find(|l| l.status == SyncStatus::InProgress) {
                break log.id;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };

        // The caller goes away mid-run, like a disconnected HTTP client
        caller.abort();
        assert!(caller.await.unwrap_err().is_cancelled());
        gate.notify_one();

        let finished = loop {
            let log = store.find_sync_log(log_id).await.unwrap().unwrap();
            if log.status.is_terminal() {
                break log;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };
        assert_eq!(finished.status, SyncStatus::Success);
        assert_eq!(finished.records_created, 1);

        let lease_free = store
            .try_acquire_lease(&lease_scope(integration.id), Uuid::new_v4(), chrono::Duration::minutes(1))
            .await
            .unwrap();
        assert!(lease_free);
    }

    #[tokio::test]
    async fn batch_isolates_failures() {
        let store = Arc::new(MemoryStore::new());
        let company = Uuid::new_v4();
        for (platform, account) in [(Platform::Meta, "act_1"), (Platform::Ga4, "properties/2")] {
            store
                .upsert_integration(NewIntegration {
                    owner: IntegrationOwner::Company(company),
                    platform,
                    account_id: account.to_string(),
                    account_name: account.to_string(),
                    access_token: "token".to_string(),
                    refresh_token: None,
                })
                .await
                .unwrap();
        }
        let registry = PlatformRegistry::new()
            .with_client(Arc::new(FakeClient { platform: Platform::Meta, behavior: Behavior::Upstream }))
            .with_client(Arc::new(FakeClient {
                platform: Platform::Ga4,
                behavior: Behavior::Records(vec![metric("c1", 1)]),
            }));
        let orchestrator = SyncOrchestrator::new(store.clone(), registry, &crate::config::AppConfig::development().sync);

        let summaries = orchestrator.run_for_company(company).await.unwrap();
        assert_eq!(summaries.len(), 2);
        let status_of = |platform| summaries.iter().find(|s| s.platform == platform).and_then(|s| s.status);
        assert_eq!(status_of(Platform::Meta), Some(SyncStatus::Failed));
        assert_eq!(status_of(Platform::Ga4), Some(SyncStatus::Success));

        assert_eq!(orchestrator.run_all().await.unwrap().len(), 2);
        assert_eq!(store.list_sync_logs(company, 10).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn inactive_integration_is_rejected() {
        let (store, orchestrator, integration) = setup(Behavior::Records(vec![])).await;
        store.deactivate_integration(integration.id).await.unwrap();
        assert!(matches!(
            orchestrator.sync_integration(integration.id).await,
            Err(SyncError::IntegrationInactive(_))
        ));
        assert!(matches!(
            orchestrator.sync_integration(Uuid::new_v4()).await,
            Err(SyncError::IntegrationNotFound(_))
        ));
    }
}
