use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::manager::DatabaseError;
use super::models::{
    AdMetric, Company, Integration, IntegrationOwner, Membership, MetricWrite, NewIntegration, Role, SyncCounts,
    SyncErrorDetail, SyncLog, SyncStatus,
};
use super::store::{IntegrationStore, LeaseStore, MembershipStore, MetricStore, SyncLogStore};

#[derive(Default)]
struct Inner {
    companies: HashMap<Uuid, Company>,
    // Insertion ordered so equal timestamps keep creation order
    memberships: Vec<Membership>,
    integrations: Vec<Integration>,
    sync_logs: Vec<SyncLog>,
    metrics: HashMap<(Uuid, String, chrono::NaiveDate), AdMetric>,
    leases: HashMap<String, (Uuid, DateTime<Utc>)>,
}

/// Process-local store used when no DATABASE_URL is configured and in tests
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_company(&self, name: impl Into<String>) -> Company {
        let company = Company {
            id: Uuid::new_v4(),
            name: name.into(),
            created_at: Utc::now(),
        };
        self.inner.write().await.companies.insert(company.id, company.clone());
        company
    }

    /// Adds or re-roles a membership
    pub async fn insert_membership(&self, user_id: Uuid, company_id: Uuid, role: Role) -> Membership {
        let mut inner = self.inner.write().await;
        if let Some(existing) = inner
            .memberships
            .iter_mut()
            .find(|m| m.user_id == user_id && m.company_id == company_id)
        {
            existing.role = role;
            return existing.clone();
        }
        let membership = Membership {
            user_id,
            company_id,
            role,
            created_at: Utc::now(),
        };
        inner.memberships.push(membership.clone());
        membership
    }

    pub async fn remove_membership(&self, user_id: Uuid, company_id: Uuid) -> bool {
        let mut inner = self.inner.write().await;
        let before = inner.memberships.len();
        inner.memberships.retain(|m| !(m.user_id == user_id && m.company_id == company_id));
        inner.memberships.len() != before
    }

    pub async fn metric_count(&self) -> usize {
        self.inner.read().await.metrics.len()
    }
}

#[async_trait]
impl MembershipStore for MemoryStore {
    async fn find_membership(&self, user_id: Uuid, company_id: Uuid) -> Result<Option<Membership>, DatabaseError> {
        let inner = self.inner.read().await;
        Ok(inner
            .memberships
            .iter()
            .find(|m| m.user_id == user_id && m.company_id == company_id)
            .cloned())
    }

    async fn list_companies(&self, user_id: Uuid) -> Result<Vec<Company>, DatabaseError> {
        let inner = self.inner.read().await;
        let mut memberships: Vec<&Membership> = inner.memberships.iter().filter(|m| m.user_id == user_id).collect();
        memberships.sort_by_key(|m| m.created_at);
        Ok(memberships
            .into_iter()
            .filter_map(|m| inner.companies.get(&m.company_id).cloned())
            .collect())
    }

    async fn find_company(&self, company_id: Uuid) -> Result<Option<Company>, DatabaseError> {
        Ok(self.inner.read().await.companies.get(&company_id).cloned())
    }
}

#[async_trait]
impl IntegrationStore for MemoryStore {
    async fn upsert_integration(&self, new: NewIntegration) -> Result<Integration, DatabaseError> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();

        if let Some(existing) = inner.integrations.iter_mut().find(|i| {
            i.owner == new.owner && i.platform == new.platform && i.account_id == new.account_id
        }) {
            existing.account_name = new.account_name;
            existing.access_token = new.access_token;
            if new.refresh_token.is_some() {
                existing.refresh_token = new.refresh_token;
            }
            existing.is_active = true;
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        let integration = Integration {
            id: Uuid::new_v4(),
            owner: new.owner,
            platform: new.platform,
            account_id: new.account_id,
            account_name: new.account_name,
            access_token: new.access_token,
            refresh_token: new.refresh_token,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        inner.integrations.push(integration.clone());
        Ok(integration)
    }

    async fn find_integration(&self, id: Uuid) -> Result<Option<Integration>, DatabaseError> {
        let inner = self.inner.read().await;
        Ok(inner.integrations.iter().find(|i| i.id == id).cloned())
    }

    async fn list_integrations(&self, owner: IntegrationOwner) -> Result<Vec<Integration>, DatabaseError> {
        let inner = self.inner.read().await;
        Ok(inner.integrations.iter().filter(|i| i.owner == owner).cloned().collect())
    }

    async fn list_active_integrations(&self) -> Result<Vec<Integration>, DatabaseError> {
        let inner = self.inner.read().await;
        Ok(inner.integrations.iter().filter(|i| i.is_active).cloned().collect())
    }

    async fn deactivate_integration(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let mut inner = self.inner.write().await;
        match inner.integrations.iter_mut().find(|i| i.id == id) {
            Some(integration) => {
                integration.is_active = false;
                integration.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl SyncLogStore for MemoryStore {
    async fn create_sync_log(&self, integration_id: Uuid, company_id: Option<Uuid>) -> Result<SyncLog, DatabaseError> {
        let log = SyncLog {
            id: Uuid::new_v4(),
            integration_id,
            company_id,
            status: SyncStatus::Pending,
            records_processed: 0,
            records_created: 0,
            records_updated: 0,
            records_failed: 0,
            error: None,
            started_at: None,
            completed_at: None,
            created_at: Utc::now(),
        };
        self.inner.write().await.sync_logs.push(log.clone());
        Ok(log)
    }

    async fn transition_sync_log(
        &self,
        id: Uuid,
        next: SyncStatus,
        counts: SyncCounts,
        error: Option<SyncErrorDetail>,
    ) -> Result<Option<SyncLog>, DatabaseError> {
        let mut inner = self.inner.write().await;
        let Some(log) = inner.sync_logs.iter_mut().find(|l| l.id == id) else {
            return Ok(None);
        };
        if !log.status.can_transition_to(next) {
            return Ok(None);
        }

        let now = Utc::now();
        log.status = next;
        log.records_processed = counts.processed;
        log.records_created = counts.created;
        log.records_updated = counts.updated;
        log.records_failed = counts.failed;
        if error.is_some() {
            log.error = error;
        }
        if next == SyncStatus::InProgress {
            log.started_at = Some(now);
        }
        if next.is_terminal() {
            log.completed_at = Some(now);
        }
        Ok(Some(log.clone()))
    }

    async fn find_sync_log(&self, id: Uuid) -> Result<Option<SyncLog>, DatabaseError> {
        let inner = self.inner.read().await;
        Ok(inner.sync_logs.iter().find(|l| l.id == id).cloned())
    }

    async fn list_sync_logs(&self, company_id: Uuid, limit: i64) -> Result<Vec<SyncLog>, DatabaseError> {
        let inner = self.inner.read().await;
        let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
        Ok(inner
            .sync_logs
            .iter()
            .rev()
            .filter(|l| l.company_id == Some(company_id))
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl MetricStore for MemoryStore {
    async fn upsert_metric(&self, metric: &AdMetric) -> Result<MetricWrite, DatabaseError> {
        let key = (metric.integration_id, metric.campaign_id.clone(), metric.date);
        let previous = self.inner.write().await.metrics.insert(key, metric.clone());
        Ok(match previous {
            Some(_) => MetricWrite::Updated,
            None => MetricWrite::Created,
        })
    }
}

#[async_trait]
impl LeaseStore for MemoryStore {
    async fn try_acquire_lease(&self, scope: &str, holder: Uuid, ttl: Duration) -> Result<bool, DatabaseError> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        match inner.leases.get(scope) {
            Some((_, expires_at)) if *expires_at > now => Ok(false),
            _ => {
                inner.leases.insert(scope.to_string(), (holder, now + ttl));
                Ok(true)
            }
        }
    }

    async fn release_lease(&self, scope: &str, holder: Uuid) -> Result<(), DatabaseError> {
        let mut inner = self.inner.write().await;
        if matches!(inner.leases.get(scope), Some((owner, _)) if *owner == holder) {
            inner.leases.remove(scope);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::Platform;

    #[tokio::test]
    async fn companies_follow_membership_order() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let first = store.insert_company("First").await;
        let second = store.insert_company("Second").await;
        store.insert_membership(user, second.id, Role::Analyst).await;
        store.insert_membership(user, first.id, Role::Owner).await;

        let names: Vec<String> = store.list_companies(user).await.unwrap().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["Second", "First"]);
    }

    #[tokio::test]
    async fn upsert_refreshes_existing_integration() {
        let store = MemoryStore::new();
        let company = Uuid::new_v4();
        let new = |token: &str, refresh: Option<&str>| NewIntegration {
            owner: IntegrationOwner::Company(company),
            platform: Platform::Meta,
            account_id: "act_1".to_string(),
            account_name: "Main".to_string(),
            access_token: token.to_string(),
            refresh_token: refresh.map(str::to_string),
        };

        let created = store.upsert_integration(new("a", Some("r1"))).await.unwrap();
        store.deactivate_integration(created.id).await.unwrap();
        let refreshed = store.upsert_integration(new("b", None)).await.unwrap();

        assert_eq!(created.id, refreshed.id);
        assert_eq!(refreshed.access_token, "b");
        assert_eq!(refreshed.refresh_token.as_deref(), Some("r1"));
        assert!(refreshed.is_active);
    }

    #[tokio::test]
    async fn terminal_logs_are_immutable() {
        let store = MemoryStore::new();
        let log = store.create_sync_log(Uuid::new_v4(), None).await.unwrap();
        let counts = SyncCounts::default();

        assert!(store.transition_sync_log(log.id, SyncStatus::InProgress, counts, None).await.unwrap().is_some());
        let done = store.transition_sync_log(log.id, SyncStatus::Success, counts, None).await.unwrap().unwrap();
        assert!(done.started_at.is_some());
        assert!(done.completed_at.is_some());

        assert!(store.transition_sync_log(log.id, SyncStatus::Cancelled, counts, None).await.unwrap().is_none());
        assert_eq!(store.find_sync_log(log.id).await.unwrap().unwrap().status, SyncStatus::Success);
    }

    #[tokio::test]
    async fn leases_exclude_until_released() {
        let store = MemoryStore::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        assert!(store.try_acquire_lease("sync:x", a, Duration::minutes(5)).await.unwrap());
        assert!(!store.try_acquire_lease("sync:x", b, Duration::minutes(5)).await.unwrap());
        store.release_lease("sync:x", b).await.unwrap();
        assert!(!store.try_acquire_lease("sync:x", b, Duration::minutes(5)).await.unwrap());
        store.release_lease("sync:x", a).await.unwrap();
        assert!(store.try_acquire_lease("sync:x", b, Duration::minutes(5)).await.unwrap());
    }

    #[tokio::test]
    async fn expired_leases_can_be_taken_over() {
        let store = MemoryStore::new();
        assert!(store.try_acquire_lease("sync:y", Uuid::new_v4(), Duration::zero()).await.unwrap());
        assert!(store.try_acquire_lease("sync:y", Uuid::new_v4(), Duration::minutes(1)).await.unwrap());
    }
}
